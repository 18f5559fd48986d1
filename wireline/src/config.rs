//! Runtime configuration for the HTTP core.

use tracing::warn;

/// Why a blocking flush was requested. Each reason carries its own
/// (soft, hard) time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Periodic or manual flush.
    Default,
    /// The process is entering the background.
    Background,
    /// The process is exiting. Completion delegates are cleared up front.
    Shutdown,
    /// Wait until fully drained, without a time bound.
    FullFlush,
}

/// Time limits for one flush reason, in seconds. `-1` means unbounded.
///
/// Until `soft` elapses the flush waits for natural completion; after `soft`
/// every remaining request is cancelled; after `hard` the rest are abandoned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlushTimeLimit {
    pub soft: f64,
    pub hard: f64,
}

impl FlushTimeLimit {
    pub const fn new(soft: f64, hard: f64) -> Self {
        Self { soft, hard }
    }

    /// Repair an inverted pair: the soft limit must stay strictly below the
    /// hard limit so remaining requests can be cancelled before abandonment.
    pub(crate) fn repaired(self) -> Self {
        if self.hard >= 0.0 && (self.soft < 0.0 || self.soft >= self.hard) {
            warn!(
                soft = self.soft,
                hard = self.hard,
                "flush soft limit is not below the hard limit; repairing"
            );
            if self.hard > 0.0 {
                Self::new(self.hard / 2.0, self.hard)
            } else {
                Self::new(0.0, 0.05)
            }
        } else {
            self
        }
    }
}

/// How the I/O worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Dedicated background thread.
    Threaded,
    /// No thread of its own; the manager drives its tick on the main thread.
    Cooperative,
}

/// Configuration for the HTTP module.
#[derive(Clone)]
pub struct HttpConfig {
    /// Seconds for the entire request to complete. 0 disables the check.
    /// Also the inactivity bound for threaded requests, measured from the
    /// last transport-level activity.
    pub http_timeout: f64,
    /// Seconds to establish the connection. -1 uses the backend default.
    pub connection_timeout: f64,
    /// Seconds to receive a response on the connection. -1 uses the backend
    /// default. Handed to the backend at session setup.
    pub receive_timeout: f64,
    /// Seconds to send a request on the connection. -1 uses the backend
    /// default.
    pub send_timeout: f64,
    /// Max simultaneous connections to a single server.
    pub max_connections_per_server: u32,
    /// Upper bound on connections across all servers. 0 leaves it to the
    /// backend.
    pub max_total_connections: u32,
    /// Master switch. When false every submit is rejected.
    pub enable_http: bool,
    /// Route requests through the null (mock) backend.
    pub use_null_http: bool,
    /// Minimum seconds a request stays in flight before its completion may
    /// be published.
    pub delay_time: f64,
    /// Worker frame budget while transfers are running.
    pub thread_active_frame_time: f64,
    /// Minimum worker sleep per pass while transfers are running.
    pub thread_active_min_sleep: f64,
    /// Worker frame budget while idle.
    pub thread_idle_frame_time: f64,
    /// Minimum worker sleep per pass while idle.
    pub thread_idle_min_sleep: f64,
    /// Cap on concurrently running transfers in the worker.
    pub running_request_limit: usize,
    /// Domain suffixes requests are allowed to target. Empty = no filtering.
    pub allowed_domains: Vec<String>,
    /// Development override for the allow-list: `Some(false)` skips it in
    /// builds with debug assertions. Release builds always enforce it.
    pub enforce_domain_restrictions: Option<bool>,
    /// Main-thread sleep between flush polls when the worker has its own
    /// thread.
    pub request_cleanup_delay: f64,
    /// Flush limits per reason.
    pub flush_default: FlushTimeLimit,
    pub flush_background: FlushTimeLimit,
    pub flush_shutdown: FlushTimeLimit,
    pub flush_full: FlushTimeLimit,
    /// Let servers send compressed content.
    pub accept_compressed_content: bool,
    /// Verify peer certificates.
    pub verify_peer: bool,
    /// Read buffer size handed to the backend.
    pub buffer_size: usize,
    /// Allow the backend to rewind seekable payloads.
    pub allow_seek_function: bool,
    /// Reuse connections between requests. Cleared by `-noreuseconn`.
    pub reuse_connections: bool,
    /// Local address to bind outgoing connections to (`-MULTIHOMEHTTP=`).
    pub local_host_addr: Option<String>,
    /// Proxy in `host:port` form.
    pub proxy_address: Option<String>,
    /// Disable inactivity timeouts (`-NoTimeouts`, development only).
    pub no_timeouts: bool,
    /// Worker threading mode for this platform.
    pub worker_mode: WorkerMode,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_timeout: 300.0,
            connection_timeout: -1.0,
            receive_timeout: -1.0,
            send_timeout: -1.0,
            max_connections_per_server: 16,
            max_total_connections: 0,
            enable_http: true,
            use_null_http: false,
            delay_time: 0.0,
            thread_active_frame_time: 1.0 / 200.0,
            thread_active_min_sleep: 0.0,
            thread_idle_frame_time: 1.0 / 30.0,
            thread_idle_min_sleep: 0.0,
            running_request_limit: usize::MAX,
            allowed_domains: Vec::new(),
            enforce_domain_restrictions: None,
            request_cleanup_delay: 0.5,
            flush_default: FlushTimeLimit::new(2.0, 4.0),
            flush_background: FlushTimeLimit::new(2.0, 4.0),
            flush_shutdown: FlushTimeLimit::new(2.0, 4.0),
            flush_full: FlushTimeLimit::new(-1.0, -1.0),
            accept_compressed_content: true,
            verify_peer: true,
            buffer_size: 256 * 1024,
            allow_seek_function: true,
            reuse_connections: true,
            local_host_addr: None,
            proxy_address: None,
            no_timeouts: false,
            worker_mode: WorkerMode::Threaded,
        }
    }
}

impl HttpConfig {
    /// Validate configuration values. Returns an error if any value is out
    /// of range; repairable values are fixed in place with a warning.
    pub fn validate(&mut self) -> Result<(), crate::error::Error> {
        if self.running_request_limit < 1 {
            warn!(
                limit = self.running_request_limit,
                "running request limit must be at least 1; treating as unlimited"
            );
            self.running_request_limit = usize::MAX;
        }
        if self.buffer_size == 0 {
            return Err(crate::error::Error::Config(
                "buffer_size must be > 0".into(),
            ));
        }
        if self.request_cleanup_delay <= 0.0 {
            return Err(crate::error::Error::Config(
                "request_cleanup_delay must be > 0".into(),
            ));
        }
        for v in [
            self.thread_active_frame_time,
            self.thread_active_min_sleep,
            self.thread_idle_frame_time,
            self.thread_idle_min_sleep,
        ] {
            if v < 0.0 {
                return Err(crate::error::Error::Config(
                    "worker pacing values must not be negative".into(),
                ));
            }
        }
        Ok(())
    }

    /// Flush limits for `reason`, with the soft/hard inversion repaired.
    pub fn flush_limits(&self, reason: FlushReason) -> FlushTimeLimit {
        let raw = match reason {
            FlushReason::Default => self.flush_default,
            FlushReason::Background => self.flush_background,
            FlushReason::Shutdown => self.flush_shutdown,
            FlushReason::FullFlush => self.flush_full,
        };
        raw.repaired()
    }
}

/// Builder for [`HttpConfig`] with discoverable methods and `build()`
/// validation.
///
/// # Example
///
/// ```rust
/// use wireline::HttpConfigBuilder;
///
/// let config = HttpConfigBuilder::new()
///     .http_timeout(120.0)
///     .max_connections_per_server(8)
///     .allowed_domains(["example.com"])
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Seconds for the entire request to complete. 0 disables the check.
    pub fn http_timeout(mut self, seconds: f64) -> Self {
        self.config.http_timeout = seconds;
        self
    }

    /// Connection establishment timeout. -1 uses the backend default.
    pub fn connection_timeout(mut self, seconds: f64) -> Self {
        self.config.connection_timeout = seconds;
        self
    }

    /// Receive timeout handed to the backend. -1 uses the backend default.
    pub fn receive_timeout(mut self, seconds: f64) -> Self {
        self.config.receive_timeout = seconds;
        self
    }

    /// Send timeout handed to the backend. -1 uses the backend default.
    pub fn send_timeout(mut self, seconds: f64) -> Self {
        self.config.send_timeout = seconds;
        self
    }

    // ── Connections ──────────────────────────────────────────────────

    /// Max simultaneous connections to a single server.
    pub fn max_connections_per_server(mut self, n: u32) -> Self {
        self.config.max_connections_per_server = n;
        self
    }

    /// Cap on concurrently running transfers in the worker.
    pub fn running_request_limit(mut self, n: usize) -> Self {
        self.config.running_request_limit = n;
        self
    }

    /// Proxy in `host:port` form.
    pub fn proxy_address(mut self, addr: impl Into<String>) -> Self {
        self.config.proxy_address = Some(addr.into());
        self
    }

    // ── Switches ─────────────────────────────────────────────────────

    /// Master switch. When false every submit is rejected.
    pub fn enable_http(mut self, enable: bool) -> Self {
        self.config.enable_http = enable;
        self
    }

    /// Route requests through the null (mock) backend.
    pub fn use_null_http(mut self, enable: bool) -> Self {
        self.config.use_null_http = enable;
        self
    }

    /// Disable inactivity timeouts (development only).
    pub fn no_timeouts(mut self, enable: bool) -> Self {
        self.config.no_timeouts = enable;
        self
    }

    // ── Domain filtering ─────────────────────────────────────────────

    /// Domain suffixes requests are allowed to target.
    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Force the allow-list on or off in builds with debug assertions.
    pub fn enforce_domain_restrictions(mut self, enforce: bool) -> Self {
        self.config.enforce_domain_restrictions = Some(enforce);
        self
    }

    // ── Worker pacing ────────────────────────────────────────────────

    /// Frame budget and minimum sleep while transfers are running.
    pub fn active_pacing(mut self, frame_time: f64, min_sleep: f64) -> Self {
        self.config.thread_active_frame_time = frame_time;
        self.config.thread_active_min_sleep = min_sleep;
        self
    }

    /// Frame budget and minimum sleep while idle.
    pub fn idle_pacing(mut self, frame_time: f64, min_sleep: f64) -> Self {
        self.config.thread_idle_frame_time = frame_time;
        self.config.thread_idle_min_sleep = min_sleep;
        self
    }

    /// Worker threading mode.
    pub fn worker_mode(mut self, mode: WorkerMode) -> Self {
        self.config.worker_mode = mode;
        self
    }

    // ── Flush limits ─────────────────────────────────────────────────

    /// Soft/hard limits for one flush reason, in seconds. -1 is unbounded.
    pub fn flush_limits(mut self, reason: FlushReason, soft: f64, hard: f64) -> Self {
        let limit = FlushTimeLimit::new(soft, hard);
        match reason {
            FlushReason::Default => self.config.flush_default = limit,
            FlushReason::Background => self.config.flush_background = limit,
            FlushReason::Shutdown => self.config.flush_shutdown = limit,
            FlushReason::FullFlush => self.config.flush_full = limit,
        }
        self
    }

    /// Main-thread sleep between flush polls.
    pub fn request_cleanup_delay(mut self, seconds: f64) -> Self {
        self.config.request_cleanup_delay = seconds;
        self
    }

    /// Minimum seconds before a completion may be published.
    pub fn delay_time(mut self, seconds: f64) -> Self {
        self.config.delay_time = seconds;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Mutable access to the underlying config for fields not covered by
    /// builder methods.
    pub fn config_mut(&mut self) -> &mut HttpConfig {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`HttpConfig`].
    pub fn build(mut self) -> Result<HttpConfig, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_sane() {
        let config = HttpConfig::default();
        let limit = config.flush_limits(FlushReason::Default);
        assert_eq!(limit, FlushTimeLimit::new(2.0, 4.0));
        let full = config.flush_limits(FlushReason::FullFlush);
        assert_eq!(full, FlushTimeLimit::new(-1.0, -1.0));
    }

    #[test]
    fn inverted_limits_are_repaired() {
        let limit = FlushTimeLimit::new(6.0, 4.0).repaired();
        assert_eq!(limit, FlushTimeLimit::new(2.0, 4.0));

        let limit = FlushTimeLimit::new(1.0, 0.0).repaired();
        assert_eq!(limit.soft, 0.0);
        assert!(limit.hard > 0.0);

        let limit = FlushTimeLimit::new(-1.0, 4.0).repaired();
        assert_eq!(limit, FlushTimeLimit::new(2.0, 4.0));
    }

    #[test]
    fn unbounded_limits_pass_through() {
        let limit = FlushTimeLimit::new(-1.0, -1.0).repaired();
        assert_eq!(limit, FlushTimeLimit::new(-1.0, -1.0));
        let limit = FlushTimeLimit::new(2.0, -1.0).repaired();
        assert_eq!(limit, FlushTimeLimit::new(2.0, -1.0));
    }

    #[test]
    fn zero_running_limit_is_repaired() {
        let mut config = HttpConfig {
            running_request_limit: 0,
            ..HttpConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.running_request_limit, usize::MAX);
    }

    #[test]
    fn builder_round_trip() {
        let config = HttpConfigBuilder::new()
            .http_timeout(60.0)
            .running_request_limit(4)
            .allowed_domains(["example.com", "cdn.example.com"])
            .flush_limits(FlushReason::Shutdown, 0.5, 1.0)
            .build()
            .unwrap();
        assert_eq!(config.http_timeout, 60.0);
        assert_eq!(config.running_request_limit, 4);
        assert_eq!(config.allowed_domains.len(), 2);
        assert_eq!(
            config.flush_limits(FlushReason::Shutdown),
            FlushTimeLimit::new(0.5, 1.0)
        );
    }

    #[test]
    fn negative_pacing_rejected() {
        let mut config = HttpConfig {
            thread_idle_frame_time: -0.1,
            ..HttpConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
