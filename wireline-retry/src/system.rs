//! The retry system.
//!
//! Owns one entry per managed retry-wrapped request and drives the retry
//! decision every [`update`](RetrySystem::update): advance failover
//! domains on connection errors, decide retry vs. terminal from the
//! underlying status and response code, hold re-submits back through the
//! lockout, and finalize terminal entries.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use metriken::{metric, Counter};
use tracing::{info, warn};
use wireline::{HttpModule, RequestStatus};

use crate::lockout::lockout_period_seconds;
use crate::request::{RetryPolicy, RetryRequest, RetryStatus};

#[metric(
    name = "wireline/retry/attempts",
    description = "Re-submitted attempts after a lockout"
)]
pub static RETRY_ATTEMPTS: Counter = Counter::new();

#[metric(
    name = "wireline/retry/exhausted",
    description = "Requests that ran out of retry attempts"
)]
pub static RETRY_EXHAUSTED: Counter = Counter::new();

/// Counters reported by one [`RetrySystem::update`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// No entry is failing or retrying.
    pub is_green: bool,
    /// Entries managed at the start of the pass.
    pub file_count: u32,
    /// Entries currently in a retrying state.
    pub failing_count: u32,
    /// Entries that reached a failure terminal this pass.
    pub failed_count: u32,
    /// Entries that completed successfully this pass.
    pub completed_count: u32,
}

struct RetryEntry {
    request: RetryRequest,
    should_cancel: bool,
    /// Attempts re-submitted so far; 0 until the first retry.
    retry_count: u32,
    /// Absolute start time of the first attempt, in clock seconds.
    start_time: f64,
    /// Absolute end of the current lockout, in clock seconds.
    lockout_end: f64,
}

type ClockFn = Box<dyn Fn() -> f64 + Send + Sync>;

struct SystemInner {
    module: HttpModule,
    entries: Mutex<Vec<RetryEntry>>,
    default_retry_limit: Mutex<Option<u32>>,
    default_retry_timeout: Option<f64>,
    random_failure_rate: Mutex<Option<f32>>,
    clock: Mutex<ClockFn>,
}

/// Shared handle to the retry system.
#[derive(Clone)]
pub struct RetrySystem {
    inner: Arc<SystemInner>,
}

impl RetrySystem {
    /// A retry system issuing requests through `module`, with the given
    /// policy defaults for requests that do not override them.
    pub fn new(
        module: &HttpModule,
        default_retry_limit: Option<u32>,
        default_retry_timeout: Option<f64>,
    ) -> Self {
        let epoch = Instant::now();
        Self {
            inner: Arc::new(SystemInner {
                module: module.clone(),
                entries: Mutex::new(Vec::new()),
                default_retry_limit: Mutex::new(default_retry_limit),
                default_retry_timeout,
                random_failure_rate: Mutex::new(None),
                clock: Mutex::new(Box::new(move || epoch.elapsed().as_secs_f64())),
            }),
        }
    }

    /// A new retry-wrapped request with `policy` overriding the defaults.
    pub fn create_request(&self, policy: RetryPolicy) -> RetryRequest {
        RetryRequest::new(self.clone(), self.inner.module.create_request(), policy)
    }

    /// Force a fraction of successful attempts to retry anyway. Connection
    /// health testing affordance.
    pub fn set_random_failure_rate(&self, rate: f32) {
        *self.inner.random_failure_rate.lock().unwrap() = Some(rate);
    }

    pub fn set_default_retry_limit(&self, limit: u32) {
        *self.inner.default_retry_limit.lock().unwrap() = Some(limit);
    }

    /// Replace the monotonic clock behind lockouts and timeouts. Tests
    /// substitute a controlled time source here, like the manager's
    /// correlation-id method.
    pub fn set_clock_method(&self, clock: impl Fn() -> f64 + Send + Sync + 'static) {
        *self.inner.clock.lock().unwrap() = Box::new(clock);
    }

    fn now(&self) -> f64 {
        (self.inner.clock.lock().unwrap())()
    }

    /// Entries still being managed.
    pub fn request_count(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub(crate) fn process_request(&self, request: &RetryRequest) -> bool {
        let started = request.http_request().process();
        if started {
            self.inner.entries.lock().unwrap().push(RetryEntry {
                request: request.clone(),
                should_cancel: false,
                retry_count: 0,
                start_time: self.now(),
                lockout_end: 0.0,
            });
        }
        started
    }

    pub(crate) fn cancel_request(&self, request: &RetryRequest) {
        {
            let mut entries = self.inner.entries.lock().unwrap();
            let mut found = false;
            for entry in entries.iter_mut() {
                if entry.request.ptr_id() == request.ptr_id() {
                    entry.should_cancel = true;
                    found = true;
                }
            }
            // A request whose submit was rejected never got an entry; add
            // one flagged for cancel so the next update finalizes it.
            if !found {
                entries.push(RetryEntry {
                    request: request.clone(),
                    should_cancel: true,
                    retry_count: 0,
                    start_time: self.now(),
                    lockout_end: 0.0,
                });
            }
        }
        request.http_request().cancel();
    }

    fn should_retry(&self, request: &RetryRequest) -> bool {
        match request.http_request().response() {
            // No response means a connection or network error; only retry
            // outright connection failures unconditionally, otherwise the
            // request may have been received (and acted on!) twice.
            None => match request.http_request().status() {
                RequestStatus::FailedConnectionError => true,
                RequestStatus::Failed => {
                    let verb = request.http_request().verb();
                    if request.policy().retry_verbs.is_empty() {
                        verb == "GET" || verb == "HEAD"
                    } else {
                        request.policy().retry_verbs.contains(&verb)
                    }
                }
                _ => false,
            },
            // A completed transaction retries only on the explicitly
            // listed response codes.
            Some(response) => request
                .policy()
                .retry_response_codes
                .contains(&response.response_code()),
        }
    }

    fn can_retry(&self, entry: &RetryEntry) -> bool {
        let limit = entry
            .request
            .policy()
            .retry_limit
            .or(*self.inner.default_retry_limit.lock().unwrap());
        match limit {
            Some(limit) => entry.retry_count < limit,
            None => false,
        }
    }

    fn has_timed_out(&self, entry: &RetryEntry, now: f64) -> bool {
        let timeout = entry
            .request
            .policy()
            .retry_timeout
            .or(self.inner.default_retry_timeout);
        match timeout {
            Some(timeout) => now >= entry.start_time + timeout,
            None => false,
        }
    }

    /// Advance every managed entry one step. Returns the pass counters;
    /// `is_green` is false whenever something is failing or retrying.
    pub fn update(&self) -> UpdateSummary {
        let mut summary = UpdateSummary {
            is_green: true,
            ..UpdateSummary::default()
        };
        let now = self.now();
        // Terminal callbacks run after the entry lock is released so they
        // may submit new retry-wrapped requests.
        let mut will_retry_events = Vec::new();
        let mut completed = Vec::new();

        {
            let mut entries = self.inner.entries.lock().unwrap();
            summary.file_count = entries.len() as u32;

            let mut idx = 0;
            while idx < entries.len() {
                let entry = &mut entries[idx];
                let request = entry.request.clone();
                let request_status = request.http_request().status();
                let mut retry_status = request.retry_status();

                if entry.should_cancel {
                    warn!(url = %request.url(), "retry request cancelled");
                    retry_status = RetryStatus::Cancelled;
                } else if self.has_timed_out(entry, now) {
                    warn!(
                        retry = entry.retry_count + 1,
                        url = %request.url(),
                        "timeout on retry"
                    );
                    summary.is_green = false;
                    summary.failed_count += 1;
                    retry_status = RetryStatus::FailedTimeout;
                } else {
                    if retry_status == RetryStatus::NotStarted
                        && request_status != RequestStatus::NotStarted
                    {
                        retry_status = RetryStatus::Processing;
                    }

                    let mut entered_lockout = false;
                    if retry_status == RetryStatus::Processing {
                        let mut force_fail = false;
                        if request_status == RequestStatus::Succeeded {
                            let rate = *self.inner.random_failure_rate.lock().unwrap();
                            if let Some(rate) = rate {
                                if rand::random::<f32>() < rate {
                                    force_fail = true;
                                }
                            }
                        }

                        // A connection failure moves every holder of the
                        // shared domain list to the next domain.
                        if request_status == RequestStatus::FailedConnectionError
                            && request.policy().retry_domains.is_some()
                        {
                            request.move_to_next_retry_domain();
                        }

                        let mut should_retry = false;
                        let mut can_retry = false;
                        if matches!(
                            request_status,
                            RequestStatus::Failed
                                | RequestStatus::FailedConnectionError
                                | RequestStatus::Succeeded
                        ) {
                            should_retry = self.should_retry(&request);
                            can_retry = self.can_retry(entry);
                        }

                        let failed_attempt = matches!(
                            request_status,
                            RequestStatus::Failed | RequestStatus::FailedConnectionError
                        );
                        // A wanted-and-allowed retry enters the lockout; a
                        // wanted-but-exhausted retry is terminal even when
                        // the last attempt's transaction succeeded (listed
                        // response codes fail the retry request, not stick
                        // as a success).
                        if force_fail || (should_retry && can_retry) {
                            summary.is_green = false;
                            let skip_backoff = request_status
                                == RequestStatus::FailedConnectionError
                                && request.policy().retry_domains.is_some();
                            let response = request.http_request().response();
                            let lockout = lockout_period_seconds(
                                response.as_ref(),
                                entry.retry_count,
                                skip_backoff,
                            );
                            if lockout > 0.0 {
                                warn!(
                                    seconds = lockout,
                                    url = %request.url(),
                                    "lockout before retry"
                                );
                            }
                            entry.lockout_end = now + lockout;
                            retry_status = RetryStatus::ProcessingLockout;
                            entered_lockout = true;
                            will_retry_events.push((request.clone(), response, lockout));
                        } else if should_retry || failed_attempt {
                            // Out of attempts, or a failure the policy does
                            // not allow retrying.
                            summary.is_green = false;
                            warn!(url = %request.url(), "retry attempts exhausted");
                            RETRY_EXHAUSTED.increment();
                            summary.failed_count += 1;
                            retry_status = RetryStatus::FailedRetry;
                        } else if request_status == RequestStatus::Succeeded {
                            if entry.retry_count > 0 {
                                info!(url = %request.url(), "request succeeded after retries");
                            }
                            retry_status = RetryStatus::Succeeded;
                        }
                    }

                    // A freshly entered lockout re-submits no earlier than
                    // the next update, after the will-retry event has fired.
                    if retry_status == RetryStatus::ProcessingLockout {
                        if !entered_lockout
                            && now >= entry.lockout_end
                            && request.http_request().process()
                        {
                            warn!(
                                retry = entry.retry_count + 1,
                                url = %request.url(),
                                "retrying request"
                            );
                            RETRY_ATTEMPTS.increment();
                            entry.retry_count += 1;
                            retry_status = RetryStatus::Processing;
                        }
                        summary.failing_count += 1;
                    }
                }

                request.set_retry_status(retry_status);

                if retry_status.is_terminal() {
                    let success = retry_status == RetryStatus::Succeeded;
                    if success {
                        summary.completed_count += 1;
                    }
                    completed.push((request, success));
                    // Entry order is not observable.
                    entries.swap_remove(idx);
                } else {
                    idx += 1;
                }
            }
        }

        for (request, response, lockout) in will_retry_events {
            request.fire_will_retry(response.as_ref(), lockout);
        }
        for (request, success) in completed {
            if success {
                request.broadcast_response_headers();
            }
            let response = request.http_request().response();
            request.fire_complete(response.as_ref(), success);
        }

        summary
    }

    /// Small-step the manager and this system until every entry is
    /// finalized or `timeout_seconds` elapses. For shutdown and suspend,
    /// to get pending requests onto the network.
    pub fn block_until_flushed(&self, timeout_seconds: f64) {
        const SLEEP_INTERVAL: f64 = 0.016;
        let mut elapsed = 0.0;
        while self.request_count() > 0 && elapsed < timeout_seconds {
            self.inner.module.manager().tick(SLEEP_INTERVAL);
            self.update();
            thread::sleep(Duration::from_secs_f64(SLEEP_INTERVAL));
            elapsed += SLEEP_INTERVAL;
        }
    }
}
