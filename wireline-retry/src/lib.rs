//! wireline-retry — retry, backoff, and domain failover for wireline.
//!
//! Wraps [`wireline`] requests with a configurable policy: retry counts
//! and timeouts, response-code-driven retries, verb restrictions, and
//! failover across interchangeable domains. The [`RetrySystem`] owns every
//! wrapped request and advances them one decision step per
//! [`update`](RetrySystem::update), which the embedder calls next to the
//! manager's per-frame tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use wireline::{HttpConfig, HttpModule};
//! use wireline_retry::{RetryPolicy, RetrySystem};
//!
//! let module = HttpModule::init(HttpConfig::default())?;
//! let retries = RetrySystem::new(&module, Some(3), Some(120.0));
//!
//! let request = retries.create_request(RetryPolicy {
//!     retry_response_codes: [503].into_iter().collect(),
//!     ..RetryPolicy::default()
//! });
//! request.set_url("https://api.example.com/v1/session");
//! request.on_complete(|_req, response, ok| {
//!     println!("terminal: ok={ok} code={:?}", response.map(|r| r.response_code()));
//! });
//! request.process();
//!
//! loop {
//!     module.manager().tick(1.0 / 60.0);
//!     let summary = retries.update();
//!     if summary.file_count == 0 {
//!         break;
//!     }
//! }
//! # Ok::<(), wireline::Error>(())
//! ```

pub mod domains;
pub mod lockout;
pub mod request;
pub mod system;

/// Ordered failover domains with a shared active index.
pub use domains::RetryDomains;
/// Server-driven throttling extraction.
pub use lockout::throttled_time_from_response;
/// Per-request retry policy.
pub use request::RetryPolicy;
/// A retry-wrapped request.
pub use request::RetryRequest;
/// Status of the retry wrapper.
pub use request::RetryStatus;
/// The retry manager.
pub use system::RetrySystem;
/// Counters reported by one update pass.
pub use system::UpdateSummary;
