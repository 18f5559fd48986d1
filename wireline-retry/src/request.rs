//! The retry-wrapped request.
//!
//! Adapts a core [`HttpRequest`]: configuration calls pass straight
//! through, while `process`/`cancel` route through the [`RetrySystem`] so
//! attempts can be re-submitted after a lockout. The wrapper carries its
//! own event slots; per-attempt completions on the underlying request stay
//! internal and only the terminal outcome reaches the caller.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use wireline::payload::ContentStream;
use wireline::{url, HttpRequest, HttpResponse, RequestStatus};

use crate::domains::RetryDomains;
use crate::system::RetrySystem;

/// Status of the retry wrapper, orthogonal to the underlying request's
/// per-attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RetryStatus {
    NotStarted = 0,
    Processing,
    /// Cooling off between attempts.
    ProcessingLockout,
    Cancelled,
    /// Retry attempts exhausted.
    FailedRetry,
    /// The retry timeout relative to the first attempt elapsed.
    FailedTimeout,
    Succeeded,
}

impl RetryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetryStatus::Cancelled
                | RetryStatus::FailedRetry
                | RetryStatus::FailedTimeout
                | RetryStatus::Succeeded
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RetryStatus::Processing,
            2 => RetryStatus::ProcessingLockout,
            3 => RetryStatus::Cancelled,
            4 => RetryStatus::FailedRetry,
            5 => RetryStatus::FailedTimeout,
            6 => RetryStatus::Succeeded,
            _ => RetryStatus::NotStarted,
        }
    }
}

/// Per-request retry policy. Unset options fall back to the system
/// defaults.
#[derive(Default, Clone)]
pub struct RetryPolicy {
    /// Max retry count. Unset = system default; 0 = never retry.
    pub retry_limit: Option<u32>,
    /// Give up this many seconds after the first attempt started.
    pub retry_timeout: Option<f64>,
    /// Response codes that trigger a retry even when the attempt succeeded.
    pub retry_response_codes: HashSet<i32>,
    /// Verbs eligible for retry after a mid-stream failure. Empty means
    /// idempotent verbs only (GET, HEAD).
    pub retry_verbs: HashSet<String>,
    /// Interchangeable domains for connection-failure failover.
    pub retry_domains: Option<Arc<RetryDomains>>,
}

type CompleteFn = Box<dyn FnMut(&RetryRequest, Option<&HttpResponse>, bool) + Send>;
type ProgressFn = Box<dyn FnMut(&RetryRequest, u64, u64) + Send>;
type HeaderFn = Box<dyn FnMut(&RetryRequest, &str, &str) + Send>;
type WillRetryFn = Box<dyn FnMut(&RetryRequest, Option<&HttpResponse>, f64) + Send>;

#[derive(Default)]
struct RetryDelegates {
    complete: Option<CompleteFn>,
    progress: Option<ProgressFn>,
    header_received: Option<HeaderFn>,
    will_retry: Option<WillRetryFn>,
    generation: u64,
}

pub(crate) struct RetryShared {
    request: HttpRequest,
    status: AtomicU8,
    pub(crate) policy: RetryPolicy,
    /// This request's view of the shared active domain index.
    domain_index: AtomicUsize,
    /// URL before any failover rewrite.
    original_url: Mutex<String>,
    delegates: Mutex<RetryDelegates>,
    system: RetrySystem,
}

/// Shared handle to one retry-wrapped request.
#[derive(Clone)]
pub struct RetryRequest {
    inner: Arc<RetryShared>,
}

impl RetryRequest {
    pub(crate) fn new(system: RetrySystem, request: HttpRequest, mut policy: RetryPolicy) -> Self {
        debug_assert!(
            policy.retry_timeout.map_or(true, |t| t >= 0.0),
            "retry timeout must not be negative"
        );
        // An empty domain list takes the simpler non-failover path.
        if policy
            .retry_domains
            .as_ref()
            .is_some_and(|d| d.is_empty())
        {
            policy.retry_domains = None;
        }
        let domain_index = policy
            .retry_domains
            .as_ref()
            .map_or(0, |d| d.active_index());
        Self {
            inner: Arc::new(RetryShared {
                request,
                status: AtomicU8::new(RetryStatus::NotStarted as u8),
                policy,
                domain_index: AtomicUsize::new(domain_index),
                original_url: Mutex::new(String::new()),
                delegates: Mutex::new(RetryDelegates::default()),
                system,
            }),
        }
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// The wrapped request.
    pub fn http_request(&self) -> &HttpRequest {
        &self.inner.request
    }

    /// The retry policy this request was created with.
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub fn retry_status(&self) -> RetryStatus {
        RetryStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_retry_status(&self, status: RetryStatus) {
        self.inner.status.store(status as u8, Ordering::Release);
    }

    // ── Pass-through configuration ───────────────────────────────────

    pub fn set_verb(&self, verb: &str) {
        self.inner.request.set_verb(verb);
    }

    pub fn set_url(&self, url: &str) {
        self.inner.request.set_url(url);
    }

    pub fn set_header(&self, name: &str, value: &str) {
        self.inner.request.set_header(name, value);
    }

    pub fn append_to_header(&self, name: &str, value: &str) {
        self.inner.request.append_to_header(name, value);
    }

    pub fn set_content(&self, content: impl Into<Bytes>) {
        self.inner.request.set_content(content);
    }

    pub fn set_content_as_string(&self, content: &str) {
        self.inner.request.set_content_as_string(content);
    }

    pub fn set_content_as_streamed_file(&self, path: &Path) -> bool {
        self.inner.request.set_content_as_streamed_file(path)
    }

    pub fn set_content_from_stream(&self, stream: Box<dyn ContentStream>) -> bool {
        self.inner.request.set_content_from_stream(stream)
    }

    pub fn set_timeout(&self, seconds: f64) {
        self.inner.request.set_timeout(seconds);
    }

    pub fn clear_timeout(&self) {
        self.inner.request.clear_timeout();
    }

    pub fn verb(&self) -> String {
        self.inner.request.verb()
    }

    pub fn url(&self) -> String {
        self.inner.request.url()
    }

    pub fn status(&self) -> RequestStatus {
        self.inner.request.status()
    }

    pub fn response(&self) -> Option<HttpResponse> {
        self.inner.request.response()
    }

    pub fn elapsed_time(&self) -> f64 {
        self.inner.request.elapsed_time()
    }

    // ── Delegates ────────────────────────────────────────────────────

    /// Terminal completion: fires once, after retries are exhausted, the
    /// timeout elapses, the request is cancelled, or an attempt sticks.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnMut(&RetryRequest, Option<&HttpResponse>, bool) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.complete = Some(Box::new(f));
        d.generation += 1;
    }

    pub fn on_progress<F>(&self, f: F)
    where
        F: FnMut(&RetryRequest, u64, u64) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.progress = Some(Box::new(f));
        d.generation += 1;
    }

    /// Response headers of the final successful attempt, delivered just
    /// before completion.
    pub fn on_header_received<F>(&self, f: F)
    where
        F: FnMut(&RetryRequest, &str, &str) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.header_received = Some(Box::new(f));
        d.generation += 1;
    }

    /// Fired before a re-submit: `(request, response, lockout_seconds)`.
    pub fn on_will_retry<F>(&self, f: F)
    where
        F: FnMut(&RetryRequest, Option<&HttpResponse>, f64) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.will_retry = Some(Box::new(f));
        d.generation += 1;
    }

    pub(crate) fn fire_complete(&self, response: Option<&HttpResponse>, ok: bool) {
        let (cb, generation) = {
            let mut d = self.inner.delegates.lock().unwrap();
            (d.complete.take(), d.generation)
        };
        if let Some(mut cb) = cb {
            cb(self, response, ok);
            let mut d = self.inner.delegates.lock().unwrap();
            if d.generation == generation && d.complete.is_none() {
                d.complete = Some(cb);
            }
        }
    }

    fn fire_progress(&self, sent: u64, received: u64) {
        let (cb, generation) = {
            let mut d = self.inner.delegates.lock().unwrap();
            (d.progress.take(), d.generation)
        };
        if let Some(mut cb) = cb {
            cb(self, sent, received);
            let mut d = self.inner.delegates.lock().unwrap();
            if d.generation == generation && d.progress.is_none() {
                d.progress = Some(cb);
            }
        }
    }

    fn fire_header_received(&self, name: &str, value: &str) {
        let (cb, generation) = {
            let mut d = self.inner.delegates.lock().unwrap();
            (d.header_received.take(), d.generation)
        };
        if let Some(mut cb) = cb {
            cb(self, name, value);
            let mut d = self.inner.delegates.lock().unwrap();
            if d.generation == generation && d.header_received.is_none() {
                d.header_received = Some(cb);
            }
        }
    }

    pub(crate) fn fire_will_retry(&self, response: Option<&HttpResponse>, lockout: f64) {
        let (cb, generation) = {
            let mut d = self.inner.delegates.lock().unwrap();
            (d.will_retry.take(), d.generation)
        };
        if let Some(mut cb) = cb {
            cb(self, response, lockout);
            let mut d = self.inner.delegates.lock().unwrap();
            if d.generation == generation && d.will_retry.is_none() {
                d.will_retry = Some(cb);
            }
        }
    }

    /// Re-deliver the final response's headers through the wrapper's
    /// header delegate.
    pub(crate) fn broadcast_response_headers(&self) {
        let has_delegate = self.inner.delegates.lock().unwrap().header_received.is_some();
        if !has_delegate {
            return;
        }
        let Some(response) = self.inner.request.response() else {
            return;
        };
        for (name, value) in response.header_pairs() {
            self.fire_header_received(&name, &value);
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Submit the first attempt through the retry system.
    pub fn process(&self) -> bool {
        *self.inner.original_url.lock().unwrap() = self.inner.request.url();
        if self.inner.policy.retry_domains.is_some() {
            self.set_url_from_retry_domains();
        }

        // Progress passthrough for every attempt. Weak so the binding does
        // not keep the wrapper alive through the core request.
        let weak = Arc::downgrade(&self.inner);
        self.inner.request.on_progress(move |_request, sent, received| {
            if let Some(shared) = weak.upgrade() {
                RetryRequest { inner: shared }.fire_progress(sent, received);
            }
        });

        self.inner.system.process_request(self)
    }

    /// Cancel through the retry system; the entry finalizes as `Cancelled`
    /// on the next update.
    pub fn cancel(&self) {
        self.inner.system.cancel_request(self);
    }

    /// Rewrite the URL's authority to the active failover domain.
    fn set_url_from_retry_domains(&self) {
        let Some(domains) = &self.inner.policy.retry_domains else {
            return;
        };
        let original = self.inner.original_url.lock().unwrap().clone();
        let authority = url::domain_and_port(&original);
        if authority.is_empty() {
            return;
        }
        let index = self.inner.domain_index.load(Ordering::Acquire);
        let rewritten = original.replace(authority, &domains.domains()[index]);
        self.inner.request.set_url(&rewritten);
    }

    /// Advance to the next failover domain (or adopt the one another
    /// request already advanced to) and rewrite the URL.
    pub(crate) fn move_to_next_retry_domain(&self) {
        let Some(domains) = &self.inner.policy.retry_domains else {
            return;
        };
        let observed = self.inner.domain_index.load(Ordering::Acquire);
        let current = domains.advance(observed);
        self.inner.domain_index.store(current, Ordering::Release);
        self.set_url_from_retry_domains();
    }
}
