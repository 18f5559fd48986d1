//! The request object and its state machine.
//!
//! A request is configured on the main thread, submitted with
//! [`HttpRequest::process`], and driven either by the I/O worker (threaded
//! backends) or by the manager's per-frame tick (the null backend). All
//! user-visible callbacks fire on the main thread; worker-side state crosses
//! over through atomics and the response's pending-header queue.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Error;
use crate::headers::HeaderMap;
use crate::module::ModuleCore;
use crate::payload::{ContentStream, FileStream, Payload};
use crate::response::{HttpResponse, ResponseState};
use crate::transport::{
    AttemptSpec, ResponseSink, Transport, TransferCounters, TransportCtx, TransportOutcome,
};
use crate::{metrics, url};

/// Observable request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestStatus {
    NotStarted = 0,
    Processing,
    /// The transport failed to connect at all. Safe to retry.
    FailedConnectionError,
    Failed,
    Succeeded,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::FailedConnectionError | RequestStatus::Failed | RequestStatus::Succeeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::NotStarted => "NotStarted",
            RequestStatus::Processing => "Processing",
            RequestStatus::FailedConnectionError => "Failed_ConnectionError",
            RequestStatus::Failed => "Failed",
            RequestStatus::Succeeded => "Succeeded",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RequestStatus::Processing,
            2 => RequestStatus::FailedConnectionError,
            3 => RequestStatus::Failed,
            4 => RequestStatus::Succeeded,
            _ => RequestStatus::NotStarted,
        }
    }
}

pub(crate) fn default_user_agent() -> String {
    format!("wireline/{}", env!("CARGO_PKG_VERSION"))
}

type CompleteFn = Box<dyn FnMut(&HttpRequest, Option<&HttpResponse>, bool) + Send>;
type ProgressFn = Box<dyn FnMut(&HttpRequest, u64, u64) + Send>;
type HeaderFn = Box<dyn FnMut(&HttpRequest, &str, &str) + Send>;

#[derive(Default)]
struct Delegates {
    complete: Option<CompleteFn>,
    progress: Option<ProgressFn>,
    header_received: Option<HeaderFn>,
    /// Bumped by every bind/unbind so an in-flight callback that rebound or
    /// cleared a slot is not clobbered when the taken closure is restored.
    generation: u64,
}

/// Mutable configuration, frozen while the request is `Processing`.
struct RequestConfig {
    verb: String,
    url: String,
    headers: HeaderMap,
    timeout: Option<f64>,
}

/// Per-attempt transfer state. Owned by the worker while the request is in
/// flight; the main thread only reads elapsed time from it.
struct TransferState {
    transport: Option<Box<dyn Transport>>,
    spec: Option<Arc<AttemptSpec>>,
    sink: Option<ResponseSink>,
    /// Handed to the worker (vs driven inline by the manager tick).
    threaded: bool,
    elapsed: f64,
    time_since_activity: f64,
    start_failed: bool,
    timed_out: bool,
    final_outcome: TransportOutcome,
}

impl TransferState {
    fn reset(&mut self) {
        self.transport = None;
        self.spec = None;
        self.sink = None;
        self.threaded = false;
        self.elapsed = 0.0;
        self.time_since_activity = 0.0;
        self.start_failed = false;
        self.timed_out = false;
        self.final_outcome = TransportOutcome::InFlight;
    }
}

pub(crate) struct RequestInner {
    core: Arc<ModuleCore>,
    status: AtomicU8,
    canceled: AtomicBool,
    /// One completion owed: set per submit (accepted or rejected), consumed
    /// by `finish`.
    completion_pending: AtomicBool,
    config: Mutex<RequestConfig>,
    payload: Mutex<Payload>,
    counters: Arc<TransferCounters>,
    last_reported_sent: Mutex<(u64, u64)>,
    transfer: Mutex<TransferState>,
    response: Mutex<Option<Arc<ResponseState>>>,
    delegates: Mutex<Delegates>,
}

/// Shared handle to one HTTP request.
///
/// Clones share the same request; the manager, the worker, and the
/// completion marshaller all hold one while the request is alive.
#[derive(Clone)]
pub struct HttpRequest {
    inner: Arc<RequestInner>,
}

impl HttpRequest {
    pub(crate) fn new(core: Arc<ModuleCore>) -> Self {
        let default_headers = core.default_headers.read().unwrap().clone();
        Self {
            inner: Arc::new(RequestInner {
                core,
                status: AtomicU8::new(RequestStatus::NotStarted as u8),
                canceled: AtomicBool::new(false),
                completion_pending: AtomicBool::new(false),
                config: Mutex::new(RequestConfig {
                    verb: String::new(),
                    url: String::new(),
                    headers: default_headers,
                    timeout: None,
                }),
                payload: Mutex::new(Payload::default()),
                counters: TransferCounters::new(),
                last_reported_sent: Mutex::new((0, 0)),
                transfer: Mutex::new(TransferState {
                    transport: None,
                    spec: None,
                    sink: None,
                    threaded: false,
                    elapsed: 0.0,
                    time_since_activity: 0.0,
                    start_failed: false,
                    timed_out: false,
                    final_outcome: TransportOutcome::InFlight,
                }),
                response: Mutex::new(None),
                delegates: Mutex::new(Delegates::default()),
            }),
        }
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    // ── Configuration ────────────────────────────────────────────────

    /// True when configuration may still be mutated; warns otherwise.
    fn guard_mutable(&self, op: &str) -> bool {
        if self.status() == RequestStatus::Processing {
            warn!(op, "attempted to mutate a request that is in flight");
            false
        } else {
            true
        }
    }

    /// Set the verb. Stored uppercased; defaults to GET at submit.
    pub fn set_verb(&self, verb: &str) {
        if !self.guard_mutable("set_verb") {
            return;
        }
        self.inner.config.lock().unwrap().verb = verb.to_ascii_uppercase();
    }

    pub fn set_url(&self, url: &str) {
        if !self.guard_mutable("set_url") {
            return;
        }
        self.inner.config.lock().unwrap().url = url.to_owned();
    }

    pub fn set_header(&self, name: &str, value: &str) {
        if !self.guard_mutable("set_header") {
            return;
        }
        self.inner.config.lock().unwrap().headers.set(name, value);
    }

    /// Fold `value` into an existing header with a `", "` separator.
    pub fn append_to_header(&self, name: &str, value: &str) {
        if !self.guard_mutable("append_to_header") {
            return;
        }
        self.inner.config.lock().unwrap().headers.append(name, value);
    }

    pub fn set_content(&self, content: impl Into<Bytes>) {
        if !self.guard_mutable("set_content") {
            return;
        }
        *self.inner.payload.lock().unwrap() = Payload::Memory(content.into());
    }

    pub fn set_content_as_string(&self, content: &str) {
        if !self.guard_mutable("set_content_as_string") {
            return;
        }
        *self.inner.payload.lock().unwrap() =
            Payload::Memory(Bytes::copy_from_slice(content.as_bytes()));
    }

    /// Stream the request body from a file. Returns false (and clears the
    /// payload) when the file cannot be opened.
    pub fn set_content_as_streamed_file(&self, path: &Path) -> bool {
        if !self.guard_mutable("set_content_as_streamed_file") {
            return false;
        }
        match FileStream::open(path) {
            Ok(stream) => {
                *self.inner.payload.lock().unwrap() = Payload::from_stream(Box::new(stream));
                true
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to open file for streaming");
                *self.inner.payload.lock().unwrap() = Payload::default();
                false
            }
        }
    }

    /// Stream the request body from an arbitrary source.
    pub fn set_content_from_stream(&self, stream: Box<dyn ContentStream>) -> bool {
        if !self.guard_mutable("set_content_from_stream") {
            return false;
        }
        *self.inner.payload.lock().unwrap() = Payload::from_stream(stream);
        true
    }

    /// Per-request timeout in seconds, overriding the configured default.
    pub fn set_timeout(&self, seconds: f64) {
        if !self.guard_mutable("set_timeout") {
            return;
        }
        self.inner.config.lock().unwrap().timeout = Some(seconds);
    }

    pub fn clear_timeout(&self) {
        if !self.guard_mutable("clear_timeout") {
            return;
        }
        self.inner.config.lock().unwrap().timeout = None;
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn verb(&self) -> String {
        self.inner.config.lock().unwrap().verb.clone()
    }

    pub fn url(&self) -> String {
        self.inner.config.lock().unwrap().url.clone()
    }

    /// Value of the URL query parameter `name`, percent-decoded.
    pub fn url_parameter(&self, name: &str) -> Option<String> {
        url::url_parameter(&self.url(), name)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner
            .config
            .lock()
            .unwrap()
            .headers
            .get(name)
            .map(str::to_owned)
    }

    /// Every request header as `"Name: value"`.
    pub fn all_headers(&self) -> Vec<String> {
        self.inner.config.lock().unwrap().headers.combined()
    }

    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
    }

    pub fn content_length(&self) -> u64 {
        self.inner.payload.lock().unwrap().content_length()
    }

    /// In-memory request body. Empty for streamed payloads.
    pub fn content(&self) -> Bytes {
        Bytes::copy_from_slice(self.inner.payload.lock().unwrap().as_bytes())
    }

    pub fn timeout(&self) -> Option<f64> {
        self.inner.config.lock().unwrap().timeout
    }

    /// The per-request timeout, or the configured module-wide default.
    pub fn timeout_or_default(&self) -> f64 {
        self.timeout()
            .unwrap_or_else(|| self.inner.core.config.read().unwrap().http_timeout)
    }

    pub fn status(&self) -> RequestStatus {
        RequestStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Response snapshot; partial until the request reaches a terminal
    /// status, and cleared again on failure.
    pub fn response(&self) -> Option<HttpResponse> {
        self.inner
            .response
            .lock()
            .unwrap()
            .clone()
            .map(HttpResponse::from_state)
    }

    /// Seconds since `process` was called; frozen once terminal.
    pub fn elapsed_time(&self) -> f64 {
        self.inner.transfer.lock().unwrap().elapsed
    }

    // ── Delegates ────────────────────────────────────────────────────

    /// Completion callback: `(request, response, ok)`. Fires exactly once
    /// per `process` call, on the main thread.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnMut(&HttpRequest, Option<&HttpResponse>, bool) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.complete = Some(Box::new(f));
        d.generation += 1;
    }

    /// Progress callback: `(request, bytes_sent, bytes_received)`.
    pub fn on_progress<F>(&self, f: F)
    where
        F: FnMut(&HttpRequest, u64, u64) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.progress = Some(Box::new(f));
        d.generation += 1;
    }

    /// Per-header callback, fired as response headers arrive.
    pub fn on_header_received<F>(&self, f: F)
    where
        F: FnMut(&HttpRequest, &str, &str) + Send + 'static,
    {
        let mut d = self.inner.delegates.lock().unwrap();
        d.header_received = Some(Box::new(f));
        d.generation += 1;
    }

    /// Unbind every delegate. Used by the shutdown flush so callbacks never
    /// run into torn-down state.
    pub fn clear_delegates(&self) {
        let mut d = self.inner.delegates.lock().unwrap();
        d.complete = None;
        d.progress = None;
        d.header_received = None;
        d.generation += 1;
    }

    fn fire_complete(&self, response: Option<&HttpResponse>, ok: bool) {
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

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Submit one attempt.
    ///
    /// Returns false when the submit is rejected (HTTP disabled, empty URL,
    /// disallowed domain, attempt still in flight); the request still
    /// reaches `Failed` through a scheduled main-thread task and fires its
    /// completion callback with `ok = false`.
    pub fn process(&self) -> bool {
        if let Err(err) = self.setup_request() {
            warn!(url = %self.url(), %err, "cannot process request");
            // Rejecting an overlapping submit leaves the in-flight attempt
            // untouched; every other rejection owes a completion.
            if !matches!(err, Error::AlreadyProcessing) {
                self.reject_submit();
            }
            return false;
        }

        // A re-used request may point at a stale response until the new
        // attempt starts.
        *self.inner.response.lock().unwrap() = None;
        self.inner.canceled.store(false, Ordering::Release);
        self.inner.counters.reset();
        *self.inner.last_reported_sent.lock().unwrap() = (0, 0);
        let use_null = {
            let config = self.inner.core.config.read().unwrap();
            config.use_null_http
        };
        let threaded = !use_null && self.inner.core.manager.has_worker();
        {
            let mut t = self.inner.transfer.lock().unwrap();
            t.reset();
            t.threaded = threaded;
        }

        self.inner
            .status
            .store(RequestStatus::Processing as u8, Ordering::Release);
        self.inner.completion_pending.store(true, Ordering::Release);
        metrics::REQUESTS_STARTED.increment();

        let registered = if threaded {
            self.inner.core.manager.add_threaded_request(self)
        } else {
            self.inner.core.manager.add_request(self)
        };
        if let Err(err) = registered {
            warn!(url = %self.url(), %err, "cannot register request");
            self.schedule_finish();
            return false;
        }

        debug!(verb = %self.verb(), url = %self.url(), threaded, "start request");
        true
    }

    /// A rejected submit still reaches `Failed` on the main thread and
    /// fires its completion with no response.
    fn reject_submit(&self) {
        *self.inner.response.lock().unwrap() = None;
        self.inner.canceled.store(false, Ordering::Release);
        self.inner.transfer.lock().unwrap().reset();
        self.inner.completion_pending.store(true, Ordering::Release);
        self.schedule_finish();
    }

    /// Game-thread submit validation plus the default header policy.
    fn setup_request(&self) -> Result<(), Error> {
        let core = &self.inner.core;
        let config = core.config.read().unwrap();
        let mut rc = self.inner.config.lock().unwrap();

        if !crate::manager::domain_allowed(&config, &rc.url) {
            return Err(Error::DomainNotAllowed(url::domain(&rc.url).to_owned()));
        }
        if !config.enable_http {
            return Err(Error::Disabled);
        }
        if self.status() == RequestStatus::Processing {
            return Err(Error::AlreadyProcessing);
        }
        if rc.url.is_empty() {
            return Err(Error::EmptyUrl);
        }

        if rc.verb.is_empty() {
            rc.verb = "GET".to_owned();
        }

        if rc.headers.get("User-Agent").map_or(true, str::is_empty) {
            rc.headers.set("User-Agent", default_user_agent());
        }

        let (content_length, url_encoded) = {
            let payload = self.inner.payload.lock().unwrap();
            (payload.content_length(), payload.is_url_encoded())
        };
        // Content-Length should be present even for empty bodies.
        if rc.headers.get("Content-Length").map_or(true, str::is_empty) {
            rc.headers.set("Content-Length", content_length.to_string());
        }
        // Blank Expect so transports do not send "Expect: 100-continue",
        // which misbehaves behind some load balancers.
        if rc.headers.get("Expect").is_none() {
            rc.headers.set("Expect", "");
        }

        // Bodied verbs with a payload that is not URL encoded must say what
        // they are sending.
        if matches!(rc.verb.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
            let has_content_type = rc.headers.get("Content-Type").is_some_and(|v| !v.is_empty());
            if !has_content_type && !url_encoded {
                return Err(Error::MissingContentType(rc.verb.clone()));
            }
        }

        Ok(())
    }

    /// Cancel the request. Idempotent; safe from any thread. The request
    /// always reaches `Failed` and fires its completion exactly once.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        metrics::REQUESTS_CANCELLED.increment();
        debug!(url = %self.url(), "request cancelled");

        let threaded = self.inner.transfer.lock().unwrap().threaded;
        let manager = &self.inner.core.manager;
        if threaded && manager.is_valid_request(self) {
            manager.cancel_threaded_request(self);
        } else if !manager.is_main_thread() {
            let request = self.clone();
            manager.add_main_thread_task(Box::new(move || request.finish()));
        } else {
            self.finish();
        }
    }

    /// Per-frame main-thread tick: marshal progress and header events, and
    /// drive the wall-clock timeout for requests without a worker.
    pub fn tick(&self, dt: f64) {
        // Headers first: header events precede progress for the same chunk.
        self.broadcast_new_headers();
        self.check_progress();

        let inline = !self.inner.transfer.lock().unwrap().threaded;
        if inline && self.status() == RequestStatus::Processing {
            let timeout = self.timeout_or_default();
            let expired = {
                let mut t = self.inner.transfer.lock().unwrap();
                t.elapsed += dt;
                let expired = timeout > 0.0 && t.elapsed >= timeout;
                if expired {
                    t.timed_out = true;
                }
                expired
            };
            if expired {
                warn!(url = %self.url(), elapsed = self.elapsed_time(), "request timed out");
                self.finish();
            }
        }
    }

    fn schedule_finish(&self) {
        let manager = &self.inner.core.manager;
        if manager.is_main_thread() {
            self.finish();
        } else {
            let request = self.clone();
            manager.add_main_thread_task(Box::new(move || request.finish()));
        }
    }

    /// Fire the progress delegate when counters moved since the last tick.
    fn check_progress(&self) {
        if self.status() != RequestStatus::Processing {
            return;
        }
        let sent = self.inner.counters.bytes_sent.load(Ordering::Acquire);
        let received = self
            .inner
            .response
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |r| r.total_bytes_read());
        let changed = {
            let mut last = self.inner.last_reported_sent.lock().unwrap();
            if *last != (sent, received) {
                *last = (sent, received);
                true
            } else {
                false
            }
        };
        if changed {
            self.fire_progress(sent, received);
        }
    }

    /// Merge headers received on the worker into the visible map and fire
    /// the per-header delegate. Main thread only.
    fn broadcast_new_headers(&self) {
        let Some(state) = self.inner.response.lock().unwrap().clone() else {
            return;
        };
        loop {
            let next = state.pending_headers.lock().unwrap().pop_front();
            let Some((name, value)) = next else {
                break;
            };
            state.headers.lock().unwrap().append(&name, &value);
            self.fire_header_received(&name, &value);
        }
    }

    /// Finalize on the main thread: classify the outcome, surface the last
    /// progress and headers, fire the completion delegate once, and remove
    /// the request from the manager.
    pub(crate) fn finish(&self) {
        let pending = self.inner.completion_pending.swap(false, Ordering::AcqRel);
        // A cancel before the first submit still owes its completion; a
        // finish after the completion was delivered owes nothing.
        if !pending && self.status() != RequestStatus::NotStarted {
            return;
        }

        self.broadcast_new_headers();
        self.check_progress();

        let (outcome, timed_out, start_failed, elapsed) = {
            let t = self.inner.transfer.lock().unwrap();
            (t.final_outcome, t.timed_out, t.start_failed, t.elapsed)
        };
        let canceled = self.inner.canceled.load(Ordering::Acquire);
        let state = self.inner.response.lock().unwrap().clone();
        if let Some(state) = &state {
            state.resolve_content_length();
            state.mark_ready();
        }
        let response = state.map(HttpResponse::from_state);

        let mut success = outcome == TransportOutcome::Completed;
        if success {
            if let Some(resp) = &response {
                if resp.response_code() <= 0 && url::is_http_scheme(resp.url()) {
                    warn!(
                        url = %resp.url(),
                        code = resp.response_code(),
                        "invalid response code received"
                    );
                    success = false;
                }
            }
        }

        let status = if success {
            RequestStatus::Succeeded
        } else if canceled || timed_out {
            RequestStatus::Failed
        } else {
            match outcome {
                TransportOutcome::ConnectionError => RequestStatus::FailedConnectionError,
                TransportOutcome::InFlight if start_failed => RequestStatus::FailedConnectionError,
                _ => RequestStatus::Failed,
            }
        };

        if success {
            debug!(
                url = %self.url(),
                code = response.as_ref().map_or(0, |r| r.response_code()),
                elapsed,
                "request completed"
            );
            metrics::REQUESTS_SUCCEEDED.increment();
        } else {
            warn!(
                url = %self.url(),
                status = status.as_str(),
                elapsed,
                canceled,
                timed_out,
                "request finished without success"
            );
            metrics::REQUESTS_FAILED.increment();
        }

        self.inner.status.store(status as u8, Ordering::Release);
        self.inner.core.manager.remove_request(self);

        self.fire_complete(response.as_ref(), success);

        // The delegate needed the partial response; afterwards a failed
        // request reads as having none.
        if !success {
            *self.inner.response.lock().unwrap() = None;
        }
    }

    // ── Worker-side driving ──────────────────────────────────────────

    /// Begin the threaded attempt: build the frozen attempt spec, the
    /// response, and the transport. Returning false completes the request
    /// immediately.
    pub(crate) fn start_threaded(&self) -> bool {
        let (content_length, seekable) = {
            let payload = self.inner.payload.lock().unwrap();
            (payload.content_length(), payload.is_seekable())
        };
        let spec = {
            let rc = self.inner.config.lock().unwrap();
            Arc::new(AttemptSpec {
                verb: rc.verb.clone(),
                url: rc.url.clone(),
                headers: rc.headers.clone(),
                content_length,
            })
        };
        let state = ResponseState::new(spec.url.clone());
        *self.inner.response.lock().unwrap() = Some(state.clone());
        let sink = ResponseSink::new(state, self.inner.counters.clone());
        let allow_seek = self.inner.core.config.read().unwrap().allow_seek_function;
        self.inner
            .counters
            .rewind_allowed
            .store(seekable && allow_seek, Ordering::Release);
        let factory = self.inner.core.factory.read().unwrap().clone();

        let mut t = self.inner.transfer.lock().unwrap();
        t.elapsed = 0.0;
        t.time_since_activity = 0.0;

        let transport = factory.and_then(|f| f.create_transport(&spec));
        match transport {
            Some(mut transport) => {
                let ctx = TransportCtx {
                    spec: &*spec,
                    payload: &self.inner.payload,
                    sink: &sink,
                };
                if transport.start(&ctx) {
                    t.transport = Some(transport);
                    t.spec = Some(spec);
                    t.sink = Some(sink);
                    true
                } else {
                    t.start_failed = true;
                    false
                }
            }
            None => {
                warn!(url = %spec.url, "no transport available for request");
                t.start_failed = true;
                false
            }
        }
    }

    /// Advance the transfer by `dt` seconds. Worker thread only.
    pub(crate) fn tick_threaded(&self, dt: f64) {
        let mut t = self.inner.transfer.lock().unwrap();
        t.elapsed += dt;
        let TransferState {
            transport,
            spec,
            sink,
            ..
        } = &mut *t;
        if let (Some(transport), Some(spec), Some(sink)) =
            (transport.as_mut(), spec.as_ref(), sink.as_ref())
        {
            let ctx = TransportCtx {
                spec: &**spec,
                payload: &self.inner.payload,
                sink,
            };
            transport.tick(&ctx, dt);
        }
        // Activity flagged by the sink during this pass resets the
        // inactivity clock.
        if self.inner.counters.activity.swap(false, Ordering::AcqRel) {
            t.time_since_activity = 0.0;
        } else {
            t.time_since_activity += dt;
        }
    }

    /// Whether transport-level work is done. Worker thread only.
    pub(crate) fn is_threaded_complete(&self) -> bool {
        if self.inner.canceled.load(Ordering::Acquire) {
            return true;
        }
        let (delay_time, no_timeouts) = {
            let config = self.inner.core.config.read().unwrap();
            (config.delay_time, config.no_timeouts)
        };
        let timeout = self.timeout_or_default();
        let url = self.url();

        let mut t = self.inner.transfer.lock().unwrap();
        if t.start_failed {
            return true;
        }
        if let Some(transport) = &t.transport {
            if transport.is_complete() && t.elapsed >= delay_time {
                t.final_outcome = transport.outcome();
                return true;
            }
        }
        if !no_timeouts && timeout > 0.0 && t.time_since_activity >= timeout {
            warn!(
                url = %url,
                seconds = t.time_since_activity,
                "request timed out"
            );
            t.timed_out = true;
            return true;
        }
        false
    }

    /// Signal the transport to abort. Worker thread only.
    pub(crate) fn cancel_transport(&self) {
        let mut t = self.inner.transfer.lock().unwrap();
        if let Some(transport) = t.transport.as_mut() {
            transport.cancel();
        }
    }

    /// Tear down the transport after completion or cancellation. Worker
    /// thread only; called exactly once per attempt.
    pub(crate) fn release_transport(&self) {
        let mut t = self.inner.transfer.lock().unwrap();
        if let Some(mut transport) = t.transport.take() {
            if t.final_outcome == TransportOutcome::InFlight {
                t.final_outcome = transport.outcome();
            }
            transport.release();
        }
        t.spec = None;
        t.sink = None;
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("verb", &self.verb())
            .field("url", &self.url())
            .field("status", &self.status())
            .finish()
    }
}
