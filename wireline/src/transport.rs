//! Backend capability traits.
//!
//! A backend implements [`Transport`] for the per-request transfer object
//! and [`TransportFactory`] to construct one per attempt. The worker drives
//! transports through these traits only; everything a transport needs from
//! the request arrives through [`TransportCtx`], and everything it produces
//! flows back through [`ResponseSink`]. Backends never touch request or
//! manager internals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::headers::HeaderMap;
use crate::payload::Payload;
use crate::response::ResponseState;

/// Transport-level classification of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    /// Still transferring.
    InFlight,
    /// The HTTP transaction completed; the response code says the rest.
    Completed,
    /// DNS, connect, or proxy failure before any exchange. Safe to retry.
    ConnectionError,
    /// Read or write failure after the exchange may have started.
    Failed,
}

/// Frozen request fields for one attempt.
pub struct AttemptSpec {
    pub verb: String,
    pub url: String,
    pub headers: HeaderMap,
    pub content_length: u64,
}

/// Shared counters the transport feeds while transferring.
pub(crate) struct TransferCounters {
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) total_bytes_sent: AtomicU64,
    pub(crate) activity: AtomicBool,
    /// One payload rewind left for this attempt.
    pub(crate) rewind_allowed: AtomicBool,
}

impl TransferCounters {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes_sent: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            activity: AtomicBool::new(false),
            rewind_allowed: AtomicBool::new(false),
        })
    }

    pub(crate) fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Release);
        self.total_bytes_sent.store(0, Ordering::Release);
        self.activity.store(false, Ordering::Release);
        self.rewind_allowed.store(false, Ordering::Release);
    }
}

/// Where a transport publishes response data and activity.
///
/// Headers and body bytes go into the response snapshot; every call also
/// counts as transport-level activity for the inactivity timeout.
pub struct ResponseSink {
    response: Arc<ResponseState>,
    counters: Arc<TransferCounters>,
}

impl ResponseSink {
    pub(crate) fn new(response: Arc<ResponseState>, counters: Arc<TransferCounters>) -> Self {
        Self { response, counters }
    }

    pub(crate) fn counters(&self) -> &TransferCounters {
        &self.counters
    }

    /// Record the HTTP status code.
    pub fn set_response_code(&self, code: i32) {
        self.response.set_code(code);
        self.mark_activity();
    }

    /// Queue one response header for main-thread delivery.
    pub fn push_header(&self, name: &str, value: &str) {
        self.response.push_header(name.to_owned(), value.to_owned());
        self.mark_activity();
    }

    /// Append received body bytes.
    pub fn append_body(&self, chunk: &[u8]) {
        self.response.append_body(chunk);
        self.mark_activity();
    }

    /// Record the content length reported by transport metadata.
    pub fn set_content_length(&self, len: u64) {
        self.response.set_content_length(len);
    }

    /// Record `n` request body bytes as sent.
    pub fn add_bytes_sent(&self, n: u64) {
        self.counters.bytes_sent.fetch_add(n, Ordering::AcqRel);
        self.counters.total_bytes_sent.fetch_add(n, Ordering::AcqRel);
        crate::metrics::BYTES_SENT.add(n);
        self.mark_activity();
    }

    /// Note transport-level activity without any payload: handshakes,
    /// keep-alives, informational responses.
    pub fn mark_activity(&self) {
        self.counters.activity.store(true, Ordering::Release);
    }
}

/// The request as a transport sees it.
pub struct TransportCtx<'a> {
    pub(crate) spec: &'a AttemptSpec,
    pub(crate) payload: &'a Mutex<Payload>,
    pub(crate) sink: &'a ResponseSink,
}

impl TransportCtx<'_> {
    pub fn url(&self) -> &str {
        &self.spec.url
    }

    pub fn verb(&self) -> &str {
        &self.spec.verb
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.spec.headers
    }

    pub fn content_length(&self) -> u64 {
        self.spec.content_length
    }

    /// Read the next slice of request body into `dst`, starting at offset
    /// `already_sent`. Bytes written are counted as sent.
    pub fn fill_output_buffer(&self, dst: &mut [u8], already_sent: u64) -> usize {
        let n = self
            .payload
            .lock()
            .unwrap()
            .fill_output_buffer(dst, already_sent);
        if n > 0 {
            self.sink.add_bytes_sent(n as u64);
        }
        n
    }

    /// Restart the upload from the beginning (redirect or early close).
    ///
    /// Allowed exactly once per attempt, and only for seekable payloads;
    /// returns false when the transport must fail the request instead.
    pub fn rewind_payload(&self) -> bool {
        if self
            .sink
            .counters()
            .rewind_allowed
            .swap(false, Ordering::AcqRel)
        {
            let sent = self.sink.counters().bytes_sent.swap(0, Ordering::AcqRel);
            tracing::debug!(bytes_uploaded = sent, "payload rewound to the beginning");
            true
        } else {
            tracing::warn!("payload rewind rejected");
            false
        }
    }

    pub fn sink(&self) -> &ResponseSink {
        self.sink
    }
}

/// One on-wire transfer, driven by the I/O worker.
pub trait Transport: Send {
    /// Begin the transfer. Returning false fails the attempt immediately.
    fn start(&mut self, ctx: &TransportCtx<'_>) -> bool;

    /// Advance the transfer by `dt` seconds of wall clock.
    fn tick(&mut self, ctx: &TransportCtx<'_>, dt: f64);

    /// Whether transport-level work is done (successfully or not).
    fn is_complete(&self) -> bool;

    /// Classification of the transfer once complete.
    fn outcome(&self) -> TransportOutcome;

    /// Abort the transfer. Called on the worker thread.
    fn cancel(&mut self) {}

    /// Release transport resources. Called exactly once, after completion
    /// or cancellation, before the request is handed back to the main
    /// thread.
    fn release(&mut self) {}
}

/// Constructs transports and observes worker passes.
pub trait TransportFactory: Send + Sync {
    /// Create the transport for one attempt. `None` fails the attempt at
    /// start (treated as a connection-level failure).
    fn create_transport(&self, spec: &AttemptSpec) -> Option<Box<dyn Transport>>;

    /// Called once per worker pass, after running transports have been
    /// ticked. Backends that aggregate transfers (multi-handle style) poll
    /// here.
    fn tick_worker(&self, _dt: f64) {}
}
