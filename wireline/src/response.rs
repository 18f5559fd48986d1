//! Response snapshot.
//!
//! Created when an attempt starts and filled in by the backend as bytes
//! arrive. Headers land in a pending queue on the worker side and are merged
//! into the visible map on the main thread, so user callbacks only ever see
//! main-thread state. The response keeps an immutable copy of the request
//! URL instead of a back-reference.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::warn;

use crate::headers::HeaderMap;

/// Response codes the transport reports before any real status arrives.
pub const RESPONSE_CODE_UNKNOWN: i32 = 0;

pub(crate) struct ResponseState {
    url: String,
    code: AtomicI64,
    content_length: AtomicU64,
    total_bytes_read: AtomicU64,
    body: Mutex<Vec<u8>>,
    /// Headers received by the worker, awaiting the main-thread merge.
    pub(crate) pending_headers: Mutex<VecDeque<(String, String)>>,
    pub(crate) headers: Mutex<HeaderMap>,
    ready: AtomicBool,
}

impl ResponseState {
    pub(crate) fn new(url: String) -> Arc<Self> {
        Arc::new(Self {
            url,
            code: AtomicI64::new(RESPONSE_CODE_UNKNOWN as i64),
            content_length: AtomicU64::new(0),
            total_bytes_read: AtomicU64::new(0),
            body: Mutex::new(Vec::new()),
            pending_headers: Mutex::new(VecDeque::new()),
            headers: Mutex::new(HeaderMap::new()),
            ready: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_code(&self, code: i32) {
        self.code.store(code as i64, Ordering::Release);
    }

    pub(crate) fn code(&self) -> i32 {
        self.code.load(Ordering::Acquire) as i32
    }

    pub(crate) fn set_content_length(&self, len: u64) {
        self.content_length.store(len, Ordering::Release);
    }

    pub(crate) fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read.load(Ordering::Acquire)
    }

    pub(crate) fn append_body(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.body.lock().unwrap().extend_from_slice(chunk);
        self.total_bytes_read
            .fetch_add(chunk.len() as u64, Ordering::AcqRel);
        crate::metrics::BYTES_RECEIVED.add(chunk.len() as u64);
    }

    pub(crate) fn push_header(&self, name: String, value: String) {
        if name.is_empty() || value.is_empty() {
            return;
        }
        if name == "Content-Length" {
            if let Ok(len) = value.trim().parse::<u64>() {
                self.set_content_length(len);
            }
        }
        self.pending_headers.lock().unwrap().push_back((name, value));
    }

    /// Last seen content length: the header value, transport metadata, or
    /// the byte count actually received, whichever arrived last.
    pub(crate) fn resolve_content_length(&self) {
        if self.content_length.load(Ordering::Acquire) == 0 {
            self.content_length
                .store(self.total_bytes_read(), Ordering::Release);
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Snapshot of a completed or in-progress response.
///
/// Cheap to clone; all accessors are safe from the main thread. Header and
/// content accessors warn while the response is still being received.
#[derive(Clone)]
pub struct HttpResponse {
    state: Arc<ResponseState>,
}

impl HttpResponse {
    pub(crate) fn from_state(state: Arc<ResponseState>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<ResponseState> {
        &self.state
    }

    /// URL of the originating request, after any domain failover.
    pub fn url(&self) -> &str {
        &self.state.url
    }

    /// Value of the URL query parameter `name`, percent-decoded.
    pub fn url_parameter(&self, name: &str) -> Option<String> {
        crate::url::url_parameter(&self.state.url, name)
    }

    /// HTTP status code. Zero or negative means no valid response was
    /// received.
    pub fn response_code(&self) -> i32 {
        self.state.code()
    }

    /// Value of `name`, once the response is ready.
    pub fn header(&self, name: &str) -> Option<String> {
        if !self.state.is_ready() {
            warn!(header = name, "response still processing; header not cached yet");
            return None;
        }
        self.state
            .headers
            .lock()
            .unwrap()
            .get(name)
            .map(str::to_owned)
    }

    /// Every header as `"Name: value"`, once the response is ready.
    pub fn all_headers(&self) -> Vec<String> {
        if !self.state.is_ready() {
            warn!("response still processing; headers not cached yet");
            return Vec::new();
        }
        self.state.headers.lock().unwrap().combined()
    }

    /// Header pairs in receive order, once the response is ready.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        if !self.state.is_ready() {
            return Vec::new();
        }
        self.state
            .headers
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
    }

    pub fn content_length(&self) -> u64 {
        self.state.content_length.load(Ordering::Acquire)
    }

    /// Body bytes received so far. Warns while the transfer is in progress.
    pub fn content(&self) -> Bytes {
        if !self.state.is_ready() {
            warn!("response payload is incomplete; still processing");
        }
        Bytes::copy_from_slice(&self.state.body.lock().unwrap())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn content_as_string(&self) -> String {
        String::from_utf8_lossy(&self.state.body.lock().unwrap()).into_owned()
    }

    /// True once the request reached a terminal status.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_accumulates_and_tracks_length() {
        let state = ResponseState::new("http://example/test".into());
        state.append_body(b"hel");
        state.append_body(b"lo");
        state.resolve_content_length();
        state.mark_ready();

        let resp = HttpResponse::from_state(state);
        assert_eq!(resp.content_as_string(), "hello");
        assert_eq!(resp.content_length(), 5);
        assert_eq!(resp.url(), "http://example/test");
    }

    #[test]
    fn content_length_header_wins_over_byte_count() {
        let state = ResponseState::new("http://example/test".into());
        state.push_header("Content-Length".into(), "42".into());
        state.append_body(b"partial");
        state.resolve_content_length();
        assert_eq!(state.content_length.load(Ordering::Acquire), 42);
    }

    #[test]
    fn headers_hidden_until_ready() {
        let state = ResponseState::new("http://example/test".into());
        state.headers.lock().unwrap().set("X-Test", "1");
        let resp = HttpResponse::from_state(state.clone());
        assert_eq!(resp.header("X-Test"), None);
        state.mark_ready();
        assert_eq!(resp.header("X-Test"), Some("1".into()));
    }
}
