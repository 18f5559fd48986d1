//! Request lifecycle metrics.
//!
//! Counters for submissions, completions, and transferred bytes. Exposed
//! through the metriken registry for whatever exposition the embedder runs.

use metriken::{metric, Counter, Gauge};

// ── Request lifecycle ────────────────────────────────────────────

#[metric(
    name = "wireline/requests/started",
    description = "Requests that entered Processing"
)]
pub static REQUESTS_STARTED: Counter = Counter::new();

#[metric(
    name = "wireline/requests/succeeded",
    description = "Requests that completed the HTTP transaction"
)]
pub static REQUESTS_SUCCEEDED: Counter = Counter::new();

#[metric(
    name = "wireline/requests/failed",
    description = "Requests that reached a failure status"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

#[metric(
    name = "wireline/requests/cancelled",
    description = "Requests cancelled by the caller or a flush"
)]
pub static REQUESTS_CANCELLED: Counter = Counter::new();

#[metric(
    name = "wireline/requests/abandoned",
    description = "Requests abandoned by a flush hard limit"
)]
pub static REQUESTS_ABANDONED: Counter = Counter::new();

#[metric(
    name = "wireline/requests/active",
    description = "Requests currently registered with the manager"
)]
pub static REQUESTS_ACTIVE: Gauge = Gauge::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(name = "wireline/bytes/sent", description = "Request body bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "wireline/bytes/received",
    description = "Response body bytes received"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();
