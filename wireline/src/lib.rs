//! wireline — asynchronous HTTP request orchestration for engine runtimes.
//!
//! wireline owns the request lifecycle between an application's main loop
//! and whatever native transport actually moves bytes: requests are
//! configured and submitted on the main thread, driven by a dedicated I/O
//! worker, and completed back on the main thread so user callbacks never
//! race the frame. Transports are capability objects behind the
//! [`Transport`] trait; the crate itself performs no on-wire I/O.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wireline::{HttpConfig, HttpModule};
//!
//! let module = HttpModule::init(HttpConfig::default())?;
//!
//! let request = module.create_request();
//! request.set_url("https://example.com/data");
//! request.on_complete(|_req, response, ok| {
//!     if let (true, Some(response)) = (ok, response) {
//!         println!("{} -> {}", response.url(), response.response_code());
//!     }
//! });
//! request.process();
//!
//! // Engine main loop:
//! loop {
//!     module.manager().tick(1.0 / 60.0);
//!     # break;
//! }
//! # Ok::<(), wireline::Error>(())
//! ```
//!
//! # Threads
//!
//! The main thread owns the registry, per-frame ticking, and every
//! user-visible callback. The worker thread owns the running transports and
//! publishes completions through a queue. `process` and `cancel` are safe
//! from any thread; observable state transitions happen main-thread-side.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod worker;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod console;
pub mod error;
pub mod headers;
pub mod manager;
pub mod metrics;
pub mod module;
pub mod payload;
pub mod request;
pub mod response;
pub mod switches;
pub mod transport;
pub mod url;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Runtime configuration.
pub use config::HttpConfig;
/// Builder for [`HttpConfig`] with discoverable methods and `build()` validation.
pub use config::HttpConfigBuilder;
/// Why a blocking flush was requested.
pub use config::FlushReason;
/// Soft/hard time limits for one flush reason.
pub use config::FlushTimeLimit;
/// I/O worker threading mode.
pub use config::WorkerMode;
/// Core errors.
pub use error::Error;
/// Case-preserving header map with `", "` append folding.
pub use headers::HeaderMap;
/// Process-wide request owner: registry, tick, flush, allow-list.
pub use manager::HttpManager;
/// The module handle: configuration, request construction, lifecycle.
pub use module::HttpModule;
/// Streaming request body source.
pub use payload::ContentStream;
/// Streaming body from a file on disk.
pub use payload::FileStream;
/// Request body: in-memory bytes or a stream.
pub use payload::Payload;
/// One HTTP request and its state machine.
pub use request::HttpRequest;
/// Observable request status.
pub use request::RequestStatus;
/// Response snapshot.
pub use response::HttpResponse;
/// Command-line switch parsing.
pub use switches::Switches;
/// Frozen request fields for one attempt.
pub use transport::AttemptSpec;
/// Where a transport publishes response data and activity.
pub use transport::ResponseSink;
/// One on-wire transfer, driven by the I/O worker.
pub use transport::Transport;
/// Per-request transport construction plus the worker's per-pass hook.
pub use transport::TransportFactory;
/// Request view handed to transports.
pub use transport::TransportCtx;
/// Transport-level classification of a finished transfer.
pub use transport::TransportOutcome;
