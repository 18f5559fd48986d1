use thiserror::Error;

/// Errors returned by the wireline core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// HTTP is disabled by configuration.
    #[error("http is disabled")]
    Disabled,
    /// The request has no URL.
    #[error("url is empty")]
    EmptyUrl,
    /// The URL's domain is not on the allow-list.
    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),
    /// The previous attempt on this request is still in flight.
    #[error("still processing last request")]
    AlreadyProcessing,
    /// A bodied verb carries a non-URL-encoded payload without a Content-Type.
    #[error("missing Content-Type for {0} payload")]
    MissingContentType(String),
    /// The manager is flushing; the registry cannot grow.
    #[error("manager is flushing")]
    Flushing,
    /// A threaded submit arrived while no I/O worker exists.
    #[error("no http worker")]
    NoWorker,
    /// The I/O worker thread could not be spawned.
    #[error("worker spawn failed: {0}")]
    WorkerSpawn(String),
    /// Configuration value out of range.
    #[error("config: {0}")]
    Config(String),
}
