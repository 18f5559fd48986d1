//! The HTTP module: the explicitly-constructed, long-lived entry point.
//!
//! Owns the configuration, the manager, the default headers, and the
//! transport factory. Engines create one with [`HttpModule::init`], tick
//! its manager every frame, and flush it at lifecycle boundaries. A global
//! slot is available for call sites that cannot carry a handle
//! (URL-launch filtering, console commands); nothing inside the crate
//! depends on it.
//!
//! Proxy resolution order: the `-httpproxy=` switch (applied through
//! [`Switches::apply`](crate::Switches::apply)), then the configured
//! address, then whatever the embedder injects from the operating system
//! via [`set_proxy_address`](HttpModule::set_proxy_address).

use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::config::{FlushReason, HttpConfig};
use crate::error::Error;
use crate::headers::HeaderMap;
use crate::manager::HttpManager;
use crate::request::HttpRequest;
use crate::transport::TransportFactory;
use crate::url;

static GLOBAL: Lazy<Mutex<Option<HttpModule>>> = Lazy::new(|| Mutex::new(None));

pub(crate) struct ModuleCore {
    pub(crate) config: RwLock<HttpConfig>,
    pub(crate) default_headers: RwLock<HeaderMap>,
    pub(crate) factory: RwLock<Option<Arc<dyn TransportFactory>>>,
    pub(crate) manager: HttpManager,
}

/// Shared handle to the HTTP module.
#[derive(Clone)]
pub struct HttpModule {
    core: Arc<ModuleCore>,
}

impl HttpModule {
    /// Construct and start the module: validates the configuration and
    /// spins up the I/O worker. With no transport factory installed every
    /// request takes the null path.
    pub fn init(config: HttpConfig) -> Result<Self, Error> {
        Self::init_inner(config, None)
    }

    /// [`init`](Self::init) with a transport factory for a real backend.
    pub fn init_with_transport(
        config: HttpConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, Error> {
        Self::init_inner(config, Some(factory))
    }

    fn init_inner(
        mut config: HttpConfig,
        factory: Option<Arc<dyn TransportFactory>>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let core = Arc::new_cyclic(|weak| ModuleCore {
            config: RwLock::new(config),
            default_headers: RwLock::new(HeaderMap::new()),
            factory: RwLock::new(factory),
            manager: HttpManager::new(weak.clone()),
        });
        core.manager.initialize(&core)?;
        debug!("http module initialized");
        Ok(Self { core })
    }

    /// Publish this module in the process-wide slot used by
    /// [`HttpModule::get`].
    pub fn install_global(&self) {
        *GLOBAL.lock().unwrap() = Some(self.clone());
    }

    /// The module published with [`install_global`](Self::install_global).
    pub fn get() -> Option<HttpModule> {
        GLOBAL.lock().unwrap().clone()
    }

    /// Flush outstanding requests with the shutdown limits, stop the
    /// worker, and vacate the global slot if this module occupies it.
    pub fn shutdown(&self) {
        self.core.manager.flush(FlushReason::Shutdown);
        self.core.manager.stop_worker();
        let mut global = GLOBAL.lock().unwrap();
        if global
            .as_ref()
            .is_some_and(|m| Arc::ptr_eq(&m.core, &self.core))
        {
            *global = None;
        }
    }

    /// A new request, pre-populated with the module's default headers.
    pub fn create_request(&self) -> HttpRequest {
        HttpRequest::new(self.core.clone())
    }

    pub fn manager(&self) -> &HttpManager {
        &self.core.manager
    }

    /// Install the backend used for subsequent requests. The worker's
    /// per-pass hook picks up the new factory after the next fork or
    /// restart.
    pub fn set_transport_factory(&self, factory: Arc<dyn TransportFactory>) {
        *self.core.factory.write().unwrap() = Some(factory);
    }

    // ── Configuration access ─────────────────────────────────────────

    /// Snapshot of the current configuration.
    pub fn config(&self) -> HttpConfig {
        self.core.config.read().unwrap().clone()
    }

    /// Apply targeted configuration changes.
    pub fn update_config(&self, apply: impl FnOnce(&mut HttpConfig)) {
        let mut config = self.core.config.write().unwrap();
        apply(&mut config);
    }

    /// Seconds for an entire request to complete. 0 disables the check.
    pub fn http_timeout(&self) -> f64 {
        self.core.config.read().unwrap().http_timeout
    }

    pub fn set_http_timeout(&self, seconds: f64) {
        self.core.config.write().unwrap().http_timeout = seconds;
    }

    pub fn connection_timeout(&self) -> f64 {
        self.core.config.read().unwrap().connection_timeout
    }

    pub fn receive_timeout(&self) -> f64 {
        self.core.config.read().unwrap().receive_timeout
    }

    pub fn send_timeout(&self) -> f64 {
        self.core.config.read().unwrap().send_timeout
    }

    pub fn max_connections_per_server(&self) -> u32 {
        self.core.config.read().unwrap().max_connections_per_server
    }

    pub fn is_http_enabled(&self) -> bool {
        self.core.config.read().unwrap().enable_http
    }

    /// Toggle the null (mock) backend.
    pub fn toggle_null_http(&self, enabled: bool) {
        self.core.config.write().unwrap().use_null_http = enabled;
    }

    pub fn is_null_http_enabled(&self) -> bool {
        self.core.config.read().unwrap().use_null_http
    }

    /// Minimum seconds before a completion may be published.
    pub fn delay_time(&self) -> f64 {
        self.core.config.read().unwrap().delay_time
    }

    pub fn set_delay_time(&self, seconds: f64) {
        self.core.config.write().unwrap().delay_time = seconds;
    }

    pub fn proxy_address(&self) -> Option<String> {
        self.core.config.read().unwrap().proxy_address.clone()
    }

    pub fn set_proxy_address(&self, address: impl Into<String>) {
        self.core.config.write().unwrap().proxy_address = Some(address.into());
    }

    pub fn allowed_domains(&self) -> Vec<String> {
        self.core.config.read().unwrap().allowed_domains.clone()
    }

    // ── Default headers ──────────────────────────────────────────────

    /// Headers appended to every new request. A header the request sets
    /// itself wins over the default.
    pub fn default_headers(&self) -> HeaderMap {
        self.core.default_headers.read().unwrap().clone()
    }

    pub fn add_default_header(&self, name: &str, value: &str) {
        self.core.default_headers.write().unwrap().set(name, value);
    }

    // ── Engine hooks ─────────────────────────────────────────────────

    /// URL-launch filter: `http(s)` URLs obey the same domain allow-list
    /// as requests; other schemes pass through.
    pub fn should_launch_url(&self, url_text: &str) -> bool {
        if url::is_http_scheme(url_text) {
            self.core.manager.is_domain_allowed(url_text)
        } else {
            true
        }
    }

    pub fn on_before_fork(&self) {
        self.core.manager.on_before_fork();
    }

    pub fn on_after_fork(&self) {
        self.core.manager.on_after_fork();
    }

    pub fn on_end_frame_post_fork(&self) {
        self.core.manager.on_end_frame_post_fork();
    }
}
