//! The HTTP manager.
//!
//! Process-wide owner of every live request. Registers requests, ticks them
//! once per frame on the main thread, routes worker completions back to
//! their callbacks, and drains the whole set at lifecycle boundaries
//! (flush, fork, shutdown). While a flush is draining, registration blocks
//! so the live set cannot grow.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::config::{FlushReason, HttpConfig, WorkerMode};
use crate::error::Error;
use crate::module::ModuleCore;
use crate::request::HttpRequest;
use crate::worker::{HttpThread, Pacing};
use crate::{metrics, url};

type MainThreadTask = Box<dyn FnOnce() + Send>;
type CorrelationFn = Box<dyn Fn() -> String + Send + Sync>;

/// True when `url`'s domain may be requested under `config`.
///
/// The allow-list is enforced by default; builds with debug assertions may
/// skip it through the development switch, release builds always enforce
/// it. An empty list allows everything.
pub(crate) fn domain_allowed(config: &HttpConfig, url_text: &str) -> bool {
    let enforce = if cfg!(debug_assertions) {
        config.enforce_domain_restrictions.unwrap_or(true)
    } else {
        true
    };
    if !enforce || config.allowed_domains.is_empty() {
        return true;
    }
    let domain = url::domain(url_text);
    config
        .allowed_domains
        .iter()
        .any(|allowed| domain.ends_with(allowed.as_str()))
}

pub struct HttpManager {
    core: Weak<ModuleCore>,
    requests: Mutex<Vec<HttpRequest>>,
    /// True while a flush is draining. Guarded registration waits on it.
    flushing: Mutex<bool>,
    flush_done: Condvar,
    task_tx: Sender<MainThreadTask>,
    task_rx: Receiver<MainThreadTask>,
    worker: RwLock<Option<Arc<HttpThread>>>,
    correlation_method: Mutex<CorrelationFn>,
    main_thread: ThreadId,
}

impl HttpManager {
    pub(crate) fn new(core: Weak<ModuleCore>) -> Self {
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        Self {
            core,
            requests: Mutex::new(Vec::new()),
            flushing: Mutex::new(false),
            flush_done: Condvar::new(),
            task_tx,
            task_rx,
            worker: RwLock::new(None),
            correlation_method: Mutex::new(default_correlation_method()),
            main_thread: thread::current().id(),
        }
    }

    /// Create the I/O worker for the configured mode.
    pub(crate) fn initialize(&self, core: &ModuleCore) -> Result<(), Error> {
        let config = core.config.read().unwrap();
        let mode = config.worker_mode;
        let factory = core.factory.read().unwrap().clone();
        self.start_worker(&config, factory, mode)
    }

    fn start_worker(
        &self,
        config: &HttpConfig,
        factory: Option<Arc<dyn crate::transport::TransportFactory>>,
        mode: WorkerMode,
    ) -> Result<(), Error> {
        let pacing = Pacing {
            active_frame_time: config.thread_active_frame_time,
            active_min_sleep: config.thread_active_min_sleep,
            idle_frame_time: config.thread_idle_frame_time,
            idle_min_sleep: config.thread_idle_min_sleep,
        };
        let thread = HttpThread::new(
            pacing,
            config.running_request_limit,
            factory,
            mode == WorkerMode::Cooperative,
        );
        thread.start()?;
        *self.worker.write().unwrap() = Some(Arc::new(thread));
        Ok(())
    }

    pub(crate) fn stop_worker(&self) {
        if let Some(worker) = self.worker.write().unwrap().take() {
            worker.stop();
        }
    }

    pub(crate) fn has_worker(&self) -> bool {
        self.worker.read().unwrap().is_some()
    }

    fn worker_handle(&self) -> Option<Arc<HttpThread>> {
        self.worker.read().unwrap().clone()
    }

    /// True on the thread that owns per-frame ticking and user callbacks.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Block while a flush is draining. A same-thread add during the flush
    /// cannot wait (the flush owns this thread) and is rejected instead.
    fn wait_for_flush(&self) -> Result<(), Error> {
        let mut flushing = self.flushing.lock().unwrap();
        while *flushing {
            if self.is_main_thread() {
                warn!("request submitted while the manager is flushing");
                return Err(Error::Flushing);
            }
            flushing = self.flush_done.wait(flushing).unwrap();
        }
        Ok(())
    }

    /// Register a request processed inline on the main thread.
    pub(crate) fn add_request(&self, request: &HttpRequest) -> Result<(), Error> {
        self.wait_for_flush()?;
        self.requests.lock().unwrap().push(request.clone());
        metrics::REQUESTS_ACTIVE.increment();
        Ok(())
    }

    /// Register a request and hand its transport to the I/O worker.
    pub(crate) fn add_threaded_request(&self, request: &HttpRequest) -> Result<(), Error> {
        let Some(worker) = self.worker_handle() else {
            return Err(Error::NoWorker);
        };
        self.add_request(request)?;
        worker.add_request(request.clone());
        Ok(())
    }

    /// Ask the worker to abort a threaded request.
    pub(crate) fn cancel_threaded_request(&self, request: &HttpRequest) {
        match self.worker_handle() {
            Some(worker) => worker.cancel_request(request.clone()),
            None => warn!("cancel of a threaded request without a worker"),
        }
    }

    pub(crate) fn remove_request(&self, request: &HttpRequest) {
        let mut requests = self.requests.lock().unwrap();
        let before = requests.len();
        requests.retain(|r| r.ptr_id() != request.ptr_id());
        if requests.len() < before {
            metrics::REQUESTS_ACTIVE.decrement();
        }
    }

    /// Whether `request` is currently registered.
    pub fn is_valid_request(&self, request: &HttpRequest) -> bool {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.ptr_id() == request.ptr_id())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    // ── Main-thread marshalling ──────────────────────────────────────

    /// Post a callable to run on the next main-thread tick. Background
    /// actors use this to marshal completion work back to the main thread.
    pub fn add_main_thread_task(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.task_tx.send(Box::new(task));
    }

    /// Per-frame main-thread tick: drain posted tasks, tick every request,
    /// then finalize whatever the worker completed since the last frame.
    pub fn tick(&self, dt: f64) {
        while let Ok(task) = self.task_rx.try_recv() {
            task();
        }

        let worker = self.worker_handle();
        if let Some(worker) = &worker {
            if worker.needs_single_thread_tick() {
                worker.tick();
            }
        }

        for request in self.snapshot() {
            request.tick(dt);
        }

        if let Some(worker) = &worker {
            let mut completed = Vec::new();
            worker.get_completed(&mut completed);
            for request in completed {
                self.remove_request(&request);
                request.finish();
            }
        }
    }

    // ── Flush ────────────────────────────────────────────────────────

    /// Block until every registered request is finalized or the limits for
    /// `reason` say otherwise: wait for natural completion until the soft
    /// limit, cancel everything still registered after it, abandon the rest
    /// at the hard limit.
    pub fn flush(&self, reason: FlushReason) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        {
            let mut flushing = self.flushing.lock().unwrap();
            if *flushing {
                warn!("flush re-entered; ignoring");
                return;
            }
            *flushing = true;
        }

        let (limits, cleanup_delay) = {
            let config = core.config.read().unwrap();
            (config.flush_limits(reason), config.request_cleanup_delay)
        };

        if reason == FlushReason::Shutdown {
            let outstanding = self.snapshot();
            if !outstanding.is_empty() {
                warn!(
                    count = outstanding.len(),
                    "shutting down with outstanding requests"
                );
            }
            // Delegates may point into state that is being torn down.
            for request in &outstanding {
                request.clear_delegates();
                warn!(
                    verb = %request.verb(),
                    url = %request.url(),
                    status = request.status().as_str(),
                    "outstanding at shutdown"
                );
            }
        }

        warn!(count = self.request_count(), "cleaning up outstanding requests");

        let begin = Instant::now();
        let mut last_tick = begin;
        let mut stall_warn_after = 0.5;
        loop {
            if self.request_count() == 0 {
                break;
            }
            let elapsed = begin.elapsed().as_secs_f64();
            if limits.hard >= 0.0 && elapsed >= limits.hard {
                break;
            }

            if limits.soft >= 0.0 && elapsed >= limits.soft {
                let remaining = self.snapshot();
                warn!(count = remaining.len(), "cancelling remaining requests");
                for request in &remaining {
                    warn!(
                        verb = %request.verb(),
                        url = %request.url(),
                        status = request.status().as_str(),
                        "cancelling"
                    );
                    request.cancel();
                }
            }

            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;
            self.tick(dt);

            if self.request_count() == 0 {
                break;
            }
            match self.worker_handle() {
                Some(worker) if worker.needs_single_thread_tick() => {
                    // tick() above already drove the cooperative worker;
                    // just surface slow drains.
                    let elapsed = begin.elapsed().as_secs_f64();
                    if elapsed >= stall_warn_after {
                        warn!(
                            count = self.request_count(),
                            "ticking http worker for outstanding requests"
                        );
                        stall_warn_after = elapsed + 0.5;
                    }
                }
                _ => {
                    // Bound the sleep by the remaining hard budget so a
                    // short hard limit is honored.
                    let mut sleep = cleanup_delay;
                    if limits.hard >= 0.0 {
                        let remaining = limits.hard - begin.elapsed().as_secs_f64();
                        sleep = sleep.min(remaining.max(0.0));
                    }
                    warn!(
                        seconds = sleep,
                        count = self.request_count(),
                        "sleeping to wait for outstanding requests"
                    );
                    if sleep > 0.0 {
                        thread::sleep(Duration::from_secs_f64(sleep));
                    }
                }
            }
        }

        let abandoned = self.snapshot();
        if !abandoned.is_empty() {
            warn!(
                hard_limit = limits.hard,
                elapsed = begin.elapsed().as_secs_f64(),
                count = abandoned.len(),
                "flush exceeded its hard limit; abandoning requests"
            );
            for request in &abandoned {
                warn!(
                    verb = %request.verb(),
                    url = %request.url(),
                    status = request.status().as_str(),
                    "abandoned without being flushed"
                );
                metrics::REQUESTS_ABANDONED.increment();
            }
        }

        *self.flushing.lock().unwrap() = false;
        self.flush_done.notify_all();
    }

    // ── Domain allow-list ────────────────────────────────────────────

    /// Whether `url`'s domain passes the allow-list.
    pub fn is_domain_allowed(&self, url_text: &str) -> bool {
        match self.core.upgrade() {
            Some(core) => domain_allowed(&core.config.read().unwrap(), url_text),
            None => true,
        }
    }

    // ── Correlation IDs ──────────────────────────────────────────────

    /// A fresh opaque correlation id from the installed method.
    pub fn create_correlation_id(&self) -> String {
        (self.correlation_method.lock().unwrap())()
    }

    /// Replace the correlation-id method. Tests substitute deterministic
    /// ids here.
    pub fn set_correlation_id_method(&self, method: impl Fn() -> String + Send + Sync + 'static) {
        *self.correlation_method.lock().unwrap() = Box::new(method);
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Write every outstanding request to `out`.
    pub fn dump_requests(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let requests = self.snapshot();
        writeln!(out, "------- ({}) HTTP requests", requests.len())?;
        for request in &requests {
            writeln!(
                out,
                "\tverb=[{}] url=[{}] status={}",
                request.verb(),
                request.url(),
                request.status().as_str()
            )?;
        }
        Ok(())
    }

    // ── Fork hooks ───────────────────────────────────────────────────

    /// Drain and stop the worker so no thread survives into the child.
    pub fn on_before_fork(&self) {
        self.flush(FlushReason::Default);
        self.stop_worker();
    }

    /// Recreate the worker, possibly as a cooperative fake.
    pub fn on_after_fork(&self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let config = core.config.read().unwrap();
        let factory = core.factory.read().unwrap().clone();
        let mode = config.worker_mode;
        if let Err(err) = self.start_worker(&config, factory, mode) {
            warn!(%err, "failed to restart the http worker after fork");
        }
    }

    /// Promote a cooperative worker to a real thread once the platform
    /// supports it again.
    pub fn on_end_frame_post_fork(&self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let cooperative = self
            .worker_handle()
            .is_some_and(|w| w.needs_single_thread_tick());
        let config = core.config.read().unwrap();
        if cooperative && config.worker_mode == WorkerMode::Threaded {
            let factory = core.factory.read().unwrap().clone();
            self.stop_worker();
            if let Err(err) = self.start_worker(&config, factory, WorkerMode::Threaded) {
                warn!(%err, "failed to promote the http worker to a thread");
            }
        }
    }
}

fn default_correlation_method() -> CorrelationFn {
    Box::new(|| uuid::Uuid::new_v4().to_string())
}
