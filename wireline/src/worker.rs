//! The I/O worker.
//!
//! One background actor drives every active transport off the main thread.
//! Requests arrive and leave through channels; the `ready`/`running` lists
//! are worker-local. On platforms without real threads the worker is
//! cooperative: it has no thread of its own and the manager calls
//! [`HttpThread::tick`] instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::request::HttpRequest;
use crate::transport::TransportFactory;

/// Worker frame budgets, in seconds. The worker sleeps
/// `max(budget - elapsed, min_sleep)` after each pass: the active pair
/// applies while transfers are running, the idle pair between them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacing {
    pub active_frame_time: f64,
    pub active_min_sleep: f64,
    pub idle_frame_time: f64,
    pub idle_min_sleep: f64,
}

struct ProcessState {
    /// Accepted but not yet started because of the running cap.
    ready: VecDeque<HttpRequest>,
    /// Transports currently being driven.
    running: Vec<HttpRequest>,
    last_time: Instant,
}

struct ThreadShared {
    new_tx: Sender<HttpRequest>,
    new_rx: Receiver<HttpRequest>,
    cancelled_tx: Sender<HttpRequest>,
    cancelled_rx: Receiver<HttpRequest>,
    completed_tx: Sender<HttpRequest>,
    completed_rx: Receiver<HttpRequest>,
    state: Mutex<ProcessState>,
    exit: AtomicBool,
    pacing: Pacing,
    running_limit: usize,
    factory: Option<Arc<dyn TransportFactory>>,
}

pub(crate) struct HttpThread {
    shared: Arc<ThreadShared>,
    join: Mutex<Option<JoinHandle<()>>>,
    single_thread: bool,
}

impl HttpThread {
    pub(crate) fn new(
        pacing: Pacing,
        running_limit: usize,
        factory: Option<Arc<dyn TransportFactory>>,
        single_thread: bool,
    ) -> Self {
        let (new_tx, new_rx) = crossbeam_channel::unbounded();
        let (cancelled_tx, cancelled_rx) = crossbeam_channel::unbounded();
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
        debug!(
            active_ms = pacing.active_frame_time * 1000.0,
            idle_ms = pacing.idle_frame_time * 1000.0,
            running_limit,
            single_thread,
            "http worker created"
        );
        Self {
            shared: Arc::new(ThreadShared {
                new_tx,
                new_rx,
                cancelled_tx,
                cancelled_rx,
                completed_tx,
                completed_rx,
                state: Mutex::new(ProcessState {
                    ready: VecDeque::new(),
                    running: Vec::new(),
                    last_time: Instant::now(),
                }),
                exit: AtomicBool::new(false),
                pacing,
                running_limit,
                factory,
            }),
            join: Mutex::new(None),
            single_thread,
        }
    }

    /// Spawn the worker thread. Cooperative workers have none and are
    /// driven through [`tick`](Self::tick).
    pub(crate) fn start(&self) -> Result<(), crate::error::Error> {
        if self.single_thread {
            return Ok(());
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("wireline-http-worker".to_string())
            .spawn(move || run(shared))
            .map_err(|err| crate::error::Error::WorkerSpawn(err.to_string()))?;
        *self.join.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request a cooperative stop and join the thread.
    pub(crate) fn stop(&self) {
        self.shared.exit.store(true, Ordering::Release);
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub(crate) fn add_request(&self, request: HttpRequest) {
        let _ = self.shared.new_tx.send(request);
    }

    pub(crate) fn cancel_request(&self, request: HttpRequest) {
        let _ = self.shared.cancelled_tx.send(request);
    }

    /// Drain requests whose transport-level work finished since the last
    /// call. Main thread only.
    pub(crate) fn get_completed(&self, out: &mut Vec<HttpRequest>) {
        while let Ok(request) = self.shared.completed_rx.try_recv() {
            out.push(request);
        }
    }

    /// True when the worker has no thread and must be ticked by the caller.
    pub(crate) fn needs_single_thread_tick(&self) -> bool {
        self.single_thread
    }

    /// Drive one pass of a cooperative worker.
    pub(crate) fn tick(&self) {
        debug_assert!(self.single_thread, "tick() on a threaded worker");
        self.shared.process();
    }
}

impl Drop for HttpThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ThreadShared {
    /// One worker pass. Returns true while transports are running.
    fn process(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let mut to_complete: Vec<HttpRequest> = Vec::new();

        // Cancels are handled first so a cancelled request never starts.
        while let Ok(request) = self.cancelled_rx.try_recv() {
            let id = request.ptr_id();
            if let Some(pos) = state.running.iter().position(|r| r.ptr_id() == id) {
                let request = state.running.remove(pos);
                request.cancel_transport();
                push_unique(&mut to_complete, request);
            } else if let Some(pos) = state.ready.iter().position(|r| r.ptr_id() == id) {
                if let Some(request) = state.ready.remove(pos) {
                    push_unique(&mut to_complete, request);
                }
            } else {
                warn!(url = %request.url(), "unable to find request to cancel on the worker");
            }
        }

        while let Ok(request) = self.new_rx.try_recv() {
            state.ready.push_back(request);
        }

        let now = Instant::now();
        let dt = now.duration_since(state.last_time).as_secs_f64();
        state.last_time = now;

        for request in &state.running {
            request.tick_threaded(dt);
        }

        // Start queued requests up to the cap. New starts get a zero-delta
        // tick of their own so a large dt above cannot affect them.
        while state.running.len() < self.running_limit {
            let Some(request) = state.ready.pop_front() else {
                break;
            };
            if request.start_threaded() {
                request.tick_threaded(0.0);
                debug!(
                    url = %request.url(),
                    running = state.running.len() + 1,
                    ready = state.ready.len(),
                    "started threaded request"
                );
                state.running.push(request);
            } else {
                push_unique(&mut to_complete, request);
            }
        }

        // Backends that aggregate transfers poll here.
        if let Some(factory) = &self.factory {
            factory.tick_worker(dt);
        }

        let mut idx = 0;
        while idx < state.running.len() {
            if state.running[idx].is_threaded_complete() {
                let request = state.running.swap_remove(idx);
                debug!(url = %request.url(), running = state.running.len(), "threaded request complete");
                push_unique(&mut to_complete, request);
            } else {
                idx += 1;
            }
        }

        for request in to_complete {
            request.release_transport();
            let _ = self.completed_tx.send(request);
        }

        !state.running.is_empty()
    }
}

fn push_unique(list: &mut Vec<HttpRequest>, request: HttpRequest) {
    if !list.iter().any(|r| r.ptr_id() == request.ptr_id()) {
        list.push(request);
    }
}

fn sleep_for(seconds: f64) {
    if seconds > 0.0 {
        thread::sleep(Duration::from_secs_f64(seconds));
    } else {
        thread::yield_now();
    }
}

fn run(shared: Arc<ThreadShared>) {
    shared.state.lock().unwrap().last_time = Instant::now();
    while !shared.exit.load(Ordering::Acquire) {
        let outer_begin = Instant::now();
        let mut outer_end = outer_begin;
        // Inner loop: tight pacing while transfers are active.
        loop {
            let inner_begin = Instant::now();
            let keep_processing = shared.process();
            let inner_end = Instant::now();
            if shared.exit.load(Ordering::Acquire) {
                return;
            }
            if keep_processing {
                let inner_time = inner_end.duration_since(inner_begin).as_secs_f64();
                sleep_for(
                    (shared.pacing.active_frame_time - inner_time)
                        .max(shared.pacing.active_min_sleep),
                );
            } else {
                outer_end = inner_end;
                break;
            }
        }
        let outer_time = outer_end.duration_since(outer_begin).as_secs_f64();
        sleep_for((shared.pacing.idle_frame_time - outer_time).max(shared.pacing.idle_min_sleep));
    }
}
