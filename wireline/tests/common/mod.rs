//! Shared test harness: a scripted transport and polling helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use wireline::{
    AttemptSpec, HttpConfig, HttpModule, Transport, TransportCtx, TransportFactory,
    TransportOutcome,
};

/// What one scripted attempt does.
#[derive(Clone)]
pub struct Script {
    pub start_ok: bool,
    /// Seconds of ticking before the transfer finishes.
    pub delay: f64,
    pub outcome: TransportOutcome,
    pub code: i32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Never finish and never produce activity.
    pub silent: bool,
    /// Pretend the backend cannot abort.
    pub ignore_cancel: bool,
    /// Sleep this long inside every tick (a slow backend).
    pub tick_block: f64,
    /// Read the request body this many bytes per tick before responding.
    pub upload_chunk: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_ok: true,
            delay: 0.0,
            outcome: TransportOutcome::Completed,
            code: 200,
            headers: Vec::new(),
            body: Vec::new(),
            silent: false,
            ignore_cancel: false,
            tick_block: 0.0,
            upload_chunk: 0,
        }
    }
}

impl Script {
    pub fn ok(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn ok_with_body(code: i32, content_type: &str, body: &[u8]) -> Self {
        Self {
            code,
            headers: vec![("Content-Type".to_owned(), content_type.to_owned())],
            body: body.to_vec(),
            ..Self::default()
        }
    }

    pub fn connection_error() -> Self {
        Self {
            outcome: TransportOutcome::ConnectionError,
            code: 0,
            ..Self::default()
        }
    }

    pub fn failed_midstream() -> Self {
        Self {
            outcome: TransportOutcome::Failed,
            code: 0,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// One attempt as the factory saw it.
#[derive(Clone)]
pub struct AttemptRecord {
    pub verb: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content_length: u64,
}

impl AttemptRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

struct ScriptedTransport {
    script: Script,
    elapsed: f64,
    sent: u64,
    complete: bool,
    canceled: bool,
    outcome: TransportOutcome,
    released: Arc<AtomicBool>,
}

impl Transport for ScriptedTransport {
    fn start(&mut self, _ctx: &TransportCtx<'_>) -> bool {
        self.script.start_ok
    }

    fn tick(&mut self, ctx: &TransportCtx<'_>, dt: f64) {
        if self.complete {
            return;
        }
        if self.script.tick_block > 0.0 {
            thread::sleep(Duration::from_secs_f64(self.script.tick_block));
        }
        if self.canceled || self.script.silent {
            return;
        }
        self.elapsed += dt;
        ctx.sink().mark_activity();

        if self.script.upload_chunk > 0 && self.sent < ctx.content_length() {
            let mut buf = vec![0u8; self.script.upload_chunk];
            let n = ctx.fill_output_buffer(&mut buf, self.sent);
            self.sent += n as u64;
            if self.sent < ctx.content_length() {
                return;
            }
        }

        if self.elapsed >= self.script.delay {
            if self.script.outcome == TransportOutcome::Completed {
                let sink = ctx.sink();
                sink.set_response_code(self.script.code);
                for (name, value) in &self.script.headers {
                    sink.push_header(name, value);
                }
                if !self.script.body.is_empty() {
                    sink.append_body(&self.script.body);
                }
            }
            self.outcome = self.script.outcome;
            self.complete = true;
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn outcome(&self) -> TransportOutcome {
        if self.complete {
            self.outcome
        } else {
            TransportOutcome::InFlight
        }
    }

    fn cancel(&mut self) {
        if !self.script.ignore_cancel {
            self.canceled = true;
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
    }
}

/// Factory that plays back one script per attempt and records what it saw.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    attempts: Mutex<Vec<AttemptRecord>>,
    released: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedFactory {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        })
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt(&self, index: usize) -> AttemptRecord {
        self.attempts.lock().unwrap()[index].clone()
    }

    /// True when every created transport has been released.
    pub fn all_released(&self) -> bool {
        self.released
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.load(Ordering::Acquire))
    }

    pub fn transport_count(&self) -> usize {
        self.released.lock().unwrap().len()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create_transport(&self, spec: &AttemptSpec) -> Option<Box<dyn Transport>> {
        self.attempts.lock().unwrap().push(AttemptRecord {
            verb: spec.verb.clone(),
            url: spec.url.clone(),
            headers: spec
                .headers
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            content_length: spec.content_length,
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let released = Arc::new(AtomicBool::new(false));
        self.released.lock().unwrap().push(released.clone());
        Some(Box::new(ScriptedTransport {
            script,
            elapsed: 0.0,
            sent: 0,
            complete: false,
            canceled: false,
            outcome: TransportOutcome::InFlight,
            released,
        }))
    }
}

/// Quick-pacing config for tests.
pub fn test_config() -> HttpConfig {
    HttpConfig {
        thread_active_frame_time: 0.001,
        thread_active_min_sleep: 0.0,
        thread_idle_frame_time: 0.002,
        thread_idle_min_sleep: 0.0,
        request_cleanup_delay: 0.01,
        ..HttpConfig::default()
    }
}

pub fn test_module(factory: Arc<ScriptedFactory>) -> HttpModule {
    HttpModule::init_with_transport(test_config(), factory).expect("module init")
}

/// Tick the manager until `cond` holds or `timeout` elapses.
pub fn pump_until(module: &HttpModule, timeout: f64, mut cond: impl FnMut() -> bool) -> bool {
    let begin = Instant::now();
    loop {
        module.manager().tick(0.01);
        if cond() {
            return true;
        }
        if begin.elapsed().as_secs_f64() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
