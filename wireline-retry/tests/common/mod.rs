//! Scripted transport harness for retry scenarios.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use wireline::{
    AttemptSpec, HttpConfig, HttpModule, Transport, TransportCtx, TransportFactory,
    TransportOutcome,
};

/// One scripted attempt: a response code with headers, or a failure.
#[derive(Clone)]
pub struct Script {
    pub outcome: TransportOutcome,
    pub code: i32,
    pub headers: Vec<(String, String)>,
}

impl Script {
    pub fn ok(code: i32) -> Self {
        Self {
            outcome: TransportOutcome::Completed,
            code,
            headers: Vec::new(),
        }
    }

    pub fn ok_with_header(code: i32, name: &str, value: &str) -> Self {
        Self {
            outcome: TransportOutcome::Completed,
            code,
            headers: vec![(name.to_owned(), value.to_owned())],
        }
    }

    pub fn connection_error() -> Self {
        Self {
            outcome: TransportOutcome::ConnectionError,
            code: 0,
            headers: Vec::new(),
        }
    }

    pub fn failed_midstream() -> Self {
        Self {
            outcome: TransportOutcome::Failed,
            code: 0,
            headers: Vec::new(),
        }
    }
}

struct ScriptedTransport {
    script: Script,
    complete: bool,
}

impl Transport for ScriptedTransport {
    fn start(&mut self, _ctx: &TransportCtx<'_>) -> bool {
        true
    }

    fn tick(&mut self, ctx: &TransportCtx<'_>, _dt: f64) {
        if self.complete {
            return;
        }
        if self.script.outcome == TransportOutcome::Completed {
            let sink = ctx.sink();
            sink.set_response_code(self.script.code);
            for (name, value) in &self.script.headers {
                sink.push_header(name, value);
            }
        }
        self.complete = true;
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn outcome(&self) -> TransportOutcome {
        if self.complete {
            self.script.outcome
        } else {
            TransportOutcome::InFlight
        }
    }
}

/// Plays back one script per attempt and records the attempt URLs.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    pub urls: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn attempt_url(&self, index: usize) -> String {
        self.urls.lock().unwrap()[index].clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create_transport(&self, spec: &AttemptSpec) -> Option<Box<dyn Transport>> {
        self.urls.lock().unwrap().push(spec.url.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::ok(200));
        Some(Box::new(ScriptedTransport {
            script,
            complete: false,
        }))
    }
}

pub fn test_module(factory: Arc<ScriptedFactory>) -> HttpModule {
    let config = HttpConfig {
        thread_active_frame_time: 0.001,
        thread_active_min_sleep: 0.0,
        thread_idle_frame_time: 0.002,
        thread_idle_min_sleep: 0.0,
        request_cleanup_delay: 0.01,
        ..HttpConfig::default()
    };
    HttpModule::init_with_transport(config, factory).expect("module init")
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

/// A test clock advanced by hand.
#[derive(Clone, Default)]
pub struct TestClock {
    now: Arc<Mutex<f64>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock().unwrap() += seconds;
    }

    pub fn reader(&self) -> impl Fn() -> f64 + Send + Sync + 'static {
        let now = self.now.clone();
        move || *now.lock().unwrap()
    }
}
