//! Flush protocol: soft-limit cancellation, hard-limit abandonment, and
//! shutdown delegate clearing.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::{test_config, Script, ScriptedFactory};
use wireline::{FlushReason, HttpModule, RequestStatus};

#[test]
fn default_flush_cancels_after_the_soft_limit() {
    let mut config = test_config();
    config.flush_default = wireline::FlushTimeLimit::new(0.05, 5.0);
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = HttpModule::init_with_transport(config, factory).unwrap();

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/lingering");
    let sink = completions.clone();
    request.on_complete(move |_, _, ok| {
        assert!(!ok);
        sink.fetch_add(1, Ordering::AcqRel);
    });
    assert!(request.process());

    let begin = Instant::now();
    module.manager().flush(FlushReason::Default);
    assert!(begin.elapsed().as_secs_f64() < 5.0);

    assert_eq!(module.manager().request_count(), 0);
    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    module.shutdown();
}

#[test]
fn full_flush_waits_for_natural_completion() {
    let mut config = test_config();
    let factory = ScriptedFactory::new([Script {
        delay: 0.05,
        ..Script::ok(200)
    }]);
    config.flush_full = wireline::FlushTimeLimit::new(-1.0, -1.0);
    let module = HttpModule::init_with_transport(config, factory).unwrap();

    let request = module.create_request();
    request.set_url("http://example/slow-but-fine");
    assert!(request.process());

    module.manager().flush(FlushReason::FullFlush);
    assert_eq!(module.manager().request_count(), 0);
    assert_eq!(request.status(), RequestStatus::Succeeded);
    module.shutdown();
}

#[test]
fn shutdown_flush_abandons_a_stuck_request() {
    let mut config = test_config();
    config.flush_shutdown = wireline::FlushTimeLimit::new(0.0, 0.05);
    // A backend that cannot abort and blocks the worker for long stretches.
    let factory = ScriptedFactory::new([Script {
        silent: true,
        ignore_cancel: true,
        tick_block: 0.2,
        ..Script::default()
    }]);
    let module = HttpModule::init_with_transport(config, factory).unwrap();

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/stuck");
    let sink = completions.clone();
    request.on_complete(move |_, _, _| {
        sink.fetch_add(1, Ordering::AcqRel);
    });
    assert!(request.process());

    let begin = Instant::now();
    module.manager().flush(FlushReason::Shutdown);
    // Returns once the hard limit passes, long before the transport would.
    assert!(begin.elapsed().as_secs_f64() < 1.0);

    // The request is abandoned: still registered, no completion callback
    // (delegates were cleared up front).
    assert_eq!(module.manager().request_count(), 1);
    assert_eq!(completions.load(Ordering::Acquire), 0);

    // Second shutdown pass abandons again quickly and joins the worker.
    module.shutdown();
}

#[test]
fn shutdown_flush_clears_delegates_before_draining() {
    let mut config = test_config();
    config.flush_shutdown = wireline::FlushTimeLimit::new(0.0, 2.0);
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = HttpModule::init_with_transport(config, factory).unwrap();

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/cancellable");
    let sink = completions.clone();
    request.on_complete(move |_, _, _| {
        sink.fetch_add(1, Ordering::AcqRel);
    });
    assert!(request.process());

    module.manager().flush(FlushReason::Shutdown);

    assert_eq!(module.manager().request_count(), 0);
    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 0);
    module.shutdown();
}

#[test]
fn flush_with_nothing_outstanding_returns_immediately() {
    let module = HttpModule::init_with_transport(test_config(), ScriptedFactory::new([])).unwrap();
    let begin = Instant::now();
    module.manager().flush(FlushReason::Default);
    assert!(begin.elapsed().as_secs_f64() < 0.5);
    module.shutdown();
}
