//! Cancellation and inactivity timeout behavior.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{pump_until, test_config, test_module, Script, ScriptedFactory};
use wireline::{HttpModule, RequestStatus};

#[test]
fn inactivity_timeout_fails_a_silent_transfer() {
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = test_module(factory.clone());

    let completions = Arc::new(AtomicU32::new(0));
    let oks = Arc::new(Mutex::new(Vec::new()));

    let request = module.create_request();
    request.set_url("http://example/black-hole");
    request.set_timeout(0.05);
    let (completions_sink, oks_sink) = (completions.clone(), oks.clone());
    request.on_complete(move |_, response, ok| {
        completions_sink.fetch_add(1, Ordering::AcqRel);
        oks_sink.lock().unwrap().push((ok, response.is_some()));
    });

    assert!(request.process());
    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));

    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    // ok=false; the partial (empty) response is discarded on failure.
    assert_eq!(oks.lock().unwrap()[0].0, false);
    assert!(request.response().is_none());
    assert!(factory.all_released());
    module.shutdown();
}

#[test]
fn no_timeouts_switch_disables_the_inactivity_check() {
    let mut config = test_config();
    config.no_timeouts = true;
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = HttpModule::init_with_transport(config, factory).unwrap();

    let request = module.create_request();
    request.set_url("http://example/black-hole");
    request.set_timeout(0.02);
    assert!(request.process());

    assert!(!pump_until(&module, 0.3, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Processing);

    request.cancel();
    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    module.shutdown();
}

#[test]
fn cancel_during_send_finishes_once_and_releases_the_transport() {
    // A slow upload: one 1 KiB chunk per worker pass over a 1 MiB body.
    let factory = ScriptedFactory::new([Script {
        delay: 1000.0,
        upload_chunk: 1024,
        ..Script::default()
    }]);
    let module = test_module(factory.clone());

    let completions = Arc::new(AtomicU32::new(0));
    let progress_events = Arc::new(AtomicU32::new(0));

    let request = module.create_request();
    request.set_url("http://example/upload");
    request.set_verb("PUT");
    request.set_header("Content-Type", "application/octet-stream");
    request.set_content(vec![0u8; 1024 * 1024]);

    let sink = completions.clone();
    request.on_complete(move |_, _, ok| {
        assert!(!ok);
        sink.fetch_add(1, Ordering::AcqRel);
    });
    let sink = progress_events.clone();
    request.on_progress(move |_, _, _| {
        sink.fetch_add(1, Ordering::AcqRel);
    });

    assert!(request.process());
    thread::sleep(Duration::from_millis(100));
    request.cancel();

    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    assert!(factory.all_released());

    // No progress events after completion.
    let after_completion = progress_events.load(Ordering::Acquire);
    for _ in 0..20 {
        module.manager().tick(0.01);
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(progress_events.load(Ordering::Acquire), after_completion);
    module.shutdown();
}

#[test]
fn cancel_is_idempotent() {
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = test_module(factory);

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/test");
    let sink = completions.clone();
    request.on_complete(move |_, _, _| {
        sink.fetch_add(1, Ordering::AcqRel);
    });

    assert!(request.process());
    request.cancel();
    request.cancel();
    request.cancel();

    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    module.shutdown();
}

#[test]
fn cancel_after_completion_keeps_the_terminal_status() {
    let factory = ScriptedFactory::new([Script::ok(200)]);
    let module = test_module(factory);

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/test");
    let sink = completions.clone();
    request.on_complete(move |_, _, _| {
        sink.fetch_add(1, Ordering::AcqRel);
    });

    assert!(request.process());
    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Succeeded);

    request.cancel();
    module.manager().tick(0.0);
    assert_eq!(request.status(), RequestStatus::Succeeded);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    module.shutdown();
}

#[test]
fn cancel_before_process_reaches_failed_with_one_completion() {
    let module = test_module(ScriptedFactory::new([]));

    let completions = Arc::new(AtomicU32::new(0));
    let request = module.create_request();
    request.set_url("http://example/never-sent");
    let sink = completions.clone();
    request.on_complete(move |_, _, ok| {
        assert!(!ok);
        sink.fetch_add(1, Ordering::AcqRel);
    });

    request.cancel();
    assert_eq!(request.status(), RequestStatus::Failed);
    assert_eq!(completions.load(Ordering::Acquire), 1);
    module.shutdown();
}

#[test]
fn cancel_from_another_thread_finalizes_on_the_main_thread() {
    let factory = ScriptedFactory::new([Script::silent()]);
    let module = test_module(factory);

    let request = module.create_request();
    request.set_url("http://example/test");
    assert!(request.process());

    let handle = {
        let request = request.clone();
        thread::spawn(move || request.cancel())
    };
    handle.join().unwrap();

    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Failed);
    module.shutdown();
}

#[test]
fn null_backend_requests_fail_at_the_total_timeout() {
    let mut config = test_config();
    config.use_null_http = true;
    let module = HttpModule::init(config).unwrap();

    let request = module.create_request();
    request.set_url("http://example/null");
    request.set_timeout(0.05);
    assert!(request.process());
    assert_eq!(module.manager().request_count(), 1);

    assert!(pump_until(&module, 5.0, || request.status().is_terminal()));
    assert_eq!(request.status(), RequestStatus::Failed);
    assert!(request.response().is_none());
    assert_eq!(module.manager().request_count(), 0);
    module.shutdown();
}
