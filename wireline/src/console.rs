//! Console command surface.
//!
//! Handles commands starting with `HTTP`:
//!
//! ```text
//! HTTP TEST [n] [url]                          fire N GETs
//! HTTP DUMPREQ                                 list outstanding requests
//! HTTP FLUSH                                   Flush(Default)
//! HTTP FILEUPLOAD <url> <path> [verb]          streaming upload smoke test
//! HTTP LAUNCHREQUESTS <verb> <url> <n> <cancel>  stress
//! ```

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::FlushReason;
use crate::module::HttpModule;

/// Dispatch a console command. Returns true when the command was consumed
/// (anything starting with `HTTP`).
pub fn handle_command(module: &HttpModule, command: &str, out: &mut dyn fmt::Write) -> bool {
    let mut tokens = command.split_whitespace();
    match tokens.next() {
        Some(word) if word.eq_ignore_ascii_case("HTTP") => {}
        _ => return false,
    }
    let Some(subcommand) = tokens.next() else {
        let _ = writeln!(out, "usage: HTTP TEST|DUMPREQ|FLUSH|FILEUPLOAD|LAUNCHREQUESTS");
        return true;
    };

    match subcommand.to_ascii_uppercase().as_str() {
        "TEST" => {
            let iterations = tokens
                .next()
                .and_then(|t| t.parse::<u32>().ok())
                .unwrap_or(1);
            let url = tokens.next().unwrap_or("http://www.google.com");
            fire_test_requests(module, "GET", "", url, iterations);
        }
        "DUMPREQ" => {
            let _ = module.manager().dump_requests(out);
        }
        "FLUSH" => {
            module.manager().flush(FlushReason::Default);
        }
        "FILEUPLOAD" => {
            let (url, path) = (tokens.next(), tokens.next());
            let (Some(url), Some(path)) = (url, path) else {
                warn!("command expects <upload url> <upload filename> [verb]");
                return true;
            };
            let verb = tokens.next().unwrap_or("PUT");
            let request = module.create_request();
            request.set_url(url);
            request.set_verb(verb);
            request.set_header("Content-Type", "application/x-wireline-upload-test");
            request.set_content_as_streamed_file(Path::new(path));
            request.process();
        }
        "LAUNCHREQUESTS" => {
            let verb = tokens.next().unwrap_or("GET").to_owned();
            let url = tokens.next().unwrap_or_default().to_owned();
            let count = tokens
                .next()
                .and_then(|t| t.parse::<u32>().ok())
                .unwrap_or(1);
            let cancel = tokens
                .next()
                .is_some_and(|t| t.eq_ignore_ascii_case("true") || t == "1");

            let mut requests = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let request = module.create_request();
                request.set_url(&url);
                request.set_verb(&verb);
                request.on_complete(|_, _, _| {});
                request.process();
                requests.push(request);
            }
            if cancel {
                for request in &requests {
                    request.cancel();
                }
            }
        }
        other => {
            let _ = writeln!(out, "unknown HTTP command: {other}");
        }
    }
    true
}

/// Fire `iterations` requests at `url` and log each completion.
pub fn fire_test_requests(module: &HttpModule, verb: &str, payload: &str, url: &str, iterations: u32) {
    info!(verb, url, iterations, "starting http test");
    let remaining = Arc::new(AtomicI64::new(iterations as i64));
    for _ in 0..iterations {
        let request = module.create_request();
        request.set_url(url);
        if !payload.is_empty() {
            request.set_content_as_string(payload);
        }
        request.set_verb(verb);
        let remaining = remaining.clone();
        request.on_complete(move |req, response, _ok| {
            match response {
                None => info!("test failed. no response"),
                Some(response) => info!(
                    verb = %req.verb(),
                    url = %req.url(),
                    code = response.response_code(),
                    body = %response.content_as_string(),
                    "completed test"
                ),
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) <= 1 {
                req.clear_delegates();
            }
        });
        request.process();
    }
}
