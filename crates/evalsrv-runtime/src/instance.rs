//! IsolateRunner — per-evaluation V8 isolate lifecycle (spec §4.4).
//!
//! Fresh guest state per call, limiter wired in before instantiation,
//! always torn down: a `v8::Isolate` running a JS snippet rather than a
//! `wasmtime::Store` running a compiled component.
//!
//! V8 isolates are not `Send`; a single isolate must live and die on one
//! OS thread. Since the Admission Queue already serializes evaluations to
//! one at a time, each `run()` call hands the actual V8 work to
//! `tokio::task::spawn_blocking` and lets the blocking thread call back
//! into async code (`fetch`) via `Handle::block_on` — safe here
//! specifically because blocking threads are not part of the async
//! reactor's worker pool.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use evalsrv_core::PotatContext;
use evalsrv_net::OutboundBridge;
use evalsrv_shaper::shape;

use crate::engine::{EVAL_TIMEOUT, EvalEngine, MEMORY_LIMIT_BYTES};
use crate::error::GuestFailure;
use crate::extensions::GuestExtensions;
use crate::limiter::{OomCallbackState, OomFlag, terminating_near_heap_limit_callback};

/// Maximum length of a result string, in UTF-16 code units (spec §4.4
/// step 9: "the reference implementation uses UTF-16 units").
const MAX_RESULT_UNITS: usize = 3000;

/// State read by the `fetch` callback from inside the isolate. Stored in
/// an isolate slot so the V8 callback — which only gets a `HandleScope`,
/// not arbitrary closure captures — can reach it.
struct FetchState {
    bridge: Arc<OutboundBridge>,
    ctx: PotatContext,
    tokio_handle: tokio::runtime::Handle,
}

/// Builds and runs one guest evaluation end to end. One `IsolateRunner` is
/// constructed at startup and shared by the Admission Queue's consumer
/// loop; it holds no per-evaluation state itself.
pub struct IsolateRunner<E: GuestExtensions + Send + Sync + 'static> {
    _engine: EvalEngine,
    bridge: Arc<OutboundBridge>,
    extensions: Arc<E>,
}

impl<E: GuestExtensions + Send + Sync + 'static> IsolateRunner<E> {
    pub fn new(engine: EvalEngine, bridge: Arc<OutboundBridge>, extensions: Arc<E>) -> Self {
        Self {
            _engine: engine,
            bridge,
            extensions,
        }
    }

    /// Run one evaluation to completion, never returning an `Err` — every
    /// failure mode is folded into the sentinel string per spec §7.
    pub async fn run(&self, code: String, msg: Value) -> String {
        let ctx = PotatContext::from_msg(&msg);
        let bridge = self.bridge.clone();
        let extensions = self.extensions.clone();
        let tokio_handle = tokio::runtime::Handle::current();
        let potat_id = ctx.id.clone();

        self.bridge.reset_inflight();

        debug!(potat_id = %potat_id, code_len = code.len(), "evaluation created");

        let result = tokio::task::spawn_blocking(move || {
            run_on_isolate(code, msg, ctx, bridge, extensions.as_ref(), tokio_handle)
        })
        .await;

        match result {
            Ok(output) => output,
            Err(join_err) => {
                warn!(potat_id = %potat_id, error = %join_err, "isolate worker thread panicked");
                GuestFailure::Internal(join_err.to_string()).sentinel()
            }
        }
    }
}

/// Runs entirely on the `spawn_blocking` worker thread: creates the
/// isolate, runs the shaped script, and tears the isolate down before
/// returning. Never panics past a caught `TryCatch`; a genuine V8-level
/// panic is caught by `spawn_blocking`'s `JoinError` in `run()` above.
fn run_on_isolate<E: GuestExtensions>(
    code: String,
    msg: Value,
    ctx: PotatContext,
    bridge: Arc<OutboundBridge>,
    extensions: &E,
    tokio_handle: tokio::runtime::Handle,
) -> String {
    let shaped = shape(&code, &msg);
    let potat_id = ctx.id.clone();

    let oom_flag = OomFlag::new();

    let create_params = v8::CreateParams::default().heap_limits(0, MEMORY_LIMIT_BYTES);
    let mut isolate = v8::Isolate::new(create_params);

    let isolate_handle = isolate.thread_safe_handle();
    let oom_state = Box::new(OomCallbackState {
        flag: oom_flag.clone(),
        isolate_handle: isolate_handle.clone(),
    });
    let oom_state_ptr = Box::into_raw(oom_state);
    isolate.add_near_heap_limit_callback(
        terminating_near_heap_limit_callback,
        oom_state_ptr as *mut std::ffi::c_void,
    );

    isolate.set_slot(FetchState {
        bridge,
        ctx,
        tokio_handle,
    });

    debug!(potat_id = %potat_id, "isolate created, context ready");

    // The watchdog: if the script has not finished within EVAL_TIMEOUT,
    // terminate it from another thread. `recv_timeout` doubles as both
    // the sleep and the "did it finish first" check, so a script that
    // completes promptly does not leave a thread parked for the rest of
    // the 5 seconds.
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog_handle = isolate_handle.clone();
    let watchdog = std::thread::spawn(move || {
        if done_rx.recv_timeout(EVAL_TIMEOUT).is_err() {
            watchdog_handle.terminate_execution();
        }
    });

    let started = Instant::now();
    let outcome = evaluate(&mut isolate, &shaped.source, extensions);
    let elapsed = started.elapsed();

    let _ = done_tx.send(());
    let _ = watchdog.join();

    // SAFETY: the isolate (and therefore every callback that might read
    // `oom_state_ptr`) is dropped at the end of this function, after
    // which nothing will dereference the pointer again.
    let _oom_state = unsafe { Box::from_raw(oom_state_ptr) };

    // The OOM callback and the watchdog both terminate the isolate, which
    // V8 reports identically (`has_terminated() == true`) either way — so
    // the OOM flag, not the error variant, decides which sentinel wins
    // when a script gets killed. Check it first.
    let raw = match outcome {
        Err(e) if oom_flag.is_set() => {
            warn!(potat_id = %potat_id, kind = ?e, "evaluation hit memory budget");
            GuestFailure::Oom.sentinel()
        }
        Ok(s) => {
            debug!(potat_id = %potat_id, elapsed_ms = %elapsed.as_millis(), "evaluation completed");
            s
        }
        Err(GuestFailure::Timeout) => {
            warn!(potat_id = %potat_id, "evaluation timed out");
            GuestFailure::Timeout.sentinel()
        }
        Err(e) => {
            warn!(potat_id = %potat_id, kind = ?e, "evaluation failed");
            e.sentinel()
        }
    };

    // isolate is dropped here, disposing it regardless of outcome.
    drop(isolate);

    truncate_utf16(&raw, MAX_RESULT_UNITS)
}

/// Compiles and runs `source` inside a fresh context, returning the
/// stringified result (the prelude's `toString` guarantees the top-level
/// expression is always a string by the time it settles).
fn evaluate<E: GuestExtensions>(
    isolate: &mut v8::Isolate,
    source: &str,
    extensions: &E,
) -> Result<String, GuestFailure> {
    let mut handle_scope = v8::HandleScope::new(isolate);
    let context = v8::Context::new(&mut handle_scope, Default::default());
    let scope = &mut v8::ContextScope::new(&mut handle_scope, context);

    install_globals(scope, context, extensions);

    let mut try_catch = v8::TryCatch::new(scope);

    let source_text = match v8::String::new(&mut try_catch, source) {
        Some(s) => s,
        None => return Err(GuestFailure::Internal("source too large to compile".to_string())),
    };

    let script = match v8::Script::compile(&mut try_catch, source_text, None) {
        Some(s) => s,
        None => return Err(extract_failure(&mut try_catch)),
    };

    let result = match script.run(&mut try_catch) {
        Some(v) => v,
        None => return Err(extract_failure(&mut try_catch)),
    };

    // `toString` is declared `async`, so the completion value of the
    // top-level `toString(...)` call is always a Promise; resolve it by
    // pumping the microtask queue until it settles.
    if let Ok(promise) = v8::Local::<v8::Promise>::try_from(result) {
        loop {
            match promise.state() {
                v8::PromiseState::Pending => {
                    try_catch.perform_microtask_checkpoint();
                    if try_catch.has_terminated() {
                        return Err(GuestFailure::Timeout);
                    }
                }
                v8::PromiseState::Fulfilled => {
                    let value = promise.result(&mut try_catch);
                    return Ok(value.to_rust_string_lossy(&mut try_catch));
                }
                v8::PromiseState::Rejected => {
                    let value = promise.result(&mut try_catch);
                    return Err(GuestFailure::Threw(describe_guest_value(&mut try_catch, value)));
                }
            }
        }
    }

    Ok(result.to_rust_string_lossy(&mut try_catch))
}

/// Bind `global`, `fetch`, and every `GuestExtensions::inject` binding on
/// the context's global object.
fn install_globals<E: GuestExtensions>(
    scope: &mut v8::HandleScope,
    context: v8::Local<v8::Context>,
    extensions: &E,
) {
    let global = context.global(scope);

    let global_key = v8::String::new(scope, "global").unwrap();
    let global_value: v8::Local<v8::Value> = global.into();
    global.set(scope, global_key.into(), global_value);

    let fetch_key = v8::String::new(scope, "fetch").unwrap();
    let fetch_fn = v8::Function::new(scope, fetch_callback).unwrap();
    global.set(scope, fetch_key.into(), fetch_fn.into());

    extensions.inject(scope, global);
}

/// The `global.fetch(url, options)` binding (spec §4.4 step 4). Blocks the
/// isolate's worker thread on the async bridge call — acceptable because
/// `spawn_blocking` threads are not part of the tokio reactor, so this
/// never stalls unrelated requests.
fn fetch_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let url = args.get(0).to_rust_string_lossy(scope);

    let options: evalsrv_net::FetchOptions = if args.length() > 1 && args.get(1).is_object() {
        serde_v8::from_v8(scope, args.get(1)).unwrap_or_default()
    } else {
        evalsrv_net::FetchOptions::default()
    };

    let (bridge, ctx, tokio_handle) = {
        let state = scope
            .get_slot::<FetchState>()
            .expect("fetch state must be set before guest script runs");
        (state.bridge.clone(), state.ctx.clone(), state.tokio_handle.clone())
    };

    let response = tokio_handle.block_on(bridge.fetch(&url, options, &ctx));

    match serde_v8::to_v8(scope, &response) {
        Ok(value) => rv.set(value),
        Err(_) => rv.set(v8::undefined(scope).into()),
    }
}

/// Turn a `TryCatch`'s pending exception into a [`GuestFailure`], or
/// `Timeout` if the isolate was terminated by the watchdog (V8 surfaces
/// `terminate_execution` as an empty result with no catchable exception).
fn extract_failure(try_catch: &mut v8::TryCatch<v8::HandleScope>) -> GuestFailure {
    if try_catch.has_terminated() {
        return GuestFailure::Timeout;
    }
    match try_catch.exception() {
        Some(exc) => GuestFailure::Threw(describe_guest_value(try_catch, exc)),
        None => GuestFailure::Internal("script failed with no exception".to_string()),
    }
}

/// Render a thrown guest value as `"<Constructor>: <message>"` when it
/// looks like an `Error`, falling back to its string form otherwise —
/// mirrors the prelude's own `toString` resolution for `Error` instances,
/// for the cases that never reach the guest's `toString` at all (a
/// compile failure, a termination).
fn describe_guest_value(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> String {
    if let Ok(obj) = v8::Local::<v8::Object>::try_from(value) {
        let name_key = v8::String::new(scope, "name").unwrap();
        let name = obj.get(scope, name_key.into());
        let message_key = v8::String::new(scope, "message").unwrap();
        let message = obj.get(scope, message_key.into());
        if let (Some(name), Some(message)) = (name, message) {
            if !name.is_undefined() {
                let name_str = name.to_rust_string_lossy(scope);
                let message_str = message.to_rust_string_lossy(scope);
                return format!("{name_str}: {message_str}");
            }
        }
    }
    value.to_rust_string_lossy(scope)
}

/// Truncate `s` to at most `max_units` UTF-16 code units, matching spec
/// §4.4 step 9. Splits at a UTF-16-safe boundary (never mid-surrogate-pair).
fn truncate_utf16(s: &str, max_units: usize) -> String {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() <= max_units {
        return s.to_string();
    }
    String::from_utf16_lossy(&units[..max_units])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_noop_under_limit() {
        assert_eq!(truncate_utf16("hello", 3000), "hello");
    }

    #[test]
    fn truncate_cuts_to_exact_length() {
        let long = "x".repeat(4000);
        let truncated = truncate_utf16(&long, 3000);
        assert_eq!(truncated.encode_utf16().count(), 3000);
    }

    #[test]
    fn truncate_handles_surrogate_pairs() {
        // Each of these emoji is two UTF-16 code units.
        let s = "😀".repeat(2000);
        let truncated = truncate_utf16(&s, 3000);
        assert_eq!(truncated.encode_utf16().count(), 3000);
        assert_eq!(truncated.chars().count(), 1500);
    }
}
