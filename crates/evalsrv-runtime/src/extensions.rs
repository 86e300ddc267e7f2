//! `GuestExtensions` stands in for the distilled source's opaque
//! `Utils.inject(jail)` collaborator (spec §4.4 step 3, spec §9 glossary):
//! an injection point that populates additional guest globals before user
//! code runs, kept separate from the fixed prelude (`evalsrv-shaper`) so
//! new bindings can be added without touching the shaping logic.

use v8::HandleScope;

/// Implemented by anything that wants to add bindings to a freshly
/// created guest context, beyond the fixed prelude and the `fetch`
/// bridge. The Isolate Runner calls `inject` once per evaluation, right
/// after the context is entered and before the shaped script runs.
pub trait GuestExtensions {
    fn inject<'s>(&self, scope: &mut HandleScope<'s>, global: v8::Local<'s, v8::Object>);
}

/// The extension set this service ships with: nothing beyond what the
/// prelude and fetch binding already provide, plus a `console.log` that
/// forwards to `tracing` so guest-side debugging doesn't silently vanish.
#[derive(Clone, Copy, Default)]
pub struct DefaultExtensions;

impl GuestExtensions for DefaultExtensions {
    fn inject<'s>(&self, scope: &mut HandleScope<'s>, global: v8::Local<'s, v8::Object>) {
        let console_key = v8::String::new(scope, "console").unwrap();
        let console = v8::Object::new(scope);

        let log_key = v8::String::new(scope, "log").unwrap();
        let log_fn = v8::Function::new(scope, console_log_callback).unwrap();
        console.set(scope, log_key.into(), log_fn.into());

        global.set(scope, console_key.into(), console.into());
    }
}

fn console_log_callback(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut _rv: v8::ReturnValue,
) {
    let mut parts = Vec::with_capacity(args.length() as usize);
    for i in 0..args.length() {
        parts.push(args.get(i).to_rust_string_lossy(scope));
    }
    tracing::debug!(target: "evalsrv_runtime::guest_console", message = %parts.join(" "));
}
