//! Shaping decision (spec §4.3): detect whether `code` must run as a
//! statement block (async-wrapped) or can run as a bare expression
//! (reflective `eval`), then assemble the final script text.

use serde_json::Value;

use crate::prelude::build_prelude;

/// The fully assembled script, ready to hand to the Isolate Runner.
pub struct ShapedScript {
    pub source: String,
    /// True if `code` was wrapped in the async-function form. The Isolate
    /// Runner uses this to decide whether it needs to bind a guest-side
    /// `evaluate` reference (spec §4.4 step 5).
    pub is_async_wrap: bool,
}

/// `code` containing a free-standing `return` or `await` cannot run as a
/// top-level expression (both are illegal there), so it is wrapped in an
/// async IIFE instead. This is a deliberate substring heuristic, not a
/// tokenizer — see spec §9 "Substring-based async detection".
fn needs_async_wrap(code: &str) -> bool {
    code.contains("return") || code.contains("await")
}

/// Escape `code` for embedding inside a single-quoted JS string literal
/// passed to `eval(...)`.
fn escape_for_eval_literal(code: &str) -> String {
    code.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Shape `code` + `msg` into the final script text handed to the guest.
pub fn shape(code: &str, msg: &Value) -> ShapedScript {
    let prelude = build_prelude(msg);

    if needs_async_wrap(code) {
        // `code` runs through a direct `eval` rather than being inlined
        // into the function body verbatim: a function body that never
        // hits an explicit `return` resolves to `undefined`, so inlining
        // would silently discard the completion value of an await-only
        // snippet like `await fetch(...).then(r => r.status)` (spec §8
        // scenario 3). Routing it through `return eval('<code>')` instead
        // makes the *eval's* completion value (the last evaluated
        // statement) the function's return value; a `return` already
        // present in `code` still works as expected, since direct `eval`
        // called from inside a function forwards its own `return` out to
        // that function.
        let escaped = escape_for_eval_literal(code);
        let body = format!(
            "globalThis.evaluate = async function evaluate() {{\n  return eval('{escaped}');\n}};\ntoString(evaluate());"
        );
        ShapedScript {
            source: format!("{prelude}{body}"),
            is_async_wrap: true,
        }
    } else {
        let escaped = escape_for_eval_literal(code);
        let body = format!("toString(eval('{escaped}'));");
        ShapedScript {
            source: format!("{prelude}{body}"),
            is_async_wrap: false,
        }
    }
}
