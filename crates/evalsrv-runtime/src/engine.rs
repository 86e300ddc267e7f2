//! One-time V8 platform initialization plus the handful of tuning knobs
//! every isolate is built with: one process-wide handle, cheap to clone,
//! created once at startup and handed to every evaluation.

use std::sync::Once;
use std::time::Duration;

/// Per-evaluation heap cap (spec §4.4 step 1).
pub const MEMORY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// Per-evaluation wall-clock cap (spec §4.4 step 6).
pub const EVAL_TIMEOUT: Duration = Duration::from_millis(5000);

static INIT: Once = Once::new();

/// Initialize the V8 platform exactly once per process. Safe to call from
/// every `EvalEngine::new` — subsequent calls are no-ops.
fn init_platform() {
    INIT.call_once(|| {
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform);
        v8::V8::initialize();
    });
}

/// Process-wide handle shared by every evaluation. Holds nothing guest-
/// specific — isolates are created fresh per call in `instance.rs` — but
/// gives the rest of the crate a single place to depend on for "V8 is
/// ready to use".
#[derive(Clone, Copy, Debug, Default)]
pub struct EvalEngine;

impl EvalEngine {
    pub fn new() -> Self {
        init_platform();
        EvalEngine
    }
}
