//! Heap-limit enforcement: deny growth past a cap, flag the instance as
//! poisoned, adapted to V8's near-heap-limit callback mechanism, since V8
//! isolates don't expose a pre-allocation "may I grow" hook the way
//! Wasmtime's `ResourceLimiter` trait does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between the near-heap-limit callback (run on V8's internal GC
/// thread context) and the evaluation loop that checks it afterwards.
#[derive(Clone, Default)]
pub struct OomFlag(Arc<AtomicBool>);

impl OomFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything [`terminating_near_heap_limit_callback`] needs: the flag the
/// evaluation loop polls afterwards, plus a handle that lets the callback
/// stop the runaway script immediately instead of waiting for it to trip
/// the limit again on the next allocation.
pub struct OomCallbackState {
    pub flag: OomFlag,
    pub isolate_handle: v8::IsolateHandle,
}

/// Registered via `isolate.add_near_heap_limit_callback`. V8 invokes this
/// just before it would otherwise abort the process for running out of
/// heap. We can't deny the allocation outright, so instead: mark the
/// shared flag (read by the evaluation loop to report `IsolateCatastrophic`
/// instead of letting V8 exception-handle it as an ordinary guest error),
/// terminate the isolate to stop further guest work, and return a raised
/// limit so the *next* allocation (freeing up for cleanup) doesn't also
/// trip a hard OOM abort.
pub extern "C" fn terminating_near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` was set from `Box::into_raw(Box::new(OomCallbackState))`
    // when the callback was registered and is never freed while the
    // isolate that holds the callback is alive.
    let state = unsafe { &*(data as *const OomCallbackState) };
    state.flag.set();
    state.isolate_handle.terminate_execution();
    current_heap_limit + 2 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_unset_and_latches() {
        let flag = OomFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn callback_raises_the_limit_and_sets_the_flag() {
        let _engine = crate::engine::EvalEngine::new();
        let mut isolate = v8::Isolate::new(Default::default());
        let flag = OomFlag::new();
        let state = OomCallbackState {
            flag: flag.clone(),
            isolate_handle: isolate.thread_safe_handle(),
        };
        let ptr = &state as *const OomCallbackState as *mut std::ffi::c_void;
        let raised = terminating_near_heap_limit_callback(ptr, 8 * 1024 * 1024, 8 * 1024 * 1024);
        assert!(raised > 8 * 1024 * 1024);
        assert!(flag.is_set());
    }
}
