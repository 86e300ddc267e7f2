//! The Isolate Runner's internal failure type. Per spec §7 these never
//! escape `run()` as an `Err` — every variant is folded into the
//! `"🚫 <ErrorKindName>: <message>"` sentinel string instead.

use std::fmt;

#[derive(Debug, Clone)]
pub enum GuestFailure {
    /// The guest script threw or its top-level promise rejected.
    Threw(String),
    /// The 5000ms wall-clock budget elapsed before the script settled.
    Timeout,
    /// The isolate's heap limit was hit (spec §4.4: "catastrophic error").
    Oom,
    /// Anything else on the host side: compile failure, context setup,
    /// a panicked callback, etc.
    Internal(String),
}

impl GuestFailure {
    /// Render as the sentinel string returned in place of a result.
    ///
    /// `Threw`'s message is already shaped as `"<ErrorKindName>: <message>"`
    /// by [`describe_guest_value`](crate::instance), mirroring the guest's
    /// own `toString` resolution for `Error` instances (spec §4.3), so it is
    /// not wrapped again here — spec §8 scenario 5 expects exactly
    /// `"🚫 TypeError: x"`, not `"🚫 GuestThrew: TypeError: x"`. The other
    /// variants have no guest-supplied kind name, so they fall back to the
    /// host-side error kind from spec §7.
    pub fn sentinel(&self) -> String {
        match self {
            GuestFailure::Threw(m) => format!("🚫 {m}"),
            GuestFailure::Timeout => "🚫 GuestTimeout: evaluation exceeded the time budget".to_string(),
            GuestFailure::Oom => "🚫 IsolateCatastrophic: isolate exceeded its memory budget".to_string(),
            GuestFailure::Internal(m) => format!("🚫 IsolateCatastrophic: {m}"),
        }
    }
}

impl fmt::Display for GuestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sentinel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threw_sentinel_carries_message_without_relabeling() {
        let sentinel = GuestFailure::Threw("ReferenceError: x is not defined".to_string()).sentinel();
        assert_eq!(sentinel, "🚫 ReferenceError: x is not defined");
    }

    #[test]
    fn threw_sentinel_matches_type_error_scenario() {
        let sentinel = GuestFailure::Threw("TypeError: x".to_string()).sentinel();
        assert_eq!(sentinel, "🚫 TypeError: x");
    }

    #[test]
    fn timeout_sentinel_is_stable() {
        assert_eq!(
            GuestFailure::Timeout.sentinel(),
            "🚫 GuestTimeout: evaluation exceeded the time budget"
        );
    }

    #[test]
    fn oom_reports_as_isolate_catastrophic() {
        assert!(GuestFailure::Oom.sentinel().starts_with("🚫 IsolateCatastrophic: "));
    }
}
