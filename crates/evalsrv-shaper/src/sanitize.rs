//! Strips known-large fields out of `msg` before it is embedded into the
//! guest script, per spec §4.3.

use serde_json::Value;
use tracing::debug;

/// JSON-pointer-style paths removed unconditionally, if present.
const STRIPPED_PATHS: &[&[&str]] = &[
    &["channel", "data", "command_stats"],
    &["channel", "commands"],
    &["command", "description"],
    &["channel", "blocks"],
];

/// Return a sanitized deep copy of `msg` with the known-large fields
/// removed. The input is never mutated in place, so the caller (and any
/// other consumer of the original `msg`) is unaffected.
pub fn sanitize(msg: &Value) -> Value {
    let mut copy = msg.clone();
    let mut stripped = 0u32;
    for path in STRIPPED_PATHS {
        if remove_path(&mut copy, path) {
            stripped += 1;
        }
    }
    if stripped > 0 {
        debug!(stripped, "sanitized msg fields before guest embedding");
    }
    copy
}

/// Remove the field at `path` (a sequence of object keys) if every
/// intermediate segment is itself an object. Returns `true` if something
/// was actually removed.
fn remove_path(value: &mut Value, path: &[&str]) -> bool {
    let (last, prefix) = match path.split_last() {
        Some(split) => split,
        None => return false,
    };

    let mut cursor = value;
    for key in prefix {
        match cursor.get_mut(*key) {
            Some(next) if next.is_object() => cursor = next,
            _ => return false,
        }
    }

    match cursor.as_object_mut() {
        Some(map) => map.remove(*last).is_some(),
        None => false,
    }
}
