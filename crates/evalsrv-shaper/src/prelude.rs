//! The fixed preamble evaluated before user code (spec §4.3): strict mode,
//! the `toString` stringification helper, and the sanitized `msg` binding.

use serde_json::Value;

use crate::sanitize::sanitize;

const TO_STRING_HELPER: &str = r#"
async function toString(value) {
  if (typeof value === "string") {
    return value;
  }
  if (value instanceof Error) {
    return `${value.constructor.name}: ${value.message}`;
  }
  if (value instanceof Promise) {
    return toString(await value);
  }
  if (Array.isArray(value)) {
    const parts = [];
    for (const item of value) {
      parts.push(await toString(item));
    }
    return parts.join(", ");
  }
  return JSON.stringify(value);
}
"#;

/// Build the prelude for one evaluation: strict mode, `toString`, and a
/// `msg` binding that is a deep, host-reference-free copy of the sanitized
/// message. Embedding `msg` as a double-JSON-stringified literal (parsed
/// back by `JSON.parse` inside the guest) guarantees the guest only ever
/// sees a value, never a live reference into host memory.
pub fn build_prelude(msg: &Value) -> String {
    let sanitized = sanitize(msg);
    // Stringify once to get JSON text, then stringify *that string* so it
    // can be embedded as a single JS string literal without worrying about
    // quote/backslash escaping inside the JSON payload itself.
    let json_text = serde_json::to_string(&sanitized).unwrap_or_else(|_| "null".to_string());
    let double_encoded =
        serde_json::to_string(&json_text).unwrap_or_else(|_| "\"null\"".to_string());

    format!(
        "\"use strict\";\n{TO_STRING_HELPER}\nconst msg = JSON.parse({double_encoded});\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prelude_contains_strict_mode_and_helper() {
        let prelude = build_prelude(&Value::Null);
        assert!(prelude.starts_with("\"use strict\";"));
        assert!(prelude.contains("async function toString"));
    }

    #[test]
    fn prelude_embeds_sanitized_msg_as_double_encoded_literal() {
        let msg = json!({"channel": {"blocks": true}, "user": {"name": "ryan"}});
        let prelude = build_prelude(&msg);
        assert!(prelude.contains("const msg = JSON.parse("));
        // The stripped field must not appear anywhere, even inside the
        // double-encoded string literal.
        assert!(!prelude.contains("blocks"));
        assert!(prelude.contains("ryan"));
    }
}
