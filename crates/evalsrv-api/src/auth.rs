//! Auth comparison for `POST /eval` (spec §4.6, §9 "Fixed-length auth
//! buffer").
//!
//! Preserved bit-exactly per spec: both sides are placed into fixed
//! 5-byte buffers (zero-padded or truncated) before comparison. This is a
//! known weakness inherited from the source system — any token sharing
//! its first 5 bytes with the configured secret authenticates
//! successfully — kept deliberately rather than widened to a full-length
//! comparison, per spec §9.

const BUFFER_LEN: usize = 5;

fn fixed_buffer(s: &str) -> [u8; BUFFER_LEN] {
    let mut buf = [0u8; BUFFER_LEN];
    let bytes = s.as_bytes();
    let n = bytes.len().min(BUFFER_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Length-independent comparison (both sides are normalized to the same
/// fixed size first) of the first 5 bytes of `token` against the first 5
/// bytes of `secret`.
pub fn constant_time_eq_5(token: &str, secret: &str) -> bool {
    let a = fixed_buffer(token);
    let b = fixed_buffer(secret);
    let mut diff = 0u8;
    for i in 0..BUFFER_LEN {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

/// Extract the bearer token from an `Authorization` header value, if it
/// is well-formed (`Bearer <token>`).
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}
