pub mod address_guard;
pub mod bridge;
pub mod dns_guard;

pub use address_guard::{BlockedAddress, guard_or_fail, is_blocked};
pub use bridge::{FetchOptions, FetchResponse, OutboundBridge};
pub use dns_guard::GuardedResolver;
