pub mod engine;
pub mod error;
pub mod extensions;
pub mod instance;
pub mod limiter;

pub use engine::EvalEngine;
pub use error::GuestFailure;
pub use extensions::{DefaultExtensions, GuestExtensions};
pub use instance::IsolateRunner;
