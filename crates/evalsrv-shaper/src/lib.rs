pub mod prelude;
pub mod sanitize;
pub mod shaper;

pub use sanitize::sanitize;
pub use shaper::{ShapedScript, shape};
