mod strong;
mod weak;

pub use strong::*;
pub use weak::*;
