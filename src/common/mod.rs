pub mod consts;
mod ptr;

pub use ptr::*;
