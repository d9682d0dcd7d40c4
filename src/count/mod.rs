mod refcount;

pub use refcount::*;
