//! Intrusive strong/weak reference counting for objects shared across
//! threads. Objects embed their own atomic counter; weak observers own a
//! small independently counted node whose back-pointer is severed, under a
//! lock shared with every promotion attempt, before the object's storage is
//! ever reclaimed.

pub mod common;
pub mod count;
pub mod handle;
pub mod node;
pub mod registry;
pub mod runtime;

pub use count::{RefCount, RefCounted, ReleaseOutcome, TryRetain};
pub use handle::{Handle, WeakHandle};
pub use node::WeakNode;
pub use registry::{
    CentralDirectory, Embedded, HasWeakSlot, Invalidation, Unregistered, WeakDirectory, WeakSlot,
};
pub use runtime::{Error, PromoteError};
