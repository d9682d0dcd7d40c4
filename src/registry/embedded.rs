use crate::common::UnsafeMutPtr;
use crate::count::RefCounted;
use crate::handle::{Handle, WeakHandle};
use crate::node::{NodeRef, WeakNode};
use crate::registry::{Invalidation, WeakDirectory};
use crate::runtime::Error;

///////////////////////////////
/// Per-object node storage for the embedded strategy. The node is allocated
/// when the slot is constructed and pointed at its owner when the first
/// handle is created, so lookups never touch shared state and contention is
/// scoped to one object.
pub struct WeakSlot {
    node: NodeRef,
}

impl WeakSlot {
    pub fn new() -> Self {
        Self {
            node: WeakNode::alloc(UnsafeMutPtr::null()),
        }
    }
}

impl Default for WeakSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeakSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakSlot")
            .field("bound", &!self.node.is_invalidated())
            .finish()
    }
}

/// Managed types that carry their own weak node.
pub trait HasWeakSlot: RefCounted {
    fn weak_slot(&self) -> &WeakSlot;
}

///////////////////////////////
/// The in-owner strategy: no shared table, one extra allocation and mutex
/// per object. Zero-sized, so handles under this strategy stay
/// pointer-sized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Embedded;

impl<T: HasWeakSlot> Invalidation<T> for Embedded {
    fn attach(&self, owner: *mut T) {
        // The object always carries a node, so the release path must always
        // run invalidation: flag it up front.
        unsafe {
            (*owner).ref_count().set_weak();
            (*owner).weak_slot().node.bind(UnsafeMutPtr::new(owner as *mut ()));
        }
    }

    fn invalidate(&self, owner: &T) {
        owner.weak_slot().node.invalidate();
        log::trace!("weak node for owner {:p} invalidated", owner);
    }
}

impl<T: HasWeakSlot> WeakDirectory<T> for Embedded {
    fn create_or_get(&self, target: &Handle<T, Self>) -> Result<WeakHandle<T, Self>, Error> {
        let slot = target.weak_slot();
        // While a strong handle exists, a severed node can only mean the
        // object never went through attach (raw composition misuse).
        if slot.node.is_invalidated() {
            return Err(Error::UnboundSlot);
        }
        Ok(WeakHandle::from_node(slot.node.clone(), Embedded))
    }
}
