use std::ptr::NonNull;
use std::sync::Mutex;

use crate::common::UnsafeMutPtr;
use crate::count::{RefCount, RefCounted, TryRetain};
use crate::handle::Handle;
use crate::registry::Unregistered;
use crate::runtime::PromoteError;

/// Strong handle to a node. Nodes are managed objects themselves; nobody
/// ever watches a node weakly, so they go through the no-op strategy.
pub(crate) type NodeRef = Handle<WeakNode, Unregistered>;

///////////////////////////////
/// The intermediary a weak handle actually owns: a nullable back-pointer to
/// the owner plus the node's own independent strong count.
///
/// The back-pointer is advisory. Promotion must re-check the owner's live
/// counter while holding the node mutex; invalidation takes the same mutex
/// before the owner's storage is reclaimed, so a promotion that sees a
/// non-null pointer is guaranteed the owner memory is still intact, even
/// when the owner's count has already hit zero.
pub struct WeakNode {
    count: RefCount,
    target: Mutex<UnsafeMutPtr<()>>,
}

impl RefCounted for WeakNode {
    fn ref_count(&self) -> &RefCount {
        &self.count
    }
}

impl WeakNode {
    /// Allocate a node pointing at `target` (possibly null for a slot that
    /// has not been bound yet) and hand back its first strong reference.
    pub(crate) fn alloc(target: UnsafeMutPtr<()>) -> NodeRef {
        let node = Box::into_raw(Box::new(WeakNode {
            count: RefCount::new(),
            target: Mutex::new(target),
        }));
        unsafe {
            (*node).count.retain();
            Handle::from_retained(NonNull::new_unchecked(node), Unregistered)
        }
    }

    /// Point a not-yet-bound node at its owner.
    pub(crate) fn bind(&self, owner: UnsafeMutPtr<()>) {
        let mut target = self.target.lock().unwrap();
        debug_assert!(target.is_null(), "node already bound to an owner");
        *target = owner;
    }

    /// Sever the back-pointer. Idempotent; serialized against every
    /// promotion attempt by the node mutex.
    pub(crate) fn invalidate(&self) {
        let mut target = self.target.lock().unwrap();
        *target = UnsafeMutPtr::null();
    }

    /// Whether the back-pointer has been severed (or never bound).
    /// Diagnostic; a promotion may still lose the race after this reads
    /// false.
    pub fn is_invalidated(&self) -> bool {
        self.target.lock().unwrap().is_null()
    }

    /// Attempt to mint a new strong reference to the owner.
    ///
    /// Holds the node mutex across the whole attempt: the null check refuses
    /// an invalidated node immediately, and the bounded conditional retain
    /// runs on the owner's counter *under the same lock* the release path
    /// takes before reclaiming the owner. The counter read is authoritative;
    /// a stale back-pointer alone can never yield a reference to freed
    /// memory.
    ///
    /// # Safety
    /// The node must have been created for an owner of type `T`.
    pub(crate) unsafe fn promote_raw<T: RefCounted>(
        &self,
        limit: usize,
    ) -> Result<NonNull<T>, PromoteError> {
        let target = self.target.lock().unwrap();

        let Some(owner) = NonNull::new(target.mut_ptr() as *mut T) else {
            return Err(PromoteError::Invalidated);
        };

        match owner.as_ref().ref_count().try_retain_bounded(limit) {
            TryRetain::Retained => Ok(owner),
            TryRetain::Dead => Err(PromoteError::Dead),
            TryRetain::Contended => {
                log::debug!(
                    "promotion of {:p} gave up after {} contended exchanges",
                    owner.as_ptr(),
                    limit
                );
                Err(PromoteError::contended(limit))
            }
        }
    }
}
