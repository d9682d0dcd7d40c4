use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::common::UnsafeMutPtr;
use crate::count::RefCounted;
use crate::handle::{Handle, WeakHandle};
use crate::node::{NodeRef, WeakNode};
use crate::registry::{Invalidation, WeakDirectory};
use crate::runtime::Error;

///////////////////////////////
/// The map strategy: one explicitly owned `owner address -> node` table
/// behind a single mutex. Clones share the table, so whoever constructs
/// managed objects hands copies around instead of reaching for a global.
///
/// The map lock covers lookup/insert/remove only; promotion serializes
/// against invalidation on the node's own mutex, and lock order is always
/// map before node, so the two locks can never form a cycle.
#[derive(Clone, Default)]
pub struct CentralDirectory {
    inner: Arc<CentralInner>,
}

#[derive(Default)]
struct CentralInner {
    nodes: Mutex<FxHashMap<usize, NodeRef>>,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Box a fresh object and hand back its first strong handle, wired to
    /// this directory.
    pub fn manage<T: RefCounted>(&self, value: T) -> Handle<T, Self> {
        Handle::new_in(value, self.clone())
    }

    /// Number of owners currently tracked. Diagnostic.
    pub fn tracked(&self) -> usize {
        self.inner.nodes.lock().unwrap().len()
    }
}

impl<T: RefCounted> Invalidation<T> for CentralDirectory {
    fn invalidate(&self, owner: &T) {
        let key = owner as *const T as usize;
        let node = self.inner.nodes.lock().unwrap().remove(&key);
        if let Some(node) = node {
            // Map entry is gone; severing the back-pointer under the node
            // mutex is what fences off in-flight promotions.
            node.invalidate();
            log::trace!("weak node for owner {:#x} invalidated", key);
        }
    }
}

impl<T: RefCounted> WeakDirectory<T> for CentralDirectory {
    fn create_or_get(&self, target: &Handle<T, Self>) -> Result<WeakHandle<T, Self>, Error> {
        let key = target.as_ptr() as usize;
        let mut nodes = self.inner.nodes.lock().unwrap();
        let node = match nodes.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // The caller holds a strong handle, so the owner cannot
                // begin finalizing while the flag and entry go in.
                target.ref_count().set_weak();
                let owner = target.as_ptr() as *mut T as *mut ();
                let node = WeakNode::alloc(UnsafeMutPtr::new(owner));
                log::debug!("weak node registered for owner {:#x}", key);
                entry.insert(node.clone());
                node
            }
        };
        drop(nodes);
        Ok(WeakHandle::from_node(node, self.clone()))
    }
}
