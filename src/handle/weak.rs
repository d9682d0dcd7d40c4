use std::marker::PhantomData;

use crate::common::consts::PROMOTE_RETRY_LIMIT;
use crate::count::RefCounted;
use crate::handle::Handle;
use crate::node::NodeRef;
use crate::registry::{Embedded, Invalidation};
use crate::runtime::PromoteError;

///////////////////////////////
/// RAII weak-observation value: owns one unit of the weak node's own strong
/// count and nothing of the target. The target may die while any number of
/// these exist; the node outlives it and keeps answering promotion attempts
/// with "empty".
pub struct WeakHandle<T: RefCounted, D: Invalidation<T> = Embedded> {
    node: NodeRef,
    dir: D,
    _target: PhantomData<*mut T>,
}

unsafe impl<T, D> Send for WeakHandle<T, D>
where
    T: RefCounted + Send + Sync,
    D: Invalidation<T> + Send,
{
}

unsafe impl<T, D> Sync for WeakHandle<T, D>
where
    T: RefCounted + Send + Sync,
    D: Invalidation<T> + Sync,
{
}

impl<T: RefCounted, D: Invalidation<T>> WeakHandle<T, D> {
    pub(crate) fn from_node(node: NodeRef, dir: D) -> Self {
        Self {
            node,
            dir,
            _target: PhantomData,
        }
    }

    /// Attempt to mint a new strong handle, with the default retry budget.
    pub fn try_promote(&self) -> Result<Handle<T, D>, PromoteError> {
        self.try_promote_bounded(PROMOTE_RETRY_LIMIT)
    }

    /// [`Self::try_promote`] with an explicit compare-exchange budget for
    /// callers tuning the contention/latency trade.
    pub fn try_promote_bounded(&self, limit: usize) -> Result<Handle<T, D>, PromoteError> {
        // The node was created for a T by the directory that minted us.
        let owner = unsafe { self.node.promote_raw::<T>(limit) }?;
        Ok(unsafe { Handle::from_retained(owner, self.dir.clone()) })
    }

    /// The flattened form: a handle when the owner is still alive and the
    /// race was won, `None` otherwise.
    pub fn promote(&self) -> Option<Handle<T, D>> {
        self.try_promote().ok()
    }

    /// Whether the back-pointer was severed at the time of the read.
    /// Diagnostic; `false` does not promise the next promotion succeeds.
    pub fn is_invalidated(&self) -> bool {
        self.node.is_invalidated()
    }

    /// Two weak handles watching through the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.node.ptr_eq(&other.node)
    }
}

impl<T: RefCounted, D: Invalidation<T>> Clone for WeakHandle<T, D> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            dir: self.dir.clone(),
            _target: PhantomData,
        }
    }
}

impl<T: RefCounted, D: Invalidation<T>> std::fmt::Debug for WeakHandle<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHandle")
            .field("node", &self.node.as_ptr())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use crate::count::RefCount;
    use crate::registry::{CentralDirectory, HasWeakSlot, WeakSlot};

    struct Probe {
        count: RefCount,
        drops: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(drops: &Arc<AtomicUsize>) -> Self {
            Self {
                count: RefCount::new(),
                drops: Arc::clone(drops),
            }
        }
    }

    impl RefCounted for Probe {
        fn ref_count(&self) -> &RefCount {
            &self.count
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Slotted {
        count: RefCount,
        slot: WeakSlot,
        drops: Arc<AtomicUsize>,
    }

    impl Slotted {
        fn new(drops: &Arc<AtomicUsize>) -> Self {
            Self {
                count: RefCount::new(),
                slot: WeakSlot::new(),
                drops: Arc::clone(drops),
            }
        }
    }

    impl RefCounted for Slotted {
        fn ref_count(&self) -> &RefCount {
            &self.count
        }
    }

    impl HasWeakSlot for Slotted {
        fn weak_slot(&self) -> &WeakSlot {
            &self.slot
        }
    }

    impl Drop for Slotted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn promote_succeeds_while_a_strong_handle_lives() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let h = dir.manage(Probe::new(&drops));
        let w = h.downgrade().unwrap();

        for _ in 0..100 {
            let h2 = w.promote().expect("owner is held");
            assert!(h.ptr_eq(&h2));
        }
        assert_eq!(h.strong(), 1);
    }

    #[test]
    fn promote_under_contention_never_claims_a_live_owner_dead() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let h = dir.manage(Probe::new(&drops));
        let w = h.downgrade().unwrap();

        crossbeam::scope(|s| {
            for _ in 0..8 {
                let w = w.clone();
                s.spawn(move |_| {
                    for _ in 0..1_000 {
                        match w.try_promote() {
                            Ok(h2) => drop(h2),
                            // A lost race is the only acceptable failure
                            // while the owner is pinned by `h`.
                            Err(e) => assert!(e.is_retryable(), "live owner reported: {e}"),
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(h.strong(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn promote_after_full_release_is_empty_from_any_thread() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let h = dir.manage(Probe::new(&drops));
        let w = h.downgrade().unwrap();

        drop(h);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        crossbeam::scope(|s| {
            for _ in 0..8 {
                let w = w.clone();
                s.spawn(move |_| {
                    for _ in 0..200 {
                        assert_eq!(w.try_promote().unwrap_err(), PromoteError::Invalidated);
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn zero_budget_promotion_reports_contended() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let h = dir.manage(Probe::new(&drops));
        let w = h.downgrade().unwrap();

        let err = w.try_promote_bounded(0).unwrap_err();
        assert_eq!(err, PromoteError::Contended { limit: 0 });
        assert!(err.is_retryable());
    }

    #[test]
    fn weak_outlives_owner() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let h = dir.manage(Probe::new(&drops));

        let w = h.downgrade().unwrap();
        let w2 = w.clone();

        drop(h);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(dir.tracked(), 0);
        assert!(w.is_invalidated());

        // The node stays answerable until the last watcher lets go.
        drop(w);
        assert!(w2.promote().is_none());
        drop(w2);
    }

    fn race_final_release_against_promoters<F, T, D>(make: F)
    where
        F: Fn(&Arc<AtomicUsize>) -> Handle<T, D>,
        T: RefCounted + Send + Sync,
        D: crate::registry::WeakDirectory<T> + Send + Sync,
    {
        const ROUNDS: usize = 200;
        const PROMOTERS: usize = 4;
        const CAP: usize = 5_000;

        for _ in 0..ROUNDS {
            let drops = Arc::new(AtomicUsize::new(0));
            let h = make(&drops);
            let w = h.downgrade().unwrap();

            crossbeam::scope(|s| {
                for _ in 0..PROMOTERS {
                    let w = w.clone();
                    s.spawn(move |_| {
                        for _ in 0..CAP {
                            match w.try_promote() {
                                Ok(h2) => drop(h2),
                                Err(PromoteError::Contended { .. }) => continue,
                                Err(_) => break,
                            }
                        }
                    });
                }
                s.spawn(move |_| drop(h));
            })
            .unwrap();

            // Whoever held the last unit finalized; nobody did it twice and
            // nobody re-animated the object afterwards.
            assert_eq!(drops.load(Ordering::SeqCst), 1);
            assert!(w.promote().is_none());
        }
    }

    #[test]
    fn promotion_races_with_final_release_central() {
        let dir = CentralDirectory::new();
        race_final_release_against_promoters(move |drops| dir.manage(Probe::new(drops)));
    }

    #[test]
    fn promotion_races_with_final_release_embedded() {
        race_final_release_against_promoters(|drops| Handle::new(Slotted::new(drops)));
    }

    #[test]
    fn randomized_stress_over_one_shared_object() {
        let _ = env_logger::builder().is_test(true).try_init();

        const THREADS: u64 = 8;
        const OPS: usize = 4_000;

        let drops = Arc::new(AtomicUsize::new(0));
        let dir = CentralDirectory::new();
        let root = dir.manage(Probe::new(&drops));
        let (tx, rx) = crossbeam::channel::unbounded();

        crossbeam::scope(|s| {
            for seed in 0..THREADS {
                let tx = tx.clone();
                let root = root.clone();
                s.spawn(move |_| {
                    let mut rng = SmallRng::seed_from_u64(seed);
                    let weak = root.downgrade().unwrap();
                    let mut held = vec![root.clone()];
                    let mut promoted = 0usize;

                    for _ in 0..OPS {
                        match rng.gen_range(0..4u8) {
                            0 => held.push(root.clone()),
                            1 => {
                                if !held.is_empty() {
                                    let i = rng.gen_range(0..held.len());
                                    held.swap_remove(i);
                                }
                            }
                            2 => drop(root.downgrade().unwrap()),
                            _ => {
                                if let Ok(h) = weak.try_promote() {
                                    promoted += 1;
                                    drop(h);
                                }
                            }
                        }
                    }
                    tx.send(promoted).unwrap();
                });
            }
            drop(tx);
        })
        .unwrap();

        let promoted: usize = rx.iter().sum();
        assert!(promoted > 0);

        // Every transient unit went back; only the root handle is left.
        assert_eq!(root.strong(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let weak = root.downgrade().unwrap();
        drop(root);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(weak.promote().is_none());
        assert_eq!(dir.tracked(), 0);
    }
}
