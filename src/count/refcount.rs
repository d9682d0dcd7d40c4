use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::common::consts::{PROMOTE_RETRY_LIMIT, STRONG_UNIT, WEAK_FLAG};

///////////////////////////////
/// Atomic strong-owner counter embedded in every managed object.
///
/// The word packs `count << 1 | has_weak`; the count only ever moves in
/// whole `STRONG_UNIT` steps paired with handle construction/destruction,
/// so the flag bit survives every transition untouched.
pub struct RefCount {
    bits: AtomicU32,
}

/// What the caller of [`RefCount::release`] must do next. Exactly one
/// release on a given object ever observes `Finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ReleaseOutcome {
    /// Other strong owners remain; nothing to do.
    Live,
    /// This caller observed the zero transition and owns finalization.
    /// When `invalidate_weak` is set, the weak node must be severed before
    /// the object's storage is reclaimed.
    Finalize { invalidate_weak: bool },
}

/// Result of a conditional retain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRetain {
    /// The count was nonzero and was incremented.
    Retained,
    /// The count was observed at zero; the object is finalizing or gone.
    Dead,
    /// The retry budget ran out before the exchange landed.
    Contended,
}

impl RefCount {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Add one strong owner. No failure mode.
    #[inline(always)]
    pub fn retain(&self) {
        self.bits.fetch_add(STRONG_UNIT, Ordering::Relaxed);
    }

    /// Drop one strong owner. The unique caller that observes the count
    /// reaching zero gets `Finalize` and must run finalization; the Acquire
    /// fence orders every prior release before it.
    #[inline(always)]
    pub fn release(&self) -> ReleaseOutcome {
        let prev = self.bits.fetch_sub(STRONG_UNIT, Ordering::Release);
        debug_assert!(prev >= STRONG_UNIT, "release without matching retain");

        let now = prev - STRONG_UNIT;
        if now >= STRONG_UNIT {
            return ReleaseOutcome::Live;
        }
        fence(Ordering::Acquire);
        ReleaseOutcome::Finalize {
            invalidate_weak: now & WEAK_FLAG != 0,
        }
    }

    /// Add one strong owner only if at least one still exists, retrying
    /// contended exchanges up to [`PROMOTE_RETRY_LIMIT`] times.
    #[inline(always)]
    pub fn try_retain(&self) -> TryRetain {
        self.try_retain_bounded(PROMOTE_RETRY_LIMIT)
    }

    /// [`Self::try_retain`] with an explicit retry budget. A budget of zero
    /// always reports `Contended`.
    pub fn try_retain_bounded(&self, limit: usize) -> TryRetain {
        let mut v = self.bits.load(Ordering::Relaxed);
        for _ in 0..limit {
            if v < STRONG_UNIT {
                return TryRetain::Dead;
            }
            match self.bits.compare_exchange_weak(
                v,
                v + STRONG_UNIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return TryRetain::Retained,
                Err(current) => {
                    v = current;
                    std::hint::spin_loop();
                }
            }
        }
        TryRetain::Contended
    }

    /// Mark that a weak node exists for this object. Idempotent.
    pub fn set_weak(&self) {
        let mut v = self.bits.load(Ordering::Relaxed);
        while v & WEAK_FLAG == 0 {
            match self.bits.compare_exchange_weak(
                v,
                v | WEAK_FLAG,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => v = current,
            }
        }
    }

    #[inline(always)]
    pub fn has_weak(&self) -> bool {
        self.bits.load(Ordering::Relaxed) & WEAK_FLAG != 0
    }

    /// Current number of strong owners. Diagnostic only: the value is stale
    /// the instant it is read and must never gate a correctness decision.
    #[inline(always)]
    pub fn strong(&self) -> u32 {
        self.bits.load(Ordering::Relaxed) >> 1
    }

    /// Whether at least one strong owner was visible at the time of the
    /// read. Same staleness caveat as [`Self::strong`].
    #[inline(always)]
    pub fn still_valid(&self) -> bool {
        self.bits.load(Ordering::Relaxed) >= STRONG_UNIT
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefCount")
            .field("strong", &self.strong())
            .field("has_weak", &self.has_weak())
            .finish()
    }
}

///////////////////////////////
/// Capability every managed type composes: access to its embedded counter
/// plus an overridable hook that reclaims storage once the last strong
/// owner is gone.
pub trait RefCounted {
    fn ref_count(&self) -> &RefCount;

    /// Destroy the object and reclaim its storage. Called exactly once, by
    /// the unique release that observed the zero transition, after any weak
    /// node was invalidated. The default reboxes and drops.
    ///
    /// # Safety
    /// `ptr` must have come from `Box::into_raw` (or the override's matching
    /// allocation scheme) and must not be touched afterwards.
    unsafe fn finalize(ptr: *mut Self)
    where
        Self: Sized,
    {
        drop(Box::from_raw(ptr));
    }
}
