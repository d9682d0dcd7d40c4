use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::count::{RefCounted, ReleaseOutcome};
use crate::handle::WeakHandle;
use crate::registry::{Embedded, HasWeakSlot, Invalidation, WeakDirectory};
use crate::runtime::Error;

///////////////////////////////
/// RAII strong-ownership value: wraps exactly one unit of the target's
/// strong count. Cloning mints a new unit, dropping releases it, and the
/// unique drop that observes the zero transition severs the weak node (if
/// any) before reclaiming the object.
///
/// There is no empty state; absence is `Option<Handle>`. Dereferencing
/// borrows the handle, so the borrow checker keeps this handle's unit alive
/// across every access -- no call-duration pinning is needed even when
/// other threads drop their handles concurrently.
pub struct Handle<T: RefCounted, D: Invalidation<T> = Embedded> {
    target: NonNull<T>,
    dir: D,
    _owns: PhantomData<T>,
}

unsafe impl<T, D> Send for Handle<T, D>
where
    T: RefCounted + Send + Sync,
    D: Invalidation<T> + Send,
{
}

unsafe impl<T, D> Sync for Handle<T, D>
where
    T: RefCounted + Send + Sync,
    D: Invalidation<T> + Sync,
{
}

impl<T: RefCounted, D: Invalidation<T>> Handle<T, D> {
    /// Box a fresh object and take the first strong unit, wiring the given
    /// directory strategy into every handle that will ever reach it.
    pub fn new_in(value: T, dir: D) -> Self {
        let target = Box::into_raw(Box::new(value));
        unsafe {
            (*target).ref_count().retain();
            dir.attach(target);
            Self::from_retained(NonNull::new_unchecked(target), dir)
        }
    }

    /// Wrap a pointer whose strong count already holds the unit this handle
    /// will own.
    pub(crate) unsafe fn from_retained(target: NonNull<T>, dir: D) -> Self {
        Self {
            target,
            dir,
            _owns: PhantomData,
        }
    }

    /// Re-wrap a pointer previously released via [`Self::into_raw`].
    ///
    /// # Safety
    /// `ptr` must point at a live managed object whose strong count holds
    /// one unit on behalf of the caller, wired to `dir`; for the embedded
    /// strategy its slot must already be bound (misuse there is caught at
    /// downgrade, not here).
    pub unsafe fn from_raw(ptr: *mut T, dir: D) -> Result<Self, Error> {
        match NonNull::new(ptr) {
            Some(target) => Ok(Self::from_retained(target, dir)),
            None => Err(Error::NullTarget),
        }
    }

    /// Disassemble without touching the count; the caller now owns the unit
    /// and the directory value.
    pub fn into_raw(self) -> (*mut T, D) {
        let this = ManuallyDrop::new(self);
        let ptr = this.target.as_ptr();
        let dir = unsafe { std::ptr::read(&this.dir) };
        (ptr, dir)
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const T {
        self.target.as_ptr()
    }

    /// Strong owners at the time of the read. Diagnostic only; stale
    /// immediately.
    #[inline(always)]
    pub fn strong(&self) -> u32 {
        unsafe { self.target.as_ref() }.ref_count().strong()
    }

    /// Identity, not value: two handles are equal when they own units of
    /// the same object.
    #[inline(always)]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.target == other.target
    }

    /// Register (or reuse) the weak node for this object and take a weak
    /// handle on it.
    pub fn downgrade(&self) -> Result<WeakHandle<T, D>, Error>
    where
        D: WeakDirectory<T>,
    {
        self.dir.create_or_get(self)
    }
}

impl<T: RefCounted + HasWeakSlot> Handle<T, Embedded> {
    /// Box a fresh slot-carrying object, bind its node, and take the first
    /// strong unit.
    pub fn new(value: T) -> Self {
        Self::new_in(value, Embedded)
    }
}

impl<T: RefCounted, D: Invalidation<T>> Clone for Handle<T, D> {
    fn clone(&self) -> Self {
        unsafe { self.target.as_ref() }.ref_count().retain();
        Self {
            target: self.target,
            dir: self.dir.clone(),
            _owns: PhantomData,
        }
    }
}

impl<T: RefCounted, D: Invalidation<T>> Drop for Handle<T, D> {
    fn drop(&mut self) {
        unsafe {
            let outcome = self.target.as_ref().ref_count().release();
            if let ReleaseOutcome::Finalize { invalidate_weak } = outcome {
                if invalidate_weak {
                    // Sever the node first; holds the node mutex briefly
                    // and is released before any storage goes away.
                    self.dir.invalidate(self.target.as_ref());
                }
                T::finalize(self.target.as_ptr());
            }
        }
    }
}

impl<T: RefCounted, D: Invalidation<T>> Deref for Handle<T, D> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { self.target.as_ref() }
    }
}

impl<T: RefCounted, D: Invalidation<T>> PartialEq for Handle<T, D> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: RefCounted, D: Invalidation<T>> Eq for Handle<T, D> {}

impl<T: RefCounted, D: Invalidation<T>> std::fmt::Debug for Handle<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("target", &self.target.as_ptr())
            .field("strong", &self.strong())
            .finish()
    }
}
