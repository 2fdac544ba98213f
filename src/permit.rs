use alloc::sync::Arc;
use core::{fmt, mem};

use crate::Semaphore;

/// The drop-guard for acquired weight.
/// Returns the weight to the semaphore when dropped.
///
/// Holding the acquired weight in a guard means it is released on every
/// exit path of the bounded work, including panics and early returns.
#[must_use]
pub struct Permit<'a> {
    sem: &'a Semaphore,
    weight: u64,
}

impl<'a> Permit<'a> {
    pub(crate) fn new(sem: &'a Semaphore, weight: u64) -> Self {
        Self { sem, weight }
    }

    /// The weight this permit holds.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Get access to the associated semaphore.
    pub fn semaphore(&self) -> &'a Semaphore {
        self.sem
    }

    /// Do not return the weight to the semaphore.
    ///
    /// The caller takes over the release obligation. Pair this with
    /// [`Semaphore::release`]; a forgotten weight that is never released
    /// permanently shrinks the effective capacity.
    pub fn forget(self) -> u64 {
        let weight = self.weight;
        mem::forget(self);
        weight
    }

    /// Upgrade this permit into an [`OwnedPermit`].
    pub fn into_owned(self, sem: Arc<Semaphore>) -> OwnedPermit {
        debug_assert_eq!(
            Arc::as_ptr(&sem),
            core::ptr::from_ref(self.sem),
            "semaphore mismatch!"
        );
        OwnedPermit {
            weight: self.forget(),
            sem,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sem.release(self.weight);
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// The drop-guard for acquired weight, holding its [`Semaphore`] by [`Arc`].
/// Returns the weight to the semaphore when dropped.
///
/// Unlike [`Permit`] this guard is `'static`, so it can be moved into
/// spawned tasks that outlive the borrow of the semaphore.
#[must_use]
pub struct OwnedPermit {
    sem: Arc<Semaphore>,
    weight: u64,
}

impl OwnedPermit {
    /// The weight this permit holds.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Get access to the associated semaphore.
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.sem
    }

    /// Do not return the weight to the semaphore.
    ///
    /// The caller takes over the release obligation. Pair this with
    /// [`Semaphore::release`]; a forgotten weight that is never released
    /// permanently shrinks the effective capacity.
    pub fn forget(self) -> u64 {
        let mut this = mem::ManuallyDrop::new(self);
        let weight = this.weight;
        // Safety: `this`'s drop is suppressed and `sem` is not touched again
        unsafe { core::ptr::drop_in_place(&mut this.sem) };
        weight
    }
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.sem.release(self.weight);
    }
}

impl fmt::Debug for OwnedPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedPermit")
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}
