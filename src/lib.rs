//! A weighted, cancellable, strictly-FIFO async semaphore.
//!
//! A semaphore bounds how many units of abstract capacity may be in
//! concurrent use. Unlike a mutex, it can admit many concurrent holders at
//! once, and unlike a plain counting semaphore, every acquisition carries a
//! *weight*: the number of capacity units it consumes. A binary semaphore is
//! the special case where every weight is 1.
//!
//! When [`acquire`](Semaphore::acquire) is called and enough capacity is
//! free, it returns a [`Permit`] immediately. Otherwise the caller joins a
//! wait queue and suspends until enough capacity has been released. The
//! queue is strictly first-in-first-out: capacity freed by a release is
//! offered to waiters in the order they enqueued, and a large request at the
//! head of the queue blocks smaller requests behind it from being served out
//! of order (head-of-line blocking). This trades a little throughput for the
//! guarantee that no waiter starves.
//!
//! # Cancellation
//!
//! Acquisition is cancelled by dropping the [`Acquire`] future before it
//! completes. This composes with any timer or cancellation signal the caller
//! already has, for example `tokio::time::timeout`:
//!
//! ```ignore
//! if let Ok(permit) = tokio::time::timeout(deadline, sem.acquire(2)).await {
//!     // got the capacity within the deadline
//! }
//! ```
//!
//! Dropping the future is race-safe against a concurrent release: the waiter
//! is resolved exactly once, by whichever of the grant or the cancellation
//! reaches it first. If the grant wins, the already-assigned weight is
//! returned to the pool during the drop, so a "late" cancellation can never
//! leak capacity or double-count a grant.
//!
//! # Releasing
//!
//! The [`Permit`] returned by a successful acquisition releases its weight
//! when dropped, on every exit path of the bounded work, including panics
//! and early returns. For callers that need to decouple the two halves,
//! [`Permit::forget`] suppresses the automatic release and
//! [`Semaphore::release`] returns weight manually. The semaphore trusts the
//! caller to release each acquired weight exactly once; weight released
//! beyond the configured capacity is clamped rather than tracked.
//!
//! # Example
//!
//! ```
//! use turnstile::Semaphore;
//!
//! # pollster::block_on(async {
//! // three units of capacity
//! let sem = Semaphore::new(3);
//!
//! // take two units for a large job
//! let big = sem.acquire(2).await.unwrap();
//!
//! // one unit is still free
//! let small = sem.try_acquire(1).unwrap();
//! assert_eq!(sem.available(), 0);
//!
//! drop(big);
//! assert_eq!(sem.available(), 2);
//! # drop(small);
//! # })
//! ```

#![no_std]
#![warn(
    unsafe_op_in_unsafe_fn,
    clippy::missing_safety_doc,
    clippy::multiple_unsafe_ops_per_block,
    clippy::undocumented_unsafe_blocks
)]

extern crate alloc;

#[cfg(test)]
extern crate std;

use core::{hint::unreachable_unchecked, task::Waker};

use pin_list::PinList;

mod acquire;
pub use acquire::{Acquire, AcquireError, TryAcquireError};

mod permit;
pub use permit::{OwnedPermit, Permit};

mod mutex;
use mutex::Mutex;

/// A weighted, strictly-FIFO semaphore.
///
/// Created with a fixed [`capacity`](Semaphore::new); callers
/// [`acquire`](Semaphore::acquire) and release arbitrary positive weights
/// against it. See the [crate docs](crate) for the full contract.
pub struct Semaphore {
    state: Mutex<QueueState>,
}

/// The compound semaphore state.
///
/// `capacity`, `available` and the wait queue live under one lock, so the
/// invariant `available + outstanding grants == capacity` is never observed
/// in a torn state, and the pending/granted transition of each waiter is
/// linearized by the same lock that orders the queue.
struct QueueState {
    /// Total weight budget, fixed at construction.
    capacity: u64,
    /// Weight not currently assigned to any holder or granted waiter.
    /// Invariant: `available <= capacity`.
    available: u64,
    queue: PinList<PinQueue>,
}

type PinQueue = dyn pin_list::Types<
        Id = pin_list::id::DebugChecked,
        // (weight, waker) -> waiter is pending
        Protected = (u64, Waker),
        // weight -> waiter was granted this weight
        Removed = u64,
        Unprotected = (),
    >;

impl Semaphore {
    /// Create a semaphore with the given total weight budget.
    ///
    /// The capacity is fixed for the lifetime of the semaphore, and all of
    /// it starts out available.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "semaphore capacity must be positive");
        let state = QueueState {
            capacity,
            available: capacity,
            // Safety: during acquire, we ensure that nodes in this queue
            // will never attempt to use a different queue to read the nodes.
            queue: PinList::new(unsafe { pin_list::id::DebugChecked::new() }),
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// The total weight budget this semaphore was created with.
    pub fn capacity(&self) -> u64 {
        self.state.lock().capacity
    }

    /// The weight currently not assigned to any holder.
    ///
    /// This is a point-in-time snapshot; by the time the caller inspects the
    /// value, concurrent acquisitions or releases may have changed it.
    pub fn available(&self) -> u64 {
        self.state.lock().available
    }

    /// Return `weight` units of capacity to the semaphore.
    ///
    /// This is the manual counterpart to dropping a [`Permit`], for use with
    /// [`Permit::forget`]. Freed weight is offered to pending waiters in
    /// FIFO order; whatever cannot satisfy the waiter at the head of the
    /// queue stays available.
    ///
    /// Releasing weight that was never acquired is a caller bug the
    /// semaphore cannot detect. It is handled by clamping: `available` never
    /// exceeds the capacity. Releasing zero weight is a no-op.
    pub fn release(&self, weight: u64) {
        if weight == 0 {
            return;
        }
        self.state.lock().refund(weight);
    }
}

impl QueueState {
    /// Hand available weight to pending waiters in queue order.
    ///
    /// Stops at the first waiter whose weight does not fit: an earlier,
    /// larger request must not be overtaken by later, smaller ones.
    #[inline]
    fn grant_ready(&mut self) {
        let mut head = self.queue.cursor_front_mut();
        while let Some(pending) = head.protected_mut() {
            let weight = pending.0;
            if weight > self.available {
                break;
            }
            self.available -= weight;
            match head.remove_current(weight) {
                Ok((_, waker)) => waker.wake(),
                // Safety: with protected_mut, we have just made sure it is in the list
                Err(_) => unsafe { unreachable_unchecked() },
            }
        }
    }

    /// Add freed weight back to the pool, clamped to the capacity, and serve
    /// any waiters that now fit.
    #[inline]
    fn refund(&mut self, weight: u64) {
        self.available = self.available.saturating_add(weight).min(self.capacity);
        self.grant_ready();
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut d = f.debug_struct("Semaphore");
        match self.state.try_lock() {
            Some(guard) => {
                d.field("capacity", &guard.capacity);
                d.field("available", &guard.available);
            }
            None => {
                d.field("state", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use crate::{Semaphore, TryAcquireError};

    #[test]
    fn fast_path() {
        let sem = Semaphore::new(3);

        let all = sem.try_acquire(3).unwrap();
        assert_eq!(sem.try_acquire(1).unwrap_err(), TryAcquireError::NoPermits);

        assert_eq!(all.forget(), 3);
        sem.release(3);

        let one = sem.try_acquire(1).unwrap();
        assert_eq!(sem.available(), 2);
        drop(one);
        assert_eq!(sem.available(), 3);
    }

    #[test]
    fn zero_weight() {
        let sem = Semaphore::new(1);
        assert_eq!(sem.try_acquire(0).unwrap_err(), TryAcquireError::ZeroWeight);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn over_release_clamps() {
        let sem = Semaphore::new(3);
        sem.release(10);
        assert_eq!(sem.available(), 3);

        let two = sem.try_acquire(2).unwrap();
        sem.release(u64::MAX);
        assert_eq!(sem.available(), 3);
        drop(two);
        assert_eq!(sem.available(), 3);
    }

    #[test]
    #[should_panic = "capacity must be positive"]
    fn zero_capacity() {
        let _ = Semaphore::new(0);
    }

    #[test]
    fn debug() {
        let sem = Semaphore::new(3);
        let s = std::format!("{sem:?}");
        assert_eq!(s, "Semaphore { capacity: 3, available: 3, .. }");
    }

    #[cfg(loom)]
    #[test]
    fn grant_vs_cancel() {
        loom::model(|| {
            use core::task::{Context, Poll, Waker};
            use std::sync::Arc;

            let sem = Arc::new(Semaphore::new(1));
            let held = sem.try_acquire(1).unwrap().forget();

            let s2 = sem.clone();
            let cancel = loom::thread::spawn(move || {
                let mut acq = std::boxed::Box::pin(s2.acquire(1));
                let mut cx = Context::from_waker(Waker::noop());
                // enqueue (or take the fast path), then drop without
                // completing: a cancellation racing the concurrent release
                if let Poll::Ready(permit) = acq.as_mut().poll(&mut cx) {
                    drop(permit);
                }
                drop(acq);
            });

            sem.release(held);
            cancel.join().unwrap();

            // whichever side won the race, the weight is back in the pool
            assert_eq!(sem.available(), 1);
        });
    }
}
