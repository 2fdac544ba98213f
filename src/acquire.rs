use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use pin_list::{Node, NodeData};

use crate::{Permit, PinQueue, QueueState, Semaphore};

impl Semaphore {
    /// Acquire a permit for `weight` units of capacity, queueing fairly.
    ///
    /// If the weight is immediately available and nobody is queued ahead,
    /// the returned future resolves on its first poll without ever creating
    /// a waiter. Otherwise the caller joins the back of the FIFO queue and
    /// suspends until a release grants it the requested weight.
    ///
    /// Dropping the future before it resolves cancels the acquisition. The
    /// cancellation is race-safe: if a concurrent release granted the weight
    /// first, the weight is returned to the semaphore during the drop.
    ///
    /// A request for more weight than the total capacity can never be
    /// granted; it parks until cancelled.
    ///
    /// # Errors
    ///
    /// [`AcquireError::ZeroWeight`] if `weight` is zero. No state is touched.
    pub fn acquire(&self, weight: u64) -> Acquire<'_> {
        Acquire {
            node: Node::new(),
            sem: self,
            weight,
        }
    }

    /// Acquire a permit for `weight` units of capacity, if it is free right
    /// now. Never blocks.
    ///
    /// This respects the queue: if other callers are already waiting, the
    /// request fails even when enough weight is nominally available, so that
    /// latecomers cannot starve the waiter at the head of the line.
    ///
    /// # Errors
    ///
    /// [`TryAcquireError::ZeroWeight`] if `weight` is zero, and
    /// [`TryAcquireError::NoPermits`] if the weight is not available or the
    /// queue is non-empty. Neither failure leaves state mutated.
    pub fn try_acquire(&self, weight: u64) -> Result<Permit<'_>, TryAcquireError> {
        self.try_acquire_inner(weight, Fairness::Fair)
    }

    /// Acquire a permit for `weight` units of capacity, if it is free right
    /// now, jumping ahead of any queued waiters. Never blocks.
    ///
    /// # Errors
    ///
    /// [`TryAcquireError::ZeroWeight`] if `weight` is zero, and
    /// [`TryAcquireError::NoPermits`] if the weight is not available.
    pub fn try_acquire_unfair(&self, weight: u64) -> Result<Permit<'_>, TryAcquireError> {
        self.try_acquire_inner(weight, Fairness::Unfair)
    }

    #[inline]
    fn try_acquire_inner(
        &self,
        weight: u64,
        fairness: Fairness,
    ) -> Result<Permit<'_>, TryAcquireError> {
        if weight == 0 {
            return Err(TryAcquireError::ZeroWeight);
        }
        let mut state = self.state.lock();
        if state.try_grant(weight, fairness) {
            Ok(Permit::new(self, weight))
        } else {
            Err(TryAcquireError::NoPermits)
        }
    }
}

pin_project_lite::pin_project! {
    /// A [`Future`] that acquires a weighted [`Permit`] from a [`Semaphore`].
    ///
    /// Returned by [`Semaphore::acquire`]. Dropping it before it resolves
    /// cancels the acquisition; see the [crate docs](crate) for the
    /// cancellation contract.
    pub struct Acquire<'a> {
        #[pin]
        node: Node<PinQueue>,
        sem: &'a Semaphore,
        weight: u64,
    }

    impl PinnedDrop for Acquire<'_> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            let Some(node) = this.node.initialized_mut() else {
                return;
            };
            let mut state = this.sem.state.lock();
            let (data, _unprotected) = node.reset(&mut state.queue);
            if let NodeData::Removed(weight) = data {
                // the grant won the race with this cancellation: hand the
                // weight straight back so the next waiter can have it
                state.refund(weight);
            } else {
                // still pending: unlinking a waiter can unblock the line
                // behind it, so re-run the grant walk
                state.grant_ready();
            }
        }
    }
}

impl<'a> Future for Acquire<'a> {
    type Output = Result<Permit<'a>, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        let sem = *this.sem;
        let weight = *this.weight;
        let mut state = sem.state.lock();

        let Some(init) = this.node.as_mut().initialized_mut() else {
            // first time polling.
            if weight == 0 {
                return Poll::Ready(Err(AcquireError::ZeroWeight));
            }
            let node = this.node.as_mut();

            if state.try_grant(weight, Fairness::Fair) {
                return Poll::Ready(Ok(Permit::new(sem, weight)));
            }

            // not enough free weight, or we are not the leader:
            // register at the back of the queue.
            let waker = cx.waker().clone();
            state.queue.push_back(node, (weight, waker), ());
            return Poll::Pending;
        };

        match init.protected_mut(&mut state.queue) {
            // spurious wakeup
            Some((_, waker)) => {
                waker.clone_from(cx.waker());
                Poll::Pending
            }
            None => {
                // Safety: we have just verified that it is removed
                let (granted, ()) = unsafe { init.take_removed_unchecked() };
                Poll::Ready(Ok(Permit::new(sem, granted)))
            }
        }
    }
}

enum Fairness {
    Fair,
    Unfair,
}

impl Fairness {
    fn is_unfair(&self) -> bool {
        matches!(self, Fairness::Unfair)
    }
}

impl QueueState {
    /// The non-blocking grant, shared by `try_acquire` and the fast path of
    /// `acquire`.
    #[inline]
    fn try_grant(&mut self, weight: u64, fairness: Fairness) -> bool {
        // under FIFO ordering, the fast path is only the leader
        // when the queue is empty.
        let is_leader = fairness.is_unfair() || self.queue.is_empty();

        if is_leader && self.available >= weight {
            self.available -= weight;
            true
        } else {
            false
        }
    }
}

/// The error returned by [`try_acquire`](Semaphore::try_acquire).
#[derive(Debug, PartialEq, Eq)]
pub enum TryAcquireError {
    /// The requested weight is not available right now, or other callers
    /// are queued ahead.
    NoPermits,
    /// A weight of zero was requested.
    ZeroWeight,
}

impl fmt::Display for TryAcquireError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryAcquireError::NoPermits => write!(fmt, "no permits available"),
            TryAcquireError::ZeroWeight => write!(fmt, "weight must be positive"),
        }
    }
}

impl core::error::Error for TryAcquireError {}

/// The error returned by [`acquire`](Semaphore::acquire).
#[non_exhaustive]
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireError {
    /// A weight of zero was requested.
    ZeroWeight,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::ZeroWeight => write!(fmt, "weight must be positive"),
        }
    }
}

impl core::error::Error for AcquireError {}
