use std::{
    cell::UnsafeCell,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{trace, warn};

use super::{Continuation, Promise, Reason, Resolution};
use crate::{lane::Lane, pool::LanePool};

enum Slot<T> {
    Pending(Vec<Continuation<T>>),
    Resolved(Promise<T>),
}

/// Settlement state of one promise.
///
/// The slot is only ever read or written by jobs running on `lane`, which
/// run one at a time.
pub(crate) struct Cell<T> {
    pool: LanePool,
    lane: Lane,
    slot: UnsafeCell<Slot<T>>,
}

unsafe impl<T: Send> Sync for Cell<T> {}

impl<T> Cell<T>
where
    T: Clone + Send + 'static,
{
    /// # Safety
    ///
    /// Must be called from a job running on `self.lane`, and the reference
    /// must not be held past that job.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot(&self) -> &mut Slot<T> {
        debug_assert!(self.lane.is_current());
        &mut *self.slot.get()
    }

    pub(super) fn subscribe(self: &Arc<Self>, continuation: Continuation<T>) {
        let cell = self.clone();

        self.lane.schedule(move || {
            // SAFETY: we're on the cell's lane.
            match unsafe { cell.slot() } {
                Slot::Pending(waiting) => waiting.push(continuation),
                Slot::Resolved(value) => value.subscribe(continuation),
            }
        });
    }

    fn settle(self: &Arc<Self>, resolution: Resolution<T>) {
        let cell = self.clone();

        self.lane.schedule(move || {
            // SAFETY: we're on the cell's lane.
            let slot = unsafe { cell.slot() };

            let waiting = match slot {
                Slot::Pending(waiting) => mem::take(waiting),
                Slot::Resolved(_) => {
                    trace!("{}: already settled, ignoring", cell.lane.id());
                    return;
                }
            };

            let value = match resolution {
                Resolution::Value(v) => {
                    Promise::settled(cell.pool.clone(), cell.lane.clone(), Ok(v))
                }
                Resolution::Adopt(p) => p,
            };

            *slot = Slot::Resolved(value.clone());

            trace!(
                "{}: settled as {value:?}, {} waiting",
                cell.lane.id(),
                waiting.len()
            );

            for continuation in waiting {
                value.subscribe(continuation);
            }
        });
    }
}

/// The settling side of a pending promise.
///
/// Obtained from [LanePool::deferred]. A deferred can be cloned and handed to
/// any number of threads; only the first settlement takes effect.
///
/// ```
/// use pledge::pool::LanePool;
/// let pool = LanePool::new().unwrap();
/// let (deferred, promise) = pool.deferred::<&str>();
/// deferred.resolve("first");
/// deferred.reject("ignored");
/// assert_eq!(promise.wait().unwrap(), "first");
/// ```
pub struct Deferred<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("lane", &self.cell.lane.id())
            .finish()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(pool: LanePool, lane: Lane) -> (Self, Promise<T>) {
        let cell = Arc::new(Cell {
            pool: pool.clone(),
            lane: lane.clone(),
            slot: UnsafeCell::new(Slot::Pending(Vec::new())),
        });

        let promise = Promise::pending(pool, lane, cell.clone());

        (Self { cell }, promise)
    }

    /// Another handle on the promise this deferred settles.
    pub fn promise(&self) -> Promise<T> {
        Promise::pending(
            self.cell.pool.clone(),
            self.cell.lane.clone(),
            self.cell.clone(),
        )
    }

    /// Fulfil the promise with `value`.
    pub fn resolve(&self, value: T) {
        self.settle(Resolution::Value(value));
    }

    /// Make the promise settle however `promise` does.
    pub fn adopt(&self, promise: Promise<T>) {
        self.settle(Resolution::Adopt(promise));
    }

    /// Fail the promise with `reason`.
    ///
    /// This is resolution with an already-failed promise; it goes through the
    /// same path as [Deferred::resolve].
    pub fn reject(&self, reason: impl Into<Reason>) {
        let failed = Promise::settled(
            self.cell.pool.clone(),
            self.cell.lane.clone(),
            Err(reason.into()),
        );

        self.settle(Resolution::Adopt(failed));
    }

    /// Settle the promise. Does nothing if it has already been settled.
    pub fn settle(&self, resolution: Resolution<T>) {
        self.cell.settle(resolution);
    }

    /// Settle with whatever `f` produces, turning an error or a panic into a
    /// rejection.
    pub(crate) fn settle_with<F>(&self, f: F)
    where
        F: FnOnce() -> Result<Resolution<T>, Reason>,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(resolution)) => self.settle(resolution),
            Ok(Err(reason)) => self.reject(reason),
            Err(payload) => {
                let reason = Reason::from_panic(payload);
                warn!("continuation panicked: {reason}");
                self.reject(reason);
            }
        }
    }
}
