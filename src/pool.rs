//! Lane pool and promise construction.
//!
//! A [LanePool] owns a fixed set of [Lane]s and hands them out round-robin to
//! new promise chains. It is the entry point for creating promises:
//!
//! ```
//! use pledge::pool::LanePool;
//! let pool = LanePool::new().unwrap();
//! let (deferred, promise) = pool.deferred::<u32>();
//! deferred.resolve(7);
//! assert_eq!(promise.wait().unwrap(), 7);
//! ```
//!
//! There is no global pool. Construct one, clone the handle wherever it's
//! needed and drop it when done; lane threads exit once the pool and every
//! promise bound to them are gone.
//!
//! # Sizing
//!
//! The pool always has at least two lanes. A chain is never bound to the lane
//! its creator is running on, so a continuation may block on a chain it has
//! just started without deadlocking its own lane.
use std::{
    io::Result,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use log::debug;

use crate::{
    lane::{self, Lane},
    promise::{Deferred, Promise, Reason},
};

const MIN_LANES: usize = 2;

struct Inner {
    lanes: Vec<Lane>,
    cursor: AtomicUsize,
}

/// A fixed set of lanes promise chains are distributed over.
///
/// See the [module-level documentation](self) for more information.
#[derive(Clone)]
pub struct LanePool {
    inner: Arc<Inner>,
}

/// Configuration for a [LanePool].
pub struct Builder {
    lanes: Option<usize>,
    name_prefix: String,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            lanes: None,
            name_prefix: "pledge-lane".into(),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lanes to start. Values below two are raised to two.
    pub fn lanes(mut self, n: usize) -> Self {
        self.lanes = Some(n);
        self
    }

    /// Prefix for lane thread names. Lanes are named `<prefix>-<index>`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Spawn the lanes and return the pool.
    pub fn build(self) -> Result<LanePool> {
        let n = self
            .lanes
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(MIN_LANES);

        let lanes = (0..n)
            .map(|i| Lane::spawn(format!("{}-{i}", self.name_prefix)))
            .collect::<Result<Vec<_>>>()?;

        debug!("lane pool started with {n} lanes");

        Ok(LanePool {
            inner: Arc::new(Inner {
                lanes,
                cursor: AtomicUsize::new(0),
            }),
        })
    }
}

impl LanePool {
    /// Create a pool sized to the available parallelism (at least two lanes).
    pub fn new() -> Result<Self> {
        Builder::new().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Number of lanes in this pool.
    pub fn size(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Pick the next lane round-robin, skipping the lane the caller is
    /// running on.
    pub fn acquire_lane(&self) -> Lane {
        let lanes = &self.inner.lanes;
        let current = lane::current();

        loop {
            // The cursor is only ever advanced, so concurrent callers each get
            // a distinct slot.
            let idx = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % lanes.len();
            let lane = &lanes[idx];

            if current != Some(lane.id()) {
                return lane.clone();
            }
        }
    }

    /// Create a new unsettled promise and the handle that settles it.
    pub fn deferred<T>(&self) -> (Deferred<T>, Promise<T>)
    where
        T: Clone + Send + 'static,
    {
        Deferred::new(self.clone(), self.acquire_lane())
    }

    /// An already-failed promise carrying `reason`.
    pub fn reject<T>(&self, reason: impl Into<Reason>) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        Promise::settled(self.clone(), self.acquire_lane(), Err(reason.into()))
    }

    /// An already-successful promise carrying `value`.
    pub fn resolved<T>(&self, value: T) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        Promise::settled(self.clone(), self.acquire_lane(), Ok(value))
    }
}
