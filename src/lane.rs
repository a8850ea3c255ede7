//! Serial execution lanes.
//!
//! A [Lane] is a single worker thread draining a FIFO queue of jobs. Jobs
//! scheduled on the same lane never overlap and run in the order they were
//! scheduled, no matter how many threads schedule onto it concurrently. This
//! is the only synchronisation the promise engine relies on: every piece of
//! mutable promise state is bound to one lane and only touched by jobs
//! running there.
//!
//! ```
//! use pledge::lane::Lane;
//! use std::sync::mpsc::channel;
//!
//! let lane = Lane::spawn("doc-lane".into()).unwrap();
//! let (tx, rx) = channel();
//! for i in 0..3 {
//!     let tx = tx.clone();
//!     lane.schedule(move || tx.send(i).unwrap());
//! }
//! assert_eq!(rx.iter().take(3).collect::<Vec<_>>(), vec![0, 1, 2]);
//! ```
use std::{
    cell::Cell,
    fmt,
    io::Result,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{channel, Sender},
        Arc,
    },
    thread,
};

use log::{debug, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identity token of a lane.
///
/// Two [Lane] handles compare equal through their ids iff they refer to the
/// same worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneId(usize);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane#{}", self.0)
    }
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT: Cell<Option<LaneId>> = const { Cell::new(None) };
}

/// The lane the calling code is executing on, or `None` when called from a
/// thread that isn't a lane worker.
pub fn current() -> Option<LaneId> {
    CURRENT.with(Cell::get)
}

struct Inner {
    id: LaneId,
    name: String,
    tx: Sender<Job>,
}

/// A handle to a serial worker.
///
/// Handles are cheap to clone. The worker thread exits once every handle has
/// been dropped and its queue has drained.
#[derive(Clone)]
pub struct Lane {
    inner: Arc<Inner>,
}

impl Lane {
    /// Start a new worker thread with the given name.
    pub fn spawn(name: String) -> Result<Self> {
        let id = LaneId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = channel::<Job>();

        thread::Builder::new().name(name.clone()).spawn(move || {
            CURRENT.with(|c| c.set(Some(id)));

            while let Ok(job) = rx.recv() {
                job();
            }

            debug!("{id} exiting, no handles left");
        })?;

        debug!("spawned {id} ({name})");

        Ok(Self {
            inner: Arc::new(Inner { id, name, tx }),
        })
    }

    pub fn id(&self) -> LaneId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `work` for execution on this lane.
    ///
    /// Never blocks and never runs `work` inline, even when called from this
    /// lane's own worker. Errors raised by `work` are the caller's concern:
    /// the worker does not catch panics.
    pub fn schedule<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!("scheduling job on {}", self.inner.id);

        if self.inner.tx.send(Box::new(work)).is_err() {
            warn!("{} has stopped, dropping job", self.inner.id);
        }
    }

    /// Whether the calling code is running on this lane.
    pub fn is_current(&self) -> bool {
        current() == Some(self.inner.id)
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
