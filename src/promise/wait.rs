//! Observing a promise from outside the lanes.
//!
//! Continuations are the way to react to a settlement from inside the engine.
//! Code that lives outside of it can either block on [Promise::wait] or
//! `.await` the promise in any async executor:
//!
//! ```
//! use futures::executor::block_on;
//! use pledge::pool::LanePool;
//!
//! let pool = LanePool::new().unwrap();
//! let (deferred, promise) = pool.deferred::<&str>();
//! deferred.resolve("hello");
//! assert_eq!(block_on(async { promise.await }).unwrap(), "hello");
//! ```
//!
//! If every handle able to settle a promise is dropped while it's still
//! pending, both forms complete with an [Abandoned] reason rather than
//! waiting forever.
use std::{
    future::{Future, IntoFuture},
    mem,
    pin::Pin,
    sync::{mpsc::channel, Arc, Mutex},
    task::{Context, Poll, Waker},
};

use log::warn;

use super::{lock, Abandoned, Continuation, Outcome, Promise, Reason};
use crate::lane;

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Block the calling thread until this promise settles.
    ///
    /// *Note* this must not be called from within a continuation: it would
    /// block a lane, and with it every chain bound to that lane.
    pub fn wait(self) -> Outcome<T> {
        if let Some(id) = lane::current() {
            warn!("blocking {id} on a promise; this can deadlock the lane");
        }

        let (tx, rx) = channel();
        let on_failure = tx.clone();

        self.subscribe(Continuation::new(
            move |value| {
                let _ = tx.send(Ok(value));
            },
            move |reason| {
                let _ = on_failure.send(Err(reason));
            },
        ));

        // Our own handle would otherwise keep the promise alive and hide
        // abandonment.
        drop(self);

        rx.recv().unwrap_or_else(|_| Err(Reason::new(Abandoned)))
    }
}

enum Progress<T> {
    Waiting(Option<Waker>),
    Ready(Outcome<T>),
    Taken,
}

/// Completes the shared state once the continuation runs, or with
/// [Abandoned] if it's dropped without running.
struct Completion<T>(Arc<Mutex<Progress<T>>>);

impl<T> Completion<T> {
    fn complete(&self, outcome: Outcome<T>) {
        let mut progress = lock(&self.0);

        if let Progress::Waiting(waker) = &mut *progress {
            let waker = waker.take();
            *progress = Progress::Ready(outcome);

            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let waiting = matches!(*lock(&self.0), Progress::Waiting(_));

        if waiting {
            self.complete(Err(Reason::new(Abandoned)));
        }
    }
}

/// Future returned by awaiting a [Promise].
pub struct Settlement<T> {
    progress: Arc<Mutex<Progress<T>>>,
}

impl<T> Future for Settlement<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut progress = lock(&self.progress);

        match mem::replace(&mut *progress, Progress::Taken) {
            Progress::Ready(outcome) => Poll::Ready(outcome),
            Progress::Waiting(_) => {
                *progress = Progress::Waiting(Some(cx.waker().clone()));
                Poll::Pending
            }
            Progress::Taken => panic!("Settlement polled after completion"),
        }
    }
}

impl<T> IntoFuture for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = Outcome<T>;
    type IntoFuture = Settlement<T>;

    fn into_future(self) -> Self::IntoFuture {
        let progress = Arc::new(Mutex::new(Progress::Waiting(None)));
        let on_success = Arc::new(Completion(progress.clone()));
        let on_failure = on_success.clone();

        self.subscribe(Continuation::new(
            move |value| on_success.complete(Ok(value)),
            move |reason| on_failure.complete(Err(reason)),
        ));

        Settlement { progress }
    }
}
