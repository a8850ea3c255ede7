//! Promises and their settlement.
//!
//! A [Promise] is an immutable handle on a result that may not exist yet.
//! The only thing you can do with it is register continuations with one of
//! the `then` family of methods, which returns a new promise for whatever the
//! continuation produces:
//!
//! ```
//! use pledge::pool::LanePool;
//! use pledge::promise::Promise;
//!
//! let pool = LanePool::new().unwrap();
//! let (deferred, promise) = pool.deferred::<u32>();
//!
//! let doubled: Promise<u32> = promise.and_then(|v| Ok((v * 2).into()));
//! let failed: Promise<u32> = doubled.and_then(|_| anyhow::bail!("too big"));
//! let recovered: Promise<u32> = failed.or_else(|_| Ok(0.into()));
//!
//! deferred.resolve(21);
//! assert_eq!(doubled.wait().unwrap(), 42);
//! assert_eq!(recovered.wait().unwrap(), 0);
//! ```
//!
//! # Settlement
//!
//! Every promise settles at most once, either with a value or with a
//! [Reason]. The [Deferred] handle returned alongside a fresh promise is the
//! way to settle it; settling again afterwards is silently ignored.
//! Continuations run exactly once, in the order they were registered, and
//! never on the caller's stack: `then` and friends return immediately.
//!
//! A continuation fails by returning `Err` or by panicking. Either way the
//! promise it produced fails with that error; nothing escapes into the lane
//! running it. A continuation may also return [Resolution::Adopt] to make its
//! promise follow another one.
//!
//! # Cycles
//!
//! Resolving a promise with a promise that (transitively) waits on the first
//! one is a caller error. Such a chain never settles and its continuations
//! never run; nothing detects this.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{lane::Lane, pool::LanePool};

use deferred::Cell;

mod deferred;
mod reason;
mod wait;

pub use deferred::Deferred;
pub use reason::{Abandoned, Reason};
pub use wait::Settlement;

/// The final state of a settled promise.
pub type Outcome<T> = Result<T, Reason>;

/// What a promise is resolved with: either a plain value or another promise
/// whose eventual outcome is adopted.
pub enum Resolution<T> {
    Value(T),
    Adopt(Promise<T>),
}

impl<T> From<T> for Resolution<T> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T> From<Promise<T>> for Resolution<T> {
    fn from(promise: Promise<T>) -> Self {
        Resolution::Adopt(promise)
    }
}

/// A pair of callbacks waiting on an outcome. Exactly one of them runs.
pub(crate) struct Continuation<T> {
    on_success: Box<dyn FnOnce(T) + Send>,
    on_failure: Box<dyn FnOnce(Reason) + Send>,
}

impl<T> Continuation<T> {
    pub(crate) fn new<S, F>(on_success: S, on_failure: F) -> Self
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Reason) + Send + 'static,
    {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    fn run(self, outcome: Outcome<T>) {
        match outcome {
            Ok(value) => (self.on_success)(value),
            Err(reason) => (self.on_failure)(reason),
        }
    }
}

enum State<T> {
    Pending(Arc<Cell<T>>),
    Settled(Outcome<T>),
}

/// A handle on an eventual value.
///
/// See the [module-level documentation](self) for more information.
pub struct Promise<T> {
    pool: LanePool,
    lane: Lane,
    state: State<T>,
}

impl<T: Clone> Clone for Promise<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            State::Pending(cell) => State::Pending(cell.clone()),
            State::Settled(outcome) => State::Settled(outcome.clone()),
        };

        Self {
            pool: self.pool.clone(),
            lane: self.lane.clone(),
            state,
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Pending(_) => "pending",
            State::Settled(ref outcome) if outcome.is_ok() => "fulfilled",
            State::Settled(_) => "rejected",
        };

        f.debug_struct("Promise")
            .field("lane", &self.lane.id())
            .field("state", &state)
            .finish()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn settled(pool: LanePool, lane: Lane, outcome: Outcome<T>) -> Self {
        Self {
            pool,
            lane,
            state: State::Settled(outcome),
        }
    }

    pub(crate) fn pending(pool: LanePool, lane: Lane, cell: Arc<Cell<T>>) -> Self {
        Self {
            pool,
            lane,
            state: State::Pending(cell),
        }
    }

    /// The lane this promise's continuations are dispatched from.
    pub fn lane(&self) -> &Lane {
        &self.lane
    }

    /// Register `on_success` and `on_failure`. Exactly one of them will be
    /// called once this promise settles; the returned promise settles with
    /// what that callback produces.
    pub fn then<U, S, F>(&self, on_success: S, on_failure: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> anyhow::Result<Resolution<U>> + Send + 'static,
        F: FnOnce(Reason) -> anyhow::Result<Resolution<U>> + Send + 'static,
    {
        self.chain(
            move |v| on_success(v).map_err(Reason::from),
            move |r| on_failure(r).map_err(Reason::from),
        )
    }

    /// Like [Promise::then] without a failure callback: a failure is passed
    /// through to the returned promise unchanged.
    pub fn and_then<U, S>(&self, on_success: S) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> anyhow::Result<Resolution<U>> + Send + 'static,
    {
        self.chain(move |v| on_success(v).map_err(Reason::from), Err)
    }

    /// Like [Promise::then] without a success callback: a value is passed
    /// through to the returned promise unchanged.
    pub fn or_else<F>(&self, on_failure: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> anyhow::Result<Resolution<T>> + Send + 'static,
    {
        self.chain(
            |v| Ok(Resolution::Value(v)),
            move |r| on_failure(r).map_err(Reason::from),
        )
    }

    /// A new promise settling exactly like this one.
    pub fn forward(&self) -> Promise<T> {
        self.chain(|v| Ok(Resolution::Value(v)), Err)
    }

    fn chain<U, S, F>(&self, on_success: S, on_failure: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<Resolution<U>, Reason> + Send + 'static,
        F: FnOnce(Reason) -> Result<Resolution<U>, Reason> + Send + 'static,
    {
        let (deferred, promise) = self.pool.deferred::<U>();
        let on_reject = deferred.clone();

        self.subscribe(Continuation::new(
            move |value| deferred.settle_with(move || on_success(value)),
            move |reason| on_reject.settle_with(move || on_failure(reason)),
        ));

        promise
    }

    /// Hand `continuation` to this promise. It runs on a lane job once the
    /// outcome is known.
    pub(crate) fn subscribe(&self, continuation: Continuation<T>) {
        match &self.state {
            State::Pending(cell) => cell.subscribe(continuation),
            State::Settled(outcome) => {
                let outcome = outcome.clone();
                self.lane.schedule(move || continuation.run(outcome));
            }
        }
    }
}

pub(crate) fn lock<T>(mtx: &Mutex<T>) -> MutexGuard<'_, T> {
    mtx.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{Promise, Resolution};
    use crate::{lane, pool::LanePool};
    use anyhow::{anyhow, bail, Context, Result};
    use std::sync::{mpsc::channel, Arc, Mutex};

    fn pool() -> LanePool {
        let _ = env_logger::builder().is_test(true).try_init();
        LanePool::builder().lanes(3).build().unwrap()
    }

    #[test]
    fn resolve_then() -> Result<()> {
        let pool = pool();
        let (d, p) = pool.deferred::<&str>();
        let seen: Promise<String> = p.and_then(|v| Ok(format!("got {v}").into()));

        d.resolve("foo");

        assert_eq!(seen.wait()?, "got foo");
        Ok(())
    }

    #[test]
    fn then_is_asynchronous() {
        let pool = pool();
        let p = pool.resolved(1u8);
        let (go, wait_go) = channel::<()>();

        // The callback can only finish once `then` has returned to us.
        let done: Promise<u8> = p.and_then(move |v| {
            wait_go.recv()?;
            Ok(v.into())
        });
        go.send(()).unwrap();

        assert_eq!(done.wait().unwrap(), 1);
    }

    #[test]
    fn then_picks_callback_by_outcome() {
        let pool = pool();
        let ok: Promise<String> = pool.resolved(1).then(
            |v| Ok(format!("ok {v}").into()),
            |r| Ok(format!("err {r}").into()),
        );
        let err: Promise<String> = pool.reject::<u8>("no").then(
            |v| Ok(format!("ok {v}").into()),
            |r| Ok(format!("err {r}").into()),
        );

        assert_eq!(ok.wait().unwrap(), "ok 1");
        assert_eq!(err.wait().unwrap(), "err no");
    }

    #[test]
    fn callbacks_run_on_a_lane() {
        let pool = pool();
        let (d, p) = pool.deferred::<u8>();
        let on: Promise<bool> = p.and_then(|_| Ok(lane::current().is_some().into()));

        d.resolve(0);
        assert!(on.wait().unwrap());
    }

    #[test]
    fn registration_order_across_settlement() {
        let pool = pool();
        let (d, p) = pool.deferred::<u32>();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tails = Vec::new();
        let mut register = |i: u32| {
            let log = log.clone();
            tails.push(p.and_then(move |v| {
                log.lock().unwrap().push((i, v));
                Ok(Resolution::Value(()))
            }));
        };

        register(0);
        register(1);
        register(2);
        d.resolve(9);
        register(3);
        register(4);

        for t in tails {
            t.wait().unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec![(0, 9), (1, 9), (2, 9), (3, 9), (4, 9)]
        );
    }

    #[test]
    fn resolve_twice_keeps_first() {
        let pool = pool();
        let (d, p) = pool.deferred::<&str>();

        d.resolve("foo");
        d.resolve("bar");

        assert_eq!(p.forward().wait().unwrap(), "foo");
        assert_eq!(p.wait().unwrap(), "foo");
    }

    #[test]
    fn reject_after_resolve_is_ignored() {
        let pool = pool();
        let (d, p) = pool.deferred::<&str>();

        d.resolve("foo");
        d.reject("baz");

        assert_eq!(p.wait().unwrap(), "foo");
    }

    #[test]
    fn resolve_after_reject_is_ignored() {
        let pool = pool();
        let (d, p) = pool.deferred::<&str>();

        d.reject("baz");
        d.resolve("foo");

        assert_eq!(p.wait().unwrap_err().to_string(), "baz");
    }

    #[test]
    fn raising_callback_rejects() {
        let pool = pool();
        let (d, p) = pool.deferred::<u8>();
        let failed: Promise<u8> = p.and_then(|_| bail!("x"));

        d.resolve(1);
        assert_eq!(failed.wait().unwrap_err().to_string(), "x");
    }

    #[test]
    fn panicking_callback_rejects_and_lane_survives() {
        let pool = pool();
        let (d, p) = pool.deferred::<u8>();
        let failed: Promise<u8> = p.and_then(|_| panic!("kaboom"));
        let fine: Promise<u8> = p.and_then(|v| Ok((v + 1).into()));

        d.resolve(1);
        assert_eq!(failed.wait().unwrap_err().to_string(), "kaboom");
        assert_eq!(fine.wait().unwrap(), 2);
    }

    #[test]
    fn failure_passes_through_and_then() {
        let pool = pool();
        let (d, p) = pool.deferred::<u8>();
        let skipped = Arc::new(Mutex::new(true));
        let flag = skipped.clone();
        let tail: Promise<u8> = p.and_then(move |v| {
            *flag.lock().unwrap() = false;
            Ok(v.into())
        });

        d.reject("nope");
        assert_eq!(tail.wait().unwrap_err().to_string(), "nope");
        assert!(*skipped.lock().unwrap());
    }

    #[test]
    fn reason_identity_preserved_through_forwarding() {
        let pool = pool();
        let rejected = pool.reject::<u8>("x");
        let forwarded = rejected.forward().forward();
        let (tx, rx) = channel();

        let original: Promise<u8> = rejected.or_else(move |r| {
            tx.send(r).unwrap();
            Ok(0.into())
        });
        original.wait().unwrap();

        let reason = forwarded.wait().unwrap_err();
        assert!(reason.ptr_eq(&rx.recv().unwrap()));
        assert_eq!(reason.to_string(), "x");
    }

    #[test]
    fn reraise_original_reason() {
        let pool = pool();
        let p = pool.reject::<u8>("orig");
        let rethrown: Promise<u8> = p.or_else(|r| Err(r.into()));

        assert_eq!(rethrown.wait().unwrap_err().to_string(), "orig");
    }

    #[test]
    fn failure_handler_raising_with_context_keeps_new_error() {
        let pool = pool();
        let p = pool.reject::<u8>("orig");
        let wrapped: Promise<u8> = p.or_else(|r| Err(r).context("stage 3 failed"));

        let reason = wrapped.wait().unwrap_err();
        assert_eq!(reason.to_string(), "stage 3 failed");
        assert_eq!(reason.error().root_cause().to_string(), "orig");
    }

    #[test]
    fn recover_from_failure() {
        let pool = pool();
        let p = pool.reject::<u8>(anyhow!("bad"));
        let fixed = p.or_else(|r| Ok(Resolution::Value(r.to_string().len() as u8)));

        assert_eq!(fixed.wait().unwrap(), 3);
    }

    #[test]
    fn adopt_pending_promise() {
        let pool = pool();
        let (outer, p) = pool.deferred::<u32>();
        let (inner, q) = pool.deferred::<u32>();
        let tail: Promise<u32> = p.and_then(|v| Ok((v + 1).into()));

        outer.adopt(q);
        inner.resolve(41);

        assert_eq!(tail.wait().unwrap(), 42);
    }

    #[test]
    fn adopt_through_callback() {
        let pool = pool();
        let (d, p) = pool.deferred::<u32>();
        let (later, q) = pool.deferred::<u32>();
        let chained: Promise<u32> = p.and_then(move |_| Ok(Resolution::Adopt(q)));

        d.resolve(0);
        later.resolve(5);

        assert_eq!(chained.wait().unwrap(), 5);
    }

    #[test]
    fn adopt_rejected_promise() {
        let pool = pool();
        let (d, p) = pool.deferred::<u32>();

        d.adopt(pool.reject("inner"));
        assert_eq!(p.wait().unwrap_err().to_string(), "inner");
    }

    #[test]
    fn adopting_settled_value_matches_plain_value() {
        let pool = pool();
        let (a, pa) = pool.deferred::<u32>();
        let (b, pb) = pool.deferred::<u32>();

        a.resolve(7);
        b.adopt(pool.resolved(7));

        assert_eq!(pa.wait().unwrap(), pb.wait().unwrap());
    }

    #[test]
    fn deep_adoption() {
        let pool = pool();
        let (first, mut tail) = pool.deferred::<u32>();
        let mut resolvers = vec![first];

        for _ in 0..50 {
            let (d, p) = pool.deferred::<u32>();
            resolvers.last().unwrap().adopt(p.clone());
            resolvers.push(d);
            tail = tail.forward();
        }

        resolvers.last().unwrap().resolve(3);
        assert_eq!(tail.wait().unwrap(), 3);
    }

    #[test]
    fn concurrent_registration_runs_each_continuation_once_in_order() {
        const THREADS: usize = 6;
        const PER_THREAD: usize = 50;

        let pool = pool();
        let (d, p) = pool.deferred::<u32>();
        let log = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(std::sync::Barrier::new(THREADS + 1));

        let registrars: Vec<_> = (0..THREADS)
            .map(|t| {
                let p = p.clone();
                let log = log.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..PER_THREAD)
                        .map(|i| {
                            let log = log.clone();
                            p.and_then(move |v: u32| {
                                log.lock().unwrap().push((t, i, v));
                                Ok(Resolution::Value(()))
                            })
                        })
                        .collect::<Vec<Promise<()>>>()
                })
            })
            .collect();

        let resolver = {
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                std::thread::sleep(std::time::Duration::from_micros(200));
                d.resolve(7);
            })
        };

        for r in registrars {
            for tail in r.join().unwrap() {
                tail.wait().unwrap();
            }
        }
        resolver.join().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), THREADS * PER_THREAD);
        assert!(log.iter().all(|&(_, _, v)| v == 7));

        for t in 0..THREADS {
            let seen: Vec<_> = log
                .iter()
                .filter(|&&(who, _, _)| who == t)
                .map(|&(_, i, _)| i)
                .collect();
            assert_eq!(seen, (0..PER_THREAD).collect::<Vec<_>>());
        }
    }

    #[test]
    fn concurrent_settlement_settles_once() {
        let pool = pool();

        for _ in 0..20 {
            let (d, p) = pool.deferred::<usize>();
            let threads: Vec<_> = (0..8)
                .map(|i| {
                    let d = d.clone();
                    std::thread::spawn(move || d.resolve(i))
                })
                .collect();

            let observers: Vec<_> = (0..4).map(|_| p.forward()).collect();
            for t in threads {
                t.join().unwrap();
            }

            let first = p.wait().unwrap();
            for o in observers {
                assert_eq!(o.wait().unwrap(), first);
            }
        }
    }
}
