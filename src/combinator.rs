//! Combining promises.
//!
//! [LanePool::all] waits on a list of promises and produces a promise for the
//! list of their values, in input order:
//!
//! ```
//! use pledge::pool::LanePool;
//! use pledge::promise::Resolution;
//!
//! let pool = LanePool::new().unwrap();
//! let (a, pa) = pool.deferred::<u32>();
//! let (b, pb) = pool.deferred::<u32>();
//!
//! let both = pool.all::<u32, _>([pa.into(), pb.into(), Resolution::Value(3)]);
//! b.resolve(2);
//! a.resolve(1);
//! assert_eq!(both.wait().unwrap(), vec![1, 2, 3]);
//! ```
//!
//! The first input to fail fails the aggregate with its reason. Whatever the
//! other inputs do afterwards is not observable through the aggregate.
use std::sync::{Arc, Mutex};

use log::trace;

use crate::{
    pool::LanePool,
    promise::{lock, Continuation, Promise, Resolution},
};

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    /// Record `value` for input `idx`. Returns every value once the last
    /// slot is filled. A slot keeps the first value written to it.
    fn fill(&mut self, idx: usize, value: T) -> Option<Vec<T>> {
        if self.is_filled(idx) {
            return None;
        }

        self.slots[idx] = Some(value);
        self.remaining -= 1;

        if self.remaining > 0 {
            return None;
        }

        self.slots.drain(..).collect()
    }

    /// Slots are handed out once all of them are filled.
    fn is_filled(&self, idx: usize) -> bool {
        self.remaining == 0 || self.slots[idx].is_some()
    }
}

impl LanePool {
    /// A promise for the values of all `inputs`, in order.
    ///
    /// Plain values are treated as already fulfilled promises. An empty input
    /// produces an empty list.
    pub fn all<T, I>(&self, inputs: I) -> Promise<Vec<T>>
    where
        T: Clone + Send + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T>>,
    {
        let inputs: Vec<Promise<T>> = inputs
            .into_iter()
            .map(|input| match input.into() {
                Resolution::Value(v) => self.resolved(v),
                Resolution::Adopt(p) => p,
            })
            .collect();

        let (deferred, promise) = self.deferred::<Vec<T>>();

        if inputs.is_empty() {
            deferred.resolve(Vec::new());
            return promise;
        }

        trace!("gathering {} promises", inputs.len());

        let gather = Arc::new(Mutex::new(Gather {
            slots: inputs.iter().map(|_| None).collect(),
            remaining: inputs.len(),
        }));

        for (idx, input) in inputs.into_iter().enumerate() {
            let (on_value, on_reason) = (gather.clone(), gather.clone());
            let (fulfil, fail) = (deferred.clone(), deferred.clone());

            input.subscribe(Continuation::new(
                move |value| {
                    let values = lock(&on_value).fill(idx, value);

                    if let Some(values) = values {
                        fulfil.resolve(values);
                    }
                },
                move |reason| {
                    if !lock(&on_reason).is_filled(idx) {
                        fail.reject(reason);
                    }
                },
            ));
        }

        promise
    }
}
