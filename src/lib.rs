//! # `pledge`: promises settled on serial lanes
//!
//! This crate implements deferred values with continuation chaining. Work
//! registers success and failure callbacks on a [promise::Promise]; each
//! callback runs exactly once, in registration order, and always
//! asynchronously with respect to whoever registered it, whether the result
//! was already known or not.
//!
//! Thread safety comes from lanes rather than locks. A [pool::LanePool] owns a
//! handful of [lane::Lane]s, each a single worker thread with a FIFO queue.
//! Every promise chain is bound to one lane, and its state is only touched by
//! jobs running there. Producers and consumers of a promise may live on any
//! thread.
//!
//! For the lane machinery, see the [lane] and [pool] modules. To see how
//! promises settle and chain, see the [promise] module; [combinator] has the
//! aggregate `all`.
//!
//! ## Example
//!
//! Settle a promise from one thread and chain on it from another:
//!
//! ```
//! use pledge::pool::LanePool;
//! use pledge::promise::{Promise, Resolution};
//! use std::thread;
//!
//! let pool = LanePool::new().unwrap();
//! let (deferred, promise) = pool.deferred::<String>();
//!
//! let greeting: Promise<String> = promise
//!     .and_then(|name| Ok(Resolution::Value(format!("Hello, {name}"))))
//!     .and_then(|s| Ok(format!("{s}!").into()));
//!
//! thread::spawn(move || deferred.resolve("world".into()));
//!
//! assert_eq!(greeting.wait().unwrap(), "Hello, world!");
//! ```
pub mod combinator;
pub mod lane;
pub mod pool;
pub mod promise;
