//! Medley Decode Library
//!
//! Bounded worker pool with a backpressured completion channel.
//!
//! This crate provides the decode-side threading model for the media cache:
//! a fixed number of worker threads pull jobs from a shared queue, run them
//! through a job runner callback, and deliver results over a bounded
//! completion channel. The consumer (the cache facade) drains completions
//! from its own thread; workers never touch GPU or cache state directly.
//!
//! # Example
//!
//! ```
//! use medley_decode::{PoolConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! let config = PoolConfig::new(2);
//! let (pool, completions) = WorkerPool::spawn(
//!     config,
//!     Arc::new(|job: u32| Some(job * 2)),
//! );
//!
//! pool.submit(21);
//!
//! // The consumer drains completions whenever convenient.
//! let result = completions.recv_timeout(std::time::Duration::from_secs(1));
//! assert_eq!(result, Some(42));
//! ```

mod worker;

pub use worker::{CompletionReceiver, JobRunner, PoolConfig, WorkerPool};
