//! # Squall: Memory-Safe Fork/Join Work-Stealing Scheduler
//!
//! Squall executes a dynamic DAG of small, non-blocking tasks on a fixed
//! pool of worker threads, with per-task overhead in the hundreds of
//! nanoseconds. Parallelism is expressed bottom-up: every task may name one
//! successor and carries a counter of predecessors; a task runs exactly
//! once, after all of its predecessors, on some worker thread.
//!
//! ## UNIQUENESS Features
//!
//! - **Lock-Free Work Stealing**: bounded Chase-Lev deques per worker,
//!   owner-LIFO and thief-FIFO, with the weak-memory orderings proven in
//!   Le et al. (PPoPP '13)
//! - **Zero-Requeue Handoff**: a completion that makes its successor
//!   runnable carries it straight into the next invocation
//! - **Never-Blocking Submission**: a full queue executes the task inline
//!   on the submitter's stack instead of blocking or growing
//! - **Signal-Driven Stalling**: idle workers park on a latched condition
//!   variable; wake-ups cannot be lost to the park race
//! - **Client-Owned Tasks**: the scheduler never allocates or frees task
//!   storage
//!
//! ## Architecture
//!
//! ```text
//! Squall Architecture
//! ├── Scheduler (N workers, stall latch, startup barrier, terminate flag)
//! │   ├── Worker 0 ── TaskQueue (bounded Chase-Lev ring)
//! │   ├── Worker 1 ── TaskQueue      ...steals from peers...
//! │   └── Worker N ── TaskQueue
//! ├── Task primitives (submit / tail / swap / continuation / hold+release)
//! └── Graph recording (optional, `graph` feature)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use squall::Task;
//!
//! fn hello_run(task: *mut Task) {
//!     println!("hello from worker {}", squall::worker_index());
//!     squall::terminate();
//!     # let _ = task;
//! }
//!
//! let mut root = Task::new(hello_run);
//! unsafe {
//!     squall::run_with(&mut root, None, None, 2).unwrap();
//! }
//! ```
//!
//! ## Research Citations
//!
//! - **Work Stealing**: Blumofe & Leiserson (1999) - Scheduling multithreaded
//!   computations by work stealing
//! - **Deque Algorithm**: Chase & Lev (2005) - Dynamic circular work-stealing
//!   deque
//! - **Weak Memory Correctness**: Le, Pop, Cohen & Zappa Nardelli (PPoPP '13)
//!   - Correct and efficient work-stealing for weak memory models

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod config;
pub mod deque;
pub mod error;
pub mod graph;
pub mod task;

mod park;
mod scheduler;
mod worker;

// Re-export main types
pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use scheduler::{
    continuation, recapture, release, run, run_with, run_with_config, submit, swap, tail,
    terminate, worker_index, WorkerCallback,
};
pub use task::{Task, TaskFn};
