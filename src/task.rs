//! The task primitive.
//!
//! A [`Task`] is the unit of scheduling: a body function to invoke, an
//! optional pointer to a single successor task, and an atomic wait counter
//! holding the number of predecessors that must complete before this task
//! becomes runnable. One task can wait on many predecessors, but a task can
//! only unblock a single successor; this bottom-up dependency shape is enough
//! to construct an arbitrary DAG of tasks (fan-out to many successors is
//! expressed by joining through a shared task whose wait counter counts the
//! fan-in).
//!
//! Tasks are owned by the client. The scheduler holds pointers to them only
//! while they are in flight, between submission and the return of their body,
//! and never frees them. It is convention to make the `Task` the first member
//! of a `#[repr(C)]` task struct so that the pointer passed to the body can
//! be cast back to the containing struct:
//!
//! ```
//! use squall::Task;
//!
//! #[repr(C)]
//! struct Download {
//!     task: Task,
//!     url: String,
//! }
//!
//! fn download_run(task: *mut Task) {
//!     let this = task.cast::<Download>();
//!     let url = unsafe { &(*this).url };
//!     // ... fetch `url` ...
//!     # let _ = url;
//! }
//!
//! let job = Download {
//!     task: Task::new(download_run),
//!     url: "https://example.com".into(),
//! };
//! # let _ = job;
//! ```

use std::ptr;
use std::sync::atomic::AtomicU32;
#[cfg(feature = "graph")]
use std::sync::atomic::Ordering;

/// Task body signature. The pointer is the scheduled [`Task`] itself; cast it
/// to the containing struct to recover per-task state.
pub type TaskFn = fn(*mut Task);

#[cfg(feature = "graph")]
static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(0);

/// The unit of scheduling: a body, at most one successor, and a wait counter.
///
/// The successor pointer and body are plain fields because they are written
/// only by the owning client before the task becomes runnable (or by
/// [`continuation`](crate::continuation) from within the task's own
/// invocation); the wait counter is atomic because predecessors decrement it
/// concurrently from arbitrary worker threads.
#[repr(C)]
pub struct Task {
    pub(crate) body: TaskFn,
    pub(crate) next: *mut Task,
    pub(crate) wait: AtomicU32,
    #[cfg(feature = "graph")]
    pub(crate) id: u32,
}

// Safety: task pointers migrate between worker threads through the deques.
// The scheduler only reads `body` and `next` (written before the task became
// runnable) and mutates `wait` atomically; any other concurrent access is a
// violation of the client contract documented on the scheduling functions.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// Create a task with a zero wait counter and no successor.
    ///
    /// This is the explicit creation dialect: link dependencies with
    /// [`set_next`](Task::set_next) and [`wait_add`](Task::wait_add) before
    /// the task can be observed by a worker, then hand it to the scheduler
    /// with [`submit`](crate::submit).
    pub fn new(body: TaskFn) -> Self {
        Self {
            body,
            next: ptr::null_mut(),
            wait: AtomicU32::new(0),
            #[cfg(feature = "graph")]
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Create a held task: the wait counter starts at one so the task cannot
    /// run until [`release`](crate::release) drops the creation hold.
    ///
    /// When `next` is non-null it becomes this task's successor and its wait
    /// counter is incremented, mirroring that this task must now complete
    /// before `next` can run. Predecessors of the held task are created the
    /// same way, naming it as their `next`; the hold makes it impossible for
    /// the task to start before all of its predecessors exist.
    ///
    /// # Safety
    ///
    /// `next`, when non-null, must point to a valid task that has not yet
    /// become runnable.
    pub unsafe fn held(body: TaskFn, next: *mut Task) -> Self {
        let mut task = Self::new(body);
        task.wait = AtomicU32::new(1);
        if !next.is_null() {
            task.next = next;
            (*next).wait.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        task
    }

    /// Set this task's successor.
    ///
    /// Does not touch the successor's wait counter; pair with
    /// [`wait_add`](Task::wait_add) on the successor. Must happen before this
    /// task becomes runnable.
    pub fn set_next(&mut self, next: *mut Task) {
        self.next = next;
    }

    /// Add `n` pending predecessors to this task's wait counter.
    ///
    /// Must happen before any of those predecessors can complete.
    pub fn wait_add(&self, n: u32) {
        self.wait
            .fetch_add(n, std::sync::atomic::Ordering::Relaxed);
    }
}
