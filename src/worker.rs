//! Worker threads and the work loop.
//!
//! Each worker owns one task queue and one OS thread. The thread spins until
//! the scheduler signals termination, taking work from the local queue and
//! stealing from peers when the local work dries up. A worker that fails a
//! full steal pass yields the OS thread a bounded number of times and then
//! parks on the scheduler's stall latch.
//!
//! Completing a task decrements the wait counter of its successor, and when
//! that counter hits zero the successor is carried straight into the next
//! loop iteration, skipping the queue round-trip that a fresh submission
//! would pay.

use crate::deque::{StealResult, TaskQueue};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::task::Task;
use crossbeam::utils::Backoff;
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// One worker: a task queue and the slot its thread handle is parked in
/// between spawn and join. The worker's index is implied by its position in
/// the scheduler's worker array and carried by its thread-local routing key.
pub(crate) struct Worker {
    pub(crate) queue: TaskQueue,
    pub(crate) handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new(queue_capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: TaskQueue::with_capacity(queue_capacity)?,
            handle: Mutex::new(None),
        })
    }
}

/// Routing key for `submit`, `terminate` and friends: which worker is running
/// on this thread.
#[derive(Clone, Copy)]
struct CurrentWorker {
    sched: NonNull<Scheduler>,
    index: usize,
}

thread_local! {
    static CURRENT: Cell<Option<CurrentWorker>> = Cell::new(None);
}

/// Run `f` with the calling thread's scheduler and worker index.
///
/// Panics when called from a thread that is not a scheduler worker; the
/// scheduling entry points are only meaningful from task bodies.
pub(crate) fn with_current<R>(operation: &str, f: impl FnOnce(&Scheduler, usize) -> R) -> R {
    CURRENT.with(|current| {
        let current = current
            .get()
            .unwrap_or_else(|| panic!("squall::{operation} called from a non-worker thread"));
        // Safety: the worker thread that set this pointer holds an Arc on the
        // scheduler for its whole lifetime, and clears the pointer on exit.
        f(unsafe { current.sched.as_ref() }, current.index)
    })
}

/// Worker thread entry point.
pub(crate) fn worker_main(sched: Arc<Scheduler>, index: usize) {
    CURRENT.with(|current| {
        current.set(Some(CurrentWorker {
            sched: NonNull::from(&*sched),
            index,
        }))
    });

    if let Some(entry) = sched.entry {
        entry(index);
    }

    // Rendezvous with the other workers before any stealing can happen, so
    // every peer queue is live before the first victim scan.
    sched.barrier.fetch_sub(1, Ordering::SeqCst);
    while sched.barrier.load(Ordering::SeqCst) > 0 {
        if sched.terminate.load(Ordering::SeqCst) {
            // Terminated before the rendezvous completed: become joinable
            // without running the exit callback.
            CURRENT.with(|current| current.set(None));
            sched.barrier.fetch_add(1, Ordering::SeqCst);
            return;
        }
        thread::yield_now();
    }

    debug!(worker = index, "worker online");

    // Contain panics from task bodies: a dying worker must still release its
    // peers and become joinable, or the scheduler's join would hang instead
    // of reporting the failure. (The release profile aborts on panic, so this
    // only matters for unwinding builds.)
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        work_loop(&sched, index)
    }));

    match outcome {
        Ok(()) => {
            if let Some(exit) = sched.exit {
                exit(index);
            }
            debug!(worker = index, "worker offline");
            CURRENT.with(|current| current.set(None));
            sched.barrier.fetch_add(1, Ordering::SeqCst);
        }
        Err(panic) => {
            let peers = sched.workers.len() as u32 - 1;
            sched.signal_terminate(peers);
            CURRENT.with(|current| current.set(None));
            sched.barrier.fetch_add(1, Ordering::SeqCst);
            std::panic::resume_unwind(panic);
        }
    }
}

fn work_loop(sched: &Scheduler, index: usize) {
    let worker = &sched.workers[index];
    let mut carried: Option<NonNull<Task>> = None;
    let mut misses: u32 = 0;

    while !sched.terminate.load(Ordering::Relaxed) {
        if let Some(task) = carried.take() {
            carried = unsafe { invoke(sched, index, task) };
            continue;
        }

        if let StealResult::Success(task) = take_local(worker) {
            misses = 0;
            carried = Some(task);
            continue;
        }

        if let Some(task) = sched.steal_for(index) {
            misses = 0;
            carried = Some(task);
            continue;
        }

        misses += 1;
        if misses <= sched.stall_yield_limit {
            thread::yield_now();
        } else {
            trace!(worker = index, "no work anywhere, stalling");
            sched.stall.wait();
            misses = 0;
        }
    }
}

/// Take from the local queue, absorbing races for the last task.
fn take_local(worker: &Worker) -> StealResult {
    let backoff = Backoff::new();
    loop {
        match worker.queue.take() {
            StealResult::Retry => backoff.spin(),
            claimed => return claimed,
        }
    }
}

/// Invoke a task and hand back its successor when this completion was the one
/// that made it runnable.
///
/// The successor pointer is read before the body runs because the body owns
/// the task's storage and may retire or reuse it. The release ordering on the
/// wait decrement publishes every write the task made to whichever thread
/// ends up running the successor; the acquire fence on the zero transition
/// completes the pairing for the in-place handoff path.
///
/// # Safety
///
/// `task` must point to a task that is runnable and not referenced by any
/// queue, with a body and successor link that were published before it became
/// runnable.
pub(crate) unsafe fn invoke(
    sched: &Scheduler,
    index: usize,
    task: NonNull<Task>,
) -> Option<NonNull<Task>> {
    let task = task.as_ptr();
    let next = (*task).next;

    #[cfg(feature = "graph")]
    let node = crate::graph::node_open(sched, index, task);

    ((*task).body)(task);

    #[cfg(feature = "graph")]
    crate::graph::node_close(sched, index, node);

    #[cfg(not(feature = "graph"))]
    let _ = index;

    if next.is_null() {
        return None;
    }
    match (*next).wait.fetch_sub(1, Ordering::Release) {
        1 => {
            fence(Ordering::Acquire);
            Some(NonNull::new_unchecked(next))
        }
        0 => panic!(
            "squall: wait counter underflow on task {next:p}; \
             a predecessor completed into a successor that was already runnable"
        ),
        _ => None,
    }
}

/// Queue a task on a worker, waking a stalled peer. When the queue is full
/// the task is executed inline on the caller's stack instead, together with
/// any successors that completion unlocks; submission never blocks.
///
/// # Safety
///
/// Same contract as [`invoke`], and `index` must be the calling thread's own
/// worker index.
pub(crate) unsafe fn submit_local(sched: &Scheduler, index: usize, task: NonNull<Task>) {
    match sched.workers[index].queue.push(task) {
        Ok(()) => sched.stall.signal(),
        Err(task) => {
            trace!(worker = index, "queue full, executing inline");
            let mut chase = Some(task);
            while let Some(task) = chase.take() {
                chase = invoke(sched, index, task);
            }
        }
    }
}
