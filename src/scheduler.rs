//! The scheduler facade: worker lifetime, work stealing across workers,
//! stalling, termination, and the public scheduling entry points.
//!
//! A scheduler owns N workers and blocks the caller of [`run`] until a task
//! calls [`terminate`]. There is no global queue: the root task is primed
//! onto worker 0 and every other worker bootstraps by stealing.

use crate::config::SchedulerConfig;
use crate::deque::StealResult;
use crate::error::{Error, Result};
use crate::park::{self, StallLatch};
use crate::task::{Task, TaskFn};
use crate::worker::{self, Worker};
use crossbeam::utils::Backoff;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Worker lifetime callback, invoked with the worker's index on its own
/// thread: the entry callback after thread-local state is initialized and
/// before the work loop, the exit callback after the work loop drains.
pub type WorkerCallback = fn(usize);

/// Scheduler state shared by every worker thread.
pub(crate) struct Scheduler {
    pub(crate) workers: Box<[Worker]>,
    pub(crate) stall: StallLatch,
    pub(crate) terminate: AtomicBool,
    /// Startup rendezvous and join-readiness counter: initialized to N,
    /// decremented by each worker coming online, incremented by each worker
    /// becoming joinable.
    pub(crate) barrier: AtomicU32,
    pub(crate) entry: Option<WorkerCallback>,
    pub(crate) exit: Option<WorkerCallback>,
    pub(crate) stall_yield_limit: u32,
    #[cfg(feature = "graph")]
    pub(crate) graph: std::sync::RwLock<Option<Arc<crate::graph::Recording>>>,
}

impl Scheduler {
    /// Steal one task for `thief`, scanning every other worker in index
    /// order. Contended steals are retried with a pause hint before moving
    /// on; a randomized victim order has not measured faster than this scan.
    pub(crate) fn steal_for(&self, thief: usize) -> Option<NonNull<Task>> {
        for (index, victim) in self.workers.iter().enumerate() {
            if index == thief {
                continue;
            }
            let backoff = Backoff::new();
            loop {
                match victim.queue.steal() {
                    StealResult::Success(task) => return Some(task),
                    StealResult::Empty => break,
                    StealResult::Retry => backoff.spin(),
                }
            }
        }
        None
    }

    /// Raise the terminate flag and broadcast the stall latch until the
    /// barrier counter reports that `observed_target` workers are joinable.
    /// The repeated broadcast is what guarantees a worker parking
    /// concurrently with termination still wakes and observes the flag.
    ///
    /// Only the first caller drives the broadcast loop; a second concurrent
    /// terminator is itself one of the workers the first is waiting on, and
    /// must not block.
    pub(crate) fn signal_terminate(&self, observed_target: u32) {
        if self.terminate.swap(true, Ordering::SeqCst) {
            self.stall.broadcast();
            return;
        }
        while self.barrier.load(Ordering::SeqCst) < observed_target {
            self.stall.broadcast();
            thread::yield_now();
        }
        self.stall.broadcast();
    }
}

/// Run a scheduler with one worker per hardware thread.
///
/// Primes worker 0 with `root`, spawns the workers, and blocks until a task
/// calls [`terminate`]. The optional callbacks run on every worker thread at
/// entry and exit. Tasks still queued when termination is signalled are
/// abandoned, never invoked.
///
/// # Safety
///
/// `root` must point to a valid task, and every task submitted during the
/// run must stay valid until its body has returned or the scheduler has shut
/// down. The scheduler never frees tasks; their storage belongs to the
/// caller.
pub unsafe fn run(
    root: *mut Task,
    entry: Option<WorkerCallback>,
    exit: Option<WorkerCallback>,
) -> Result<()> {
    run_with_config(root, entry, exit, &SchedulerConfig::default())
}

/// [`run`] with an explicit worker count.
///
/// # Safety
///
/// Same contract as [`run`].
pub unsafe fn run_with(
    root: *mut Task,
    entry: Option<WorkerCallback>,
    exit: Option<WorkerCallback>,
    workers: usize,
) -> Result<()> {
    let config = SchedulerConfig {
        worker_threads: Some(workers),
        ..SchedulerConfig::default()
    };
    run_with_config(root, entry, exit, &config)
}

/// [`run`] with full control over the scheduler configuration.
///
/// # Safety
///
/// Same contract as [`run`].
pub unsafe fn run_with_config(
    root: *mut Task,
    entry: Option<WorkerCallback>,
    exit: Option<WorkerCallback>,
    config: &SchedulerConfig,
) -> Result<()> {
    let root = NonNull::new(root).ok_or_else(|| Error::config("root task is null"))?;
    config.validate()?;
    let nworkers = config.worker_threads.unwrap_or_else(park::processor_count);

    let workers = (0..nworkers)
        .map(|_| Worker::new(config.queue_capacity))
        .collect::<Result<Vec<_>>>()?
        .into_boxed_slice();

    let sched = Arc::new(Scheduler {
        workers,
        stall: StallLatch::new(),
        terminate: AtomicBool::new(false),
        barrier: AtomicU32::new(nworkers as u32),
        entry,
        exit,
        stall_yield_limit: config.stall_yield_limit,
        #[cfg(feature = "graph")]
        graph: std::sync::RwLock::new(None),
    });

    debug!(
        workers = nworkers,
        queue_capacity = config.queue_capacity,
        "scheduler starting"
    );

    // Prime worker 0; there is no global queue to seed instead.
    if sched.workers[0].queue.push(root).is_err() {
        return Err(Error::concurrency("failed to prime the root task"));
    }

    for index in 0..nworkers {
        let shared = Arc::clone(&sched);
        let spawned = thread::Builder::new()
            .name(format!("squall-worker-{index}"))
            .spawn(move || worker::worker_main(shared, index));
        match spawned {
            Ok(handle) => {
                *sched.workers[index].handle.lock().unwrap() = Some(handle);
            }
            Err(source) => {
                // Unwind whatever came up before surfacing the error: the
                // spawned workers are still inside the startup rendezvous
                // and short-circuit out once they observe the flag.
                sched.signal_terminate(nworkers as u32);
                join_all(&sched);
                return Err(Error::from(source));
            }
        }
    }

    join_all(&sched);
    debug_assert_eq!(sched.barrier.load(Ordering::SeqCst), nworkers as u32);
    debug!("scheduler stopped");
    Ok(())
}

/// Join every spawned worker, re-raising the panic of any worker that died.
fn join_all(sched: &Scheduler) {
    for worker in sched.workers.iter() {
        let handle = worker.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

fn expect_task(task: *mut Task, operation: &str) -> NonNull<Task> {
    NonNull::new(task)
        .unwrap_or_else(|| panic!("squall::{operation} called with a null task pointer"))
}

/// Schedule a task onto the calling worker's queue.
///
/// Must be called from a worker thread. When the queue is full the task is
/// executed inline on the caller's stack instead of being queued, so task
/// bodies must tolerate running before `submit` returns; stack-hungry bodies
/// should keep their state on the heap.
///
/// # Safety
///
/// `task` must point to a valid task whose body and links were set before
/// this call, and which stays valid until its body has returned.
pub unsafe fn submit(task: *mut Task) {
    let task = expect_task(task, "submit");
    worker::with_current("submit", |sched, index| unsafe {
        #[cfg(feature = "graph")]
        crate::graph::record_edge(sched, index, task);
        worker::submit_local(sched, index, task);
    })
}

/// Replace a task's body for its next invocation, holding its successor
/// back until the continuation has also completed.
///
/// The wait counter of the task's successor is incremented by one, matching
/// the extra completion the successor now has to wait for. The task itself is
/// not rescheduled; arrange its re-invocation by linking predecessors to it
/// or by calling [`tail`].
///
/// # Safety
///
/// Must be called from the task's own invocation, with `task` the pointer
/// the body received.
pub unsafe fn continuation(task: *mut Task, body: TaskFn) {
    let task = expect_task(task, "continuation");
    worker::with_current("continuation", |_sched, _index| unsafe {
        let raw = task.as_ptr();
        (*raw).body = body;
        let next = (*raw).next;
        if !next.is_null() {
            (*next).wait.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "graph")]
        crate::graph::record_edge(_sched, _index, task);
    })
}

/// Reschedule the currently-executing task to run again, without changing
/// the DAG.
///
/// The successor's wait counter is incremented so the current invocation and
/// the rescheduled one each account for one completion; loops expressed this
/// way run in constant stack space, unlike a body that recurses directly.
///
/// # Safety
///
/// Same contract as [`continuation`].
pub unsafe fn tail(task: *mut Task) {
    let task = expect_task(task, "tail");
    worker::with_current("tail", |sched, index| unsafe {
        let next = (*task.as_ptr()).next;
        if !next.is_null() {
            (*next).wait.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "graph")]
        crate::graph::record_edge(sched, index, task);
        worker::submit_local(sched, index, task);
    })
}

/// Splice `other` into the currently-executing task's place in the DAG and
/// schedule it.
///
/// When `this` has a successor, `other` inherits it and the successor's wait
/// counter grows by one, since `other`'s completion now also gates it. The
/// current body should return without further graph edits.
///
/// # Safety
///
/// `this` must be the pointer the executing body received; `other` must be a
/// valid task that is not yet runnable.
pub unsafe fn swap(this: *mut Task, other: *mut Task) {
    let this = expect_task(this, "swap");
    let other = expect_task(other, "swap");
    worker::with_current("swap", |sched, index| unsafe {
        let next = (*this.as_ptr()).next;
        if !next.is_null() {
            (*next).wait.fetch_add(1, Ordering::Relaxed);
            (*other.as_ptr()).next = next;
        }
        #[cfg(feature = "graph")]
        crate::graph::record_edge(sched, index, other);
        worker::submit_local(sched, index, other);
    })
}

/// Drop the hold on a task created with [`Task::held`] (or re-held by
/// [`recapture`]). The task is scheduled once every hold and every
/// predecessor completion has been accounted for.
///
/// Must be called exactly once per hold, from a worker thread, after every
/// predecessor of the task has been created.
///
/// # Safety
///
/// Same validity contract as [`submit`].
pub unsafe fn release(task: *mut Task) {
    let task = expect_task(task, "release");
    worker::with_current("release", |sched, index| unsafe {
        match (*task.as_ptr()).wait.fetch_sub(1, Ordering::Release) {
            1 => {
                fence(Ordering::Acquire);
                #[cfg(feature = "graph")]
                crate::graph::record_edge(sched, index, task);
                worker::submit_local(sched, index, task);
            }
            0 => panic!("squall::release dropped a hold that was never taken"),
            _ => {}
        }
    })
}

/// Reset the currently-executing task as if it were freshly created with a
/// new body: [`continuation`] plus a fresh creation hold.
///
/// Before releasing it again with [`release`], the task may be named as the
/// successor of newly-created tasks to fork a subgraph that joins back into
/// its continuation.
///
/// # Safety
///
/// Same contract as [`continuation`].
pub unsafe fn recapture(task: *mut Task, body: TaskFn) {
    continuation(task, body);
    (*task).wait.fetch_add(1, Ordering::Relaxed);
}

/// Signal the current scheduler to terminate.
///
/// Must be called from a worker thread. Returns once every other worker has
/// observed the flag and become joinable; any tasks still queued are
/// abandoned. The time this takes is bounded by the workers' loop latency,
/// not by the amount of queued work.
pub fn terminate() {
    worker::with_current("terminate", |sched, _| {
        debug!("terminate signalled");
        let nworkers = sched.workers.len() as u32;
        // The calling worker observed the flag by definition and cannot bump
        // the barrier until this returns, so wait for the other N-1.
        sched.signal_terminate(nworkers.saturating_sub(1));
    })
}

/// Index of the calling worker thread, in `0..workers`.
///
/// Must be called from a worker thread.
pub fn worker_index() -> usize {
    worker::with_current("worker_index", |_, index| index)
}
