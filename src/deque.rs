//! Bounded lock-free work-stealing task queue.
//!
//! A Chase-Lev deque over a fixed power-of-two ring of atomic task pointers,
//! following the C11 formulation in:
//!
//! > Nhat Minh Le, Antoniu Pop, Albert Cohen, and Francesco Zappa Nardelli.
//! > "Correct and efficient work-stealing for weak memory models."
//! > PPoPP '13, pp. 69-80.
//!
//! with one correction: [`take`](TaskQueue::take) performs an early emptiness
//! check before decrementing `head`. The indices are unsigned, and with an
//! empty queue the paper's unconditional `head - 1` wraps below `tail` to a
//! huge value, which corrupts the emptiness classification that callers rely
//! on for their steal-or-stall decision.
//!
//! The owning worker pushes and takes at the head end (LIFO); any other
//! worker steals from the tail end (FIFO). `head` is written only by the
//! owner, `tail` only through compare-exchange. Both are 32-bit counters that
//! increase monotonically and are compared by wrap-safe differences, valid as
//! long as fewer than 2^31 operations elapse between observations, which the
//! capacity bound guarantees.
//!
//! The ordering constraints below are not optional; they are the entire
//! correctness argument of the queue. The acquire/release pairs across
//! `head`/`tail` plus the two full fences in `take` and `steal` ensure that
//! at most one of them claims the last task, and that the winner observes the
//! slot contents written by the matching `push`.

use crate::error::{Error, Result};
use crate::task::Task;
use crossbeam::utils::CachePadded;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicPtr, AtomicU32, Ordering};

/// Outcome of a [`take`](TaskQueue::take) or [`steal`](TaskQueue::steal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealResult {
    /// Claimed a task
    Success(NonNull<Task>),
    /// The queue was empty
    Empty,
    /// Lost a race for the last task; retrying may succeed
    Retry,
}

/// Bounded single-owner, multi-stealer task queue
pub struct TaskQueue {
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
    slots: Box<[AtomicPtr<Task>]>,
    mask: u32,
}

/// Wrap-safe signed distance from `b` to `a`
#[inline]
fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

impl TaskQueue {
    /// Create a queue with `capacity` slots; `capacity` must be a power of
    /// two >= 2 and at most 2^31.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() || capacity > (1 << 31) {
            return Err(Error::config(format!(
                "task queue capacity must be a power of two in [2, 2^31], got {capacity}"
            )));
        }
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        Ok(Self {
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
            slots,
            mask: (capacity - 1) as u32,
        })
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Approximate number of queued tasks
    pub fn len(&self) -> usize {
        let h = self.head.load(Ordering::Relaxed);
        let t = self.tail.load(Ordering::Relaxed);
        diff(h, t).max(0) as usize
    }

    /// Whether the queue appears empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a task at the owner end. Owner only.
    ///
    /// Returns the task back if the queue is full; the scheduler's policy for
    /// that case is to execute the task inline rather than block.
    pub fn push(&self, task: NonNull<Task>) -> std::result::Result<(), NonNull<Task>> {
        let h = self.head.load(Ordering::Relaxed);
        let t = self.tail.load(Ordering::Acquire);
        if h.wrapping_sub(t) > self.mask {
            return Err(task);
        }
        self.slots[(h & self.mask) as usize].store(task.as_ptr(), Ordering::Relaxed);
        fence(Ordering::Release);
        self.head.store(h.wrapping_add(1), Ordering::Relaxed);
        Ok(())
    }

    /// Claim the newest task (LIFO). Owner only.
    pub fn take(&self) -> StealResult {
        // Early emptiness check; not in the source paper, see module docs.
        let h = self.head.load(Ordering::Relaxed);
        let t = self.tail.load(Ordering::Relaxed);
        if diff(h, t) <= 0 {
            return StealResult::Empty;
        }

        let h = h.wrapping_sub(1);
        self.head.store(h, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.tail.load(Ordering::Relaxed);

        if diff(h, t) > 0 {
            // More than one task left; the slot is ours.
            let task = self.slots[(h & self.mask) as usize].load(Ordering::Relaxed);
            StealResult::Success(unsafe { NonNull::new_unchecked(task) })
        } else if t == h {
            // Last task: race any stealers for it.
            let task = self.slots[(h & self.mask) as usize].load(Ordering::Relaxed);
            let result = if self
                .tail
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                StealResult::Success(unsafe { NonNull::new_unchecked(task) })
            } else {
                StealResult::Retry
            };
            self.head.store(h.wrapping_add(1), Ordering::Relaxed);
            result
        } else {
            // Stealers drained the queue under us; restore head.
            self.head.store(h.wrapping_add(1), Ordering::Relaxed);
            StealResult::Empty
        }
    }

    /// Claim the oldest task (FIFO). Any non-owner.
    pub fn steal(&self) -> StealResult {
        let t = self.tail.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let h = self.head.load(Ordering::Acquire);

        if diff(h, t) <= 0 {
            return StealResult::Empty;
        }

        let task = self.slots[(t & self.mask) as usize].load(Ordering::Relaxed);
        if self
            .tail
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            StealResult::Success(unsafe { NonNull::new_unchecked(task) })
        } else {
            StealResult::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: *mut Task) {}

    fn arena(n: usize) -> Vec<Task> {
        (0..n).map(|_| Task::new(nop)).collect()
    }

    fn ptr_of(tasks: &mut [Task], i: usize) -> NonNull<Task> {
        NonNull::from(&mut tasks[i])
    }

    #[test]
    fn test_take_is_lifo() {
        let queue = TaskQueue::with_capacity(8).unwrap();
        let mut tasks = arena(3);
        for i in 0..3 {
            queue.push(ptr_of(&mut tasks, i)).unwrap();
        }
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 2)));
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 1)));
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 0)));
        assert_eq!(queue.take(), StealResult::Empty);
    }

    #[test]
    fn test_steal_is_fifo() {
        let queue = TaskQueue::with_capacity(8).unwrap();
        let mut tasks = arena(3);
        for i in 0..3 {
            queue.push(ptr_of(&mut tasks, i)).unwrap();
        }
        assert_eq!(queue.steal(), StealResult::Success(ptr_of(&mut tasks, 0)));
        assert_eq!(queue.steal(), StealResult::Success(ptr_of(&mut tasks, 1)));
        assert_eq!(queue.steal(), StealResult::Success(ptr_of(&mut tasks, 2)));
        assert_eq!(queue.steal(), StealResult::Empty);
    }

    #[test]
    fn test_take_and_steal_meet_in_the_middle() {
        let queue = TaskQueue::with_capacity(8).unwrap();
        let mut tasks = arena(5);
        for i in 0..5 {
            queue.push(ptr_of(&mut tasks, i)).unwrap();
        }
        assert_eq!(queue.steal(), StealResult::Success(ptr_of(&mut tasks, 0)));
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 4)));
        assert_eq!(queue.steal(), StealResult::Success(ptr_of(&mut tasks, 1)));
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 3)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_full_returns_task() {
        let queue = TaskQueue::with_capacity(4).unwrap();
        let mut tasks = arena(5);
        for i in 0..4 {
            queue.push(ptr_of(&mut tasks, i)).unwrap();
        }
        let overflow = ptr_of(&mut tasks, 4);
        assert_eq!(queue.push(overflow), Err(overflow));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_empty_take_does_not_corrupt_indices() {
        let queue = TaskQueue::with_capacity(4).unwrap();
        let mut tasks = arena(1);
        // Repeated takes on an empty queue must stay EMPTY, not wrap head
        // below tail.
        for _ in 0..3 {
            assert_eq!(queue.take(), StealResult::Empty);
        }
        queue.push(ptr_of(&mut tasks, 0)).unwrap();
        assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 0)));
        assert_eq!(queue.take(), StealResult::Empty);
        assert_eq!(queue.steal(), StealResult::Empty);
    }

    #[test]
    fn test_capacity_slots_all_usable() {
        let queue = TaskQueue::with_capacity(4).unwrap();
        let mut tasks = arena(4);
        for i in 0..4 {
            queue.push(ptr_of(&mut tasks, i)).unwrap();
        }
        for i in (0..4).rev() {
            assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, i)));
        }
    }

    #[test]
    fn test_rejects_invalid_capacities() {
        for capacity in [0usize, 1, 3, 12, 1000] {
            assert!(TaskQueue::with_capacity(capacity).is_err());
        }
    }

    #[test]
    fn test_reuse_after_drain_cycles_the_ring() {
        let queue = TaskQueue::with_capacity(2).unwrap();
        let mut tasks = arena(1);
        // Cycle through the ring many times to exercise index wrapping paths.
        for _ in 0..1000 {
            queue.push(ptr_of(&mut tasks, 0)).unwrap();
            assert_eq!(queue.take(), StealResult::Success(ptr_of(&mut tasks, 0)));
        }
        assert!(queue.is_empty());
    }
}
