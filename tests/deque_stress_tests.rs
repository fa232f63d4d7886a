//! Contention stress for the work-stealing queue.
//!
//! The hard case of the Chase-Lev algorithm is the last element: the owner's
//! `take` and every thief's `steal` race for it through the tail
//! compare-exchange, and exactly one contender may win. This test hammers
//! that window with exact delivery accounting; a double delivery or a lost
//! task shows up as a sum mismatch.

use squall::deque::{StealResult, TaskQueue};
use squall::Task;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const ROUNDS: u64 = 1_000_000;
const THIEVES: usize = 3;

fn nop(_: *mut Task) {}

#[test]
fn last_element_contention_delivers_exactly_once() {
    let queue = Arc::new(TaskQueue::with_capacity(2).unwrap());
    let thief_wins = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let thieves: Vec<_> = (0..THIEVES)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let thief_wins = Arc::clone(&thief_wins);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match queue.steal() {
                        StealResult::Success(_) => {
                            thief_wins.fetch_add(1, Ordering::SeqCst);
                        }
                        StealResult::Empty | StealResult::Retry => std::hint::spin_loop(),
                    }
                }
            })
        })
        .collect();

    let mut task = Task::new(nop);
    let token = NonNull::from(&mut task);
    let mut owner_wins: u64 = 0;

    for round in 1..=ROUNDS {
        queue.push(token).unwrap();

        let owner_claimed = loop {
            match queue.take() {
                StealResult::Success(claimed) => {
                    assert_eq!(claimed, token);
                    break true;
                }
                StealResult::Empty => break false,
                StealResult::Retry => std::hint::spin_loop(),
            }
        };
        if owner_claimed {
            owner_wins += 1;
        }

        // The round's task went to exactly one contender; wait for the
        // books to balance before reloading the queue.
        let expected_thief_wins = round - owner_wins;
        while thief_wins.load(Ordering::SeqCst) < expected_thief_wins {
            std::hint::spin_loop();
        }
    }

    stop.store(true, Ordering::SeqCst);
    for thief in thieves {
        thief.join().unwrap();
    }

    assert_eq!(
        owner_wins + thief_wins.load(Ordering::SeqCst),
        ROUNDS,
        "every round must deliver its task exactly once"
    );
}

#[test]
fn drained_queue_leaves_all_parties_live() {
    // After heavy contention the queue must still work for both ends.
    let queue = Arc::new(TaskQueue::with_capacity(8).unwrap());
    let mut tasks: Vec<Task> = (0..4).map(|_| Task::new(nop)).collect();

    for i in 0..4 {
        queue.push(NonNull::from(&mut tasks[i])).unwrap();
    }
    let stealer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut got = 0;
            loop {
                match queue.steal() {
                    StealResult::Success(_) => got += 1,
                    StealResult::Retry => continue,
                    StealResult::Empty => break,
                }
            }
            got
        })
    };
    let mut taken = 0;
    loop {
        match queue.take() {
            StealResult::Success(_) => taken += 1,
            StealResult::Retry => continue,
            StealResult::Empty => break,
        }
    }
    let stolen = stealer.join().unwrap();
    assert_eq!(taken + stolen, 4);

    // Both ends stay usable afterwards.
    queue.push(NonNull::from(&mut tasks[0])).unwrap();
    assert!(matches!(queue.take(), StealResult::Success(_)));
}
