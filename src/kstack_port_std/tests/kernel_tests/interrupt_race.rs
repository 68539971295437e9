//! Interrupt handlers pended asynchronously push while tasks are popping.
use kstack_kernel::{PopError, Timeout, Word};
use kstack_port_std::{pend_interrupt, run_in_interrupt, spawn_task, task_count, PortInstance};
use std::{sync::Mutex, thread};

use crate::{new_stack, wait_until};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

const CAPACITY: usize = 8;
const NUM_BATCHES: usize = 32;
const NUM_VALUES: usize = CAPACITY * NUM_BATCHES;

static RECEIVED: Mutex<Vec<Word>> = Mutex::new(Vec::new());

fn num_received() -> usize {
    RECEIVED.lock().unwrap().len()
}

pub fn run<Traits: SupportedSystemTraits>() {
    let stack = run_in_interrupt::<Traits, _>(|| new_stack::<Traits>(CAPACITY));

    // One consumer blocks with a short timeout, the other polls
    let blocking = spawn_task::<Traits, _>(1, move || {
        while num_received() < NUM_VALUES {
            match stack.pop(Timeout::from_millis(5)) {
                Ok(x) => RECEIVED.lock().unwrap().push(x),
                Err(PopError::Timeout) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
            assert!(stack.len() <= stack.capacity());
        }
    });
    let polling = spawn_task::<Traits, _>(2, move || {
        while num_received() < NUM_VALUES {
            match stack.pop(Timeout::NoWait) {
                Ok(x) => RECEIVED.lock().unwrap().push(x),
                Err(PopError::WouldBlock) => thread::yield_now(),
                Err(e) => panic!("unexpected error: {e:?}"),
            }
            assert!(stack.len() <= stack.capacity());
        }
    });

    // Never more than `CAPACITY` values are in flight, so no push finds the
    // stack full
    for batch in 0..NUM_BATCHES {
        for i in 0..CAPACITY {
            let x = (batch * CAPACITY + i) as Word;
            pend_interrupt::<Traits>(move || {
                stack.push(x);
                assert!(stack.len() <= stack.capacity());
            });
        }
        wait_until(|| num_received() >= (batch + 1) * CAPACITY);
    }

    blocking.join();
    polling.join();

    // Every value was received exactly once
    let mut received = RECEIVED.lock().unwrap().clone();
    received.sort_unstable();
    assert_eq!(received, (0..NUM_VALUES as Word).collect::<Vec<_>>());

    assert_eq!(run_in_interrupt::<Traits, _>(move || stack.len()), 0);
    assert_eq!(task_count::<Traits>(), 0);
}
