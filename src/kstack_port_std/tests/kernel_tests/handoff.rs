//! A value pushed while a task is waiting goes straight to the task.
use kstack_kernel::Timeout;
use kstack_port_std::{run_in_interrupt, spawn_task, PortInstance};
use std::collections::BTreeSet;

use crate::{new_stack, wait_until};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    let stack = run_in_interrupt::<Traits, _>(|| new_stack::<Traits>(2));

    let consumer = spawn_task::<Traits, _>(1, move || stack.pop(Timeout::Forever));
    wait_until(|| consumer.is_waiting());

    // The buffer is bypassed
    run_in_interrupt::<Traits, _>(move || {
        stack.push(42);
        assert_eq!(stack.len(), 0);
    });
    assert_eq!(consumer.join(), Ok(42));

    // Each waiter receives exactly one of the values
    let consumers: Vec<_> = (0..4)
        .map(|_| spawn_task::<Traits, _>(1, move || stack.pop(Timeout::Forever)))
        .collect();
    wait_until(|| consumers.iter().all(|c| c.is_waiting()));

    run_in_interrupt::<Traits, _>(move || {
        for x in 100..104 {
            stack.push(x);
        }
        assert_eq!(stack.len(), 0);
    });

    let received: BTreeSet<_> = consumers
        .into_iter()
        .map(|c| c.join().unwrap())
        .collect();
    assert_eq!(received, (100..104).collect());

    // Once the wait queue is empty, values are stored again
    run_in_interrupt::<Traits, _>(move || {
        stack.push(1);
        assert_eq!(stack.len(), 1);
    });
}
