//! Pushing onto a full stack is a fatal error for the caller.
use kstack_kernel::Timeout;
use kstack_port_std::{run_in_interrupt, spawn_task, PortInstance};
use std::panic::{self, AssertUnwindSafe};

use crate::{new_stack, panic_message};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    let stack = run_in_interrupt::<Traits, _>(|| new_stack::<Traits>(1));

    // From a task
    let task = spawn_task::<Traits, _>(1, move || {
        stack.push(1);
        stack.push(2);
    });
    let payload = panic::catch_unwind(AssertUnwindSafe(|| task.join())).unwrap_err();
    assert_eq!(panic_message(&*payload), "stack is full");

    // From an interrupt handler
    let payload =
        panic::catch_unwind(AssertUnwindSafe(|| run_in_interrupt::<Traits, _>(move || stack.push(3))))
            .unwrap_err();
    assert_eq!(panic_message(&*payload), "stack is full");

    // The rejected values were discarded, and the system is still usable
    spawn_task::<Traits, _>(1, move || {
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.pop(Timeout::NoWait), Ok(1));
        stack.push(4);
        assert_eq!(stack.pop(Timeout::NoWait), Ok(4));
    })
    .join();
}
