//! Blocking is only allowed in a waitable context.
use kstack_kernel::{PopError, Timeout};
use kstack_port_std::{run_in_interrupt, spawn_task, with_cpu_lock, PortInstance};
use std::panic::{self, AssertUnwindSafe};

use crate::{new_stack, panic_message};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    let stack = run_in_interrupt::<Traits, _>(|| new_stack::<Traits>(4));

    // Interrupt context
    run_in_interrupt::<Traits, _>(move || {
        assert_eq!(stack.pop(Timeout::Forever), Err(PopError::BadContext));
        assert_eq!(
            stack.pop(Timeout::from_millis(10)),
            Err(PopError::BadContext)
        );
        assert_eq!(stack.pop(Timeout::NoWait), Err(PopError::WouldBlock));

        // Non-blocking operations are fine
        stack.push(1);
        stack.push(2);
        assert_eq!(stack.pop(Timeout::NoWait), Ok(2));

        // A pop that doesn't have to wait succeeds regardless of the timeout
        assert_eq!(stack.pop(Timeout::Forever), Ok(1));
    });

    // CPU Lock entered by the application
    spawn_task::<Traits, _>(1, move || {
        with_cpu_lock::<Traits, _>(|| {
            assert_eq!(stack.pop(Timeout::Forever), Err(PopError::BadContext));
            assert_eq!(stack.pop(Timeout::NoWait), Err(PopError::WouldBlock));

            stack.push(3);
            assert_eq!(stack.len(), 1);
            assert_eq!(stack.pop(Timeout::Forever), Ok(3));
        });

        // Blocking is allowed again after leaving CPU Lock
        assert_eq!(
            stack.pop(Timeout::from_millis(10)),
            Err(PopError::Timeout)
        );
    })
    .join();

    // A thread not managed by the port
    let payload = panic::catch_unwind(AssertUnwindSafe(|| stack.len())).unwrap_err();
    assert!(
        panic_message(&*payload).contains("must be called from a task or an interrupt handler"),
        "{:?}",
        panic_message(&*payload)
    );

    // The failed call didn't leave CPU Lock behind
    assert_eq!(run_in_interrupt::<Traits, _>(move || stack.len()), 0);
}
