//! Pushes and pops from a single task.
use kstack_kernel::{PopError, Timeout};
use kstack_port_std::{spawn_task, task_count, PortInstance};

use crate::new_stack;

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    spawn_task::<Traits, _>(1, task_body::<Traits>).join();

    // Exited tasks are no longer tracked
    assert_eq!(task_count::<Traits>(), 0);
}

fn task_body<Traits: SupportedSystemTraits>() {
    let stack = new_stack::<Traits>(3);
    assert_eq!(stack.capacity(), 3);
    assert!(stack.is_empty());

    stack.push(10);
    stack.push(20);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.pop(Timeout::Forever), Ok(20));
    stack.push(30);
    assert_eq!(stack.pop(Timeout::Forever), Ok(30));
    assert_eq!(stack.pop(Timeout::Forever), Ok(10));
    assert_eq!(stack.pop(Timeout::NoWait), Err(PopError::WouldBlock));
    assert!(stack.is_empty());

    // Round trip
    for x in [1, 2, 3] {
        stack.push(x);
    }
    assert!(stack.is_full());
    log::debug!("{stack:?}");
    for x in [3, 2, 1] {
        assert_eq!(stack.pop(Timeout::from_millis(100)), Ok(x));
    }

    // A failed pop leaves the stack as it is
    assert_eq!(stack.pop(Timeout::from_millis(0)), Err(PopError::WouldBlock));
    assert_eq!(stack.len(), 0);
    stack.push(4);
    assert_eq!(stack.len(), 1);

    // Rebinding a buffer empties the stack
    stack.init(vec![0; 8].leak());
    assert!(stack.is_empty());
    assert_eq!(stack.capacity(), 8);
}
