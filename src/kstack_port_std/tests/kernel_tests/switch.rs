//! A task yields after making a higher-priority waiter Ready, but only when a
//! task switch is allowed.
use kstack_kernel::Timeout;
use kstack_port_std::{
    preemption_count, run_in_interrupt, spawn_task, with_cpu_lock, PortInstance,
};
use std::sync::Mutex;

use crate::{new_stack, wait_until};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    static SEQ: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let stack = run_in_interrupt::<Traits, _>(|| new_stack::<Traits>(2));

    // Higher-priority waiter: the producer yields to it
    let consumer = spawn_task::<Traits, _>(1, move || {
        let x = stack.pop(Timeout::Forever);
        SEQ.lock().unwrap().push("consumer");
        x
    });
    wait_until(|| consumer.is_waiting());

    let count = preemption_count::<Traits>();
    spawn_task::<Traits, _>(2, move || {
        stack.push(1);
        SEQ.lock().unwrap().push("producer");
    })
    .join();
    assert_eq!(consumer.join(), Ok(1));
    assert_eq!(*SEQ.lock().unwrap(), ["consumer", "producer"]);
    assert_eq!(preemption_count::<Traits>(), count + 1);

    // Lower-priority waiter
    let consumer = spawn_task::<Traits, _>(3, move || stack.pop(Timeout::Forever));
    wait_until(|| consumer.is_waiting());

    let count = preemption_count::<Traits>();
    spawn_task::<Traits, _>(2, move || stack.push(2)).join();
    assert_eq!(consumer.join(), Ok(2));
    assert_eq!(preemption_count::<Traits>(), count);

    // Interrupt handlers never switch tasks
    let consumer = spawn_task::<Traits, _>(1, move || stack.pop(Timeout::Forever));
    wait_until(|| consumer.is_waiting());

    let count = preemption_count::<Traits>();
    run_in_interrupt::<Traits, _>(move || stack.push(3));
    assert_eq!(consumer.join(), Ok(3));
    assert_eq!(preemption_count::<Traits>(), count);

    // Nor does a task in CPU Lock
    let consumer = spawn_task::<Traits, _>(1, move || stack.pop(Timeout::Forever));
    wait_until(|| consumer.is_waiting());

    let count = preemption_count::<Traits>();
    spawn_task::<Traits, _>(2, move || {
        with_cpu_lock::<Traits, _>(|| stack.push(4));
    })
    .join();
    assert_eq!(consumer.join(), Ok(4));
    assert_eq!(preemption_count::<Traits>(), count);
}
