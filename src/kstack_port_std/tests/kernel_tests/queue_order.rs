//! Waiters are served in the order defined by the wait queue.
use kstack_kernel::{PortWaitQueue, Stack, Timeout, Word};
use kstack_port_std::{run_in_interrupt, spawn_task, PortInstance, QueueOrder, WaitQueue};

use crate::wait_until;

pub trait SupportedSystemTraits:
    PortInstance + PortWaitQueue<WaitQueue = WaitQueue<Self>>
{
}
impl<T: PortInstance + PortWaitQueue<WaitQueue = WaitQueue<T>>> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    // Arrival order: priorities 3, 1, 2, 1
    let priorities = [3, 1, 2, 1];

    // Task priority order, FIFO among equal priorities
    assert_eq!(
        received_values::<Traits>(QueueOrder::TaskPriority, &priorities),
        [103, 100, 102, 101]
    );

    // Arrival order
    assert_eq!(
        received_values::<Traits>(QueueOrder::Fifo, &priorities),
        [100, 101, 102, 103]
    );
}

/// Block a task with each of `priorities` in turn on a new stack, push
/// `100, 101, ...` from an interrupt handler, and return the values the tasks
/// received, in arrival order.
fn received_values<Traits: SupportedSystemTraits>(
    order: QueueOrder,
    priorities: &[usize],
) -> Vec<Word> {
    let stack: &'static Stack<Traits> =
        Box::leak(Box::new(Stack::with_wait_queue(WaitQueue::new(order))));
    run_in_interrupt::<Traits, _>(move || stack.init(vec![0; 1].leak()));

    let consumers: Vec<_> = priorities
        .iter()
        .map(|&priority| {
            let consumer = spawn_task::<Traits, _>(priority, move || stack.pop(Timeout::Forever));
            wait_until(|| consumer.is_waiting());
            consumer
        })
        .collect();

    let num_consumers = consumers.len() as Word;
    run_in_interrupt::<Traits, _>(move || {
        for x in 100..100 + num_consumers {
            stack.push(x);
        }
    });

    consumers.into_iter().map(|c| c.join().unwrap()).collect()
}
