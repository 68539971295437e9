//! Wait queues
use spin::Mutex as SpinMutex;
use std::{collections::VecDeque, fmt};

use crate::TaskCb;

/// Specifies the order in which a [`WaitQueue`] releases waiting tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueOrder {
    /// Higher-priority tasks first. Tasks with the same priority are released
    /// in the order they started waiting.
    #[default]
    TaskPriority,
    /// The order in which tasks started waiting.
    Fifo,
}

/// A queue of tasks blocked on a kernel object.
pub struct WaitQueue<Traits> {
    order: QueueOrder,
    waiters: SpinMutex<VecDeque<&'static TaskCb<Traits>>>,
}

impl<Traits> WaitQueue<Traits> {
    /// Construct an empty `WaitQueue`.
    pub const fn new(order: QueueOrder) -> Self {
        Self {
            order,
            waiters: SpinMutex::new(VecDeque::new()),
        }
    }

    /// Get the queue's ordering policy.
    pub fn order(&self) -> QueueOrder {
        self.order
    }

    /// Get the number of tasks in the queue.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Get a flag indicating whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub(crate) fn push(&self, task: &'static TaskCb<Traits>) {
        let mut waiters = self.waiters.lock();
        let i = match self.order {
            QueueOrder::Fifo => waiters.len(),
            QueueOrder::TaskPriority => waiters
                .iter()
                .position(|t| t.priority() > task.priority())
                .unwrap_or(waiters.len()),
        };
        waiters.insert(i, task);
    }

    pub(crate) fn pop_front(&self) -> Option<&'static TaskCb<Traits>> {
        self.waiters.lock().pop_front()
    }

    /// Remove `task` from the queue. Returns `false` if it wasn't there.
    pub(crate) fn remove(&self, task: &TaskCb<Traits>) -> bool {
        let mut waiters = self.waiters.lock();
        if let Some(i) = waiters.iter().position(|t| std::ptr::eq(*t, task)) {
            waiters.remove(i);
            true
        } else {
            false
        }
    }
}

impl<Traits> fmt::Debug for WaitQueue<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("order", &self.order)
            .field("waiters", &*self.waiters.lock())
            .finish()
    }
}
