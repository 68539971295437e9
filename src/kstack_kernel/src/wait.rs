//! Blocking and waking tasks
use core::fmt;

use crate::{
    error::WaitTimeoutError,
    klock::{self, CpuLockCell, CpuLockGuard, CpuLockTokenRefMut},
    KernelTraits, PortCpuLock, Timeout, Word,
};

/// The result delivered to a task that was blocked in a wait queue.
pub type WaitResult = Result<Word, WaitTimeoutError>;

/// The per-task mailbox through which a waking operation delivers the
/// outcome of a wait to the woken task.
///
/// A port embeds one of these in each of its task records and returns it from
/// [`PortThreading::task_wait`]. The waker fills the mailbox *before* making
/// the task Ready; the woken task takes the result out after it resumes. A
/// mailbox is never shared between tasks.
///
/// [`PortThreading::task_wait`]: crate::PortThreading::task_wait
pub struct TaskWait<Traits> {
    result: CpuLockCell<Traits, Option<WaitResult>>,
}

// Safety: The contents are only accessed with CPU Lock active
unsafe impl<Traits> Sync for TaskWait<Traits> {}
unsafe impl<Traits> Send for TaskWait<Traits> {}

impl<Traits> TaskWait<Traits> {
    /// Construct an empty mailbox.
    pub const fn new() -> Self {
        Self {
            result: CpuLockCell::new(None),
        }
    }
}

impl<Traits> Default for TaskWait<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: PortCpuLock> TaskWait<Traits> {
    /// Deliver the outcome of the current wait. This is used by a port that
    /// ends a wait by itself, e.g., on timeout or cancellation. The port must
    /// remove the task from its wait queue first so that no other waker can
    /// complete the same wait, and then make the task Ready.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active, and the caller must be the port (not a kernel
    /// operation in progress).
    pub unsafe fn complete(&self, result: WaitResult) {
        debug_assert!(Traits::is_cpu_lock_active());

        // Safety: CPU Lock is active, and no kernel operation (the only owner
        //         of `CpuLockGuard`) is in progress, so this is the only
        //         instance of `CpuLockToken`
        let mut token = unsafe { klock::CpuLockToken::<Traits>::new_unchecked() };
        self.fill(token.borrow_mut(), result);
    }

    pub(crate) fn fill(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, result: WaitResult) {
        let old = self.result.replace(&mut *lock, Some(result));
        debug_assert!(old.is_none(), "wait result delivered twice");
    }

    pub(crate) fn take(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) -> Option<WaitResult> {
        self.result.replace(&mut *lock, None)
    }
}

impl<Traits: PortCpuLock> fmt::Debug for TaskWait<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskWait")
            .field("result", &self.result)
            .finish()
    }
}

/// Insert the current task into `wait_queue` and suspend it until it's woken
/// up by [`wake_up_with`], a timeout, or a cancellation. Returns the
/// delivered result.
///
/// The current context must be [waitable] (This function doesn't check
/// that). The caller should use `expect_waitable_context` to do that.
///
/// [waitable]: crate#contexts
pub(crate) fn wait_timeout<Traits: KernelTraits>(
    mut lock: CpuLockGuard<Traits>,
    wait_queue: &'static Traits::WaitQueue,
    timeout: Timeout,
) -> WaitResult {
    debug_assert!(!timeout.is_no_wait());
    debug_assert!(!lock.is_nested());

    let Some(task) = Traits::current_task() else {
        unreachable!("waiting outside a task context")
    };
    let task_wait = Traits::task_wait(task);

    // Discard a stale result, if any
    task_wait.take(lock.borrow_mut());

    // Safety: CPU Lock active, task context
    unsafe { Traits::pend_current_task(wait_queue, timeout) };

    // Suspend the current task. CPU Lock is released by the port as part of
    // the context switch.
    let key = lock.into_key();
    // Safety: `key` is the key of the CPU Lock state we are in
    unsafe { Traits::swap(key) };

    // We are Running again. The waker has already filled the mailbox.
    let mut lock = klock::lock_cpu::<Traits>();
    match task_wait.take(lock.borrow_mut()) {
        Some(result) => result,
        None => unreachable!("task resumed without a wait result"),
    }
}

/// Wake up `task`, which has just been removed from a wait queue, delivering
/// `result`. Cancels the task's timeout, fills its mailbox, and then makes it
/// Ready. Doesn't yield the processor; the caller decides that.
pub(crate) fn wake_up_with<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task: Traits::TaskRef,
    result: WaitResult,
) {
    // Safety: CPU Lock active, `task` is not in a wait queue anymore
    unsafe { Traits::abort_task_timeout(task) };

    Traits::task_wait(task).fill(lock.borrow_mut(), result);

    // Safety: CPU Lock active, the task is Waiting and its result is ready
    unsafe { Traits::make_ready(task) };
}
