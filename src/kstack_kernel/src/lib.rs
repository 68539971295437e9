//! A fixed-capacity LIFO stack of machine words for real-time kernels, safe to
//! use between tasks and between interrupt handlers and tasks.
//!
//! [`Stack`] is a kernel object: it lives in a `static`, borrows a
//! caller-supplied buffer, and is generic over a *port*. A port implements
//! [`PortCpuLock`], [`PortThreading`], and [`PortWaitQueue`] to supply the
//! interrupt lock, the scheduler, and the wait queues (including their
//! ordering policy and timeouts). This crate doesn't implement any of them.
//! `kstack_port_std` provides a port for hosted environments.
//!
//! # Contexts
//!
//! Code runs either in a *task context* or in an *interrupt context*. A
//! context is *waitable* if it's a task context and the task isn't holding
//! CPU Lock by itself. [`Stack::push`] can be called from any context.
//! [`Stack::pop`] can be called from any context as long as it doesn't have
//! to wait; a pop that has to wait fails with [`PopError::BadContext`] in a
//! non-waitable context.
//!
//! # CPU Lock
//!
//! Every operation runs inside a critical section established by
//! [`PortCpuLock::enter_cpu_lock`] (typically by disabling interrupts). The
//! critical section may already be active when a kernel operation is called;
//! the restore key tells the kernel so, and the kernel then refrains from
//! switching tasks before the caller leaves its own critical section.
//!
//! # Direct handoff
//!
//! When [`Stack::push`] finds a task blocked in [`Stack::pop`], the value is
//! delivered straight into the task's [`TaskWait`] mailbox and the task is
//! made Ready. The value never touches the buffer.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use core::fmt;

mod error;
pub mod gate;
mod klock;
mod stack;
mod state;
mod timeout;
mod wait;

pub use self::{error::*, stack::*, timeout::*, wait::*};

/// The unit of data moved by [`Stack`].
pub type Word = u32;

/// The critical-section primitive.
///
/// # Safety
///
/// While CPU Lock is active, no other context may run code that calls into
/// the kernel. The kernel relies on this for memory safety.
pub unsafe trait PortCpuLock: Sized + 'static {
    /// An opaque token describing the CPU Lock state before
    /// [`Self::enter_cpu_lock`] was called.
    type CpuLockKey: Copy + fmt::Debug;

    /// Enter a CPU Lock state, returning the key to restore the previous
    /// state. CPU Lock may already be active, in which case this only
    /// produces a nested key.
    ///
    /// # Safety
    ///
    /// The returned key must be passed to [`Self::leave_cpu_lock`] or
    /// [`PortThreading::swap`] exactly once, in the reverse order of entry.
    unsafe fn enter_cpu_lock() -> Self::CpuLockKey;

    /// Restore the CPU Lock state described by `key`.
    ///
    /// # Safety
    ///
    /// `key` must be the most recent key returned by [`Self::enter_cpu_lock`]
    /// in the current context that hasn't been consumed yet.
    unsafe fn leave_cpu_lock(key: Self::CpuLockKey);

    /// Get a flag indicating whether CPU Lock was already active when `key`
    /// was produced.
    fn is_nested_key(key: Self::CpuLockKey) -> bool;

    /// Get a flag indicating whether CPU Lock is currently active in the
    /// current context.
    fn is_cpu_lock_active() -> bool;
}

/// The scheduler.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// suspending and resuming tasks. The methods must behave as documented.
pub unsafe trait PortThreading: PortCpuLock {
    /// A reference to a task record.
    type TaskRef: Copy + 'static;

    /// Get a flag indicating whether the current context is an interrupt
    /// context.
    fn is_interrupt_context() -> bool;

    /// Get the currently running task. Returns `None` in an interrupt context
    /// or outside any task.
    fn current_task() -> Option<Self::TaskRef>;

    /// Get the wait mailbox of `task`.
    fn task_wait(task: Self::TaskRef) -> &'static TaskWait<Self>;

    /// Transition `task` from the Waiting state to the Ready state.
    ///
    /// # Safety
    ///
    /// CPU Lock active. `task` has been removed from the wait queue it was
    /// pending on.
    unsafe fn make_ready(task: Self::TaskRef);

    /// Get a flag indicating whether a Ready task has a higher priority than
    /// the current task.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn must_switch_tasks() -> bool;

    /// Yield the processor to the highest-priority Ready task, releasing CPU
    /// Lock as part of the switch. If the current task is Waiting, this
    /// doesn't return until it's made Ready by [`Self::make_ready`].
    ///
    /// On return, the CPU Lock state is restored to the one described by
    /// `key`.
    ///
    /// # Safety
    ///
    /// CPU Lock active, entered with `key`. Task context.
    unsafe fn swap(key: Self::CpuLockKey);
}

/// The wait-queue collaborator. The ordering of a wait queue is entirely up
/// to the port.
///
/// # Safety
///
/// See [`PortThreading`].
pub unsafe trait PortWaitQueue: PortThreading {
    /// The storage for a wait queue, embedded in each kernel object that tasks
    /// can wait on.
    type WaitQueue: fmt::Debug + Send + Sync + 'static;

    /// The initial value of [`Self::WaitQueue`] used by [`Stack::new`].
    const WAIT_QUEUE_INIT: Self::WaitQueue;

    /// Insert the current task into `wait_queue` and transition it into the
    /// Waiting state. If `timeout` is bounded, arm a timer that, on expiry,
    /// removes the task from `wait_queue`, completes its [`TaskWait`] with
    /// [`WaitTimeoutError::Timeout`], and makes it Ready.
    ///
    /// This doesn't suspend the task; the kernel calls
    /// [`PortThreading::swap`] afterwards.
    ///
    /// # Safety
    ///
    /// CPU Lock active. Waitable context. `timeout` is not
    /// [`Timeout::NoWait`].
    unsafe fn pend_current_task(wait_queue: &'static Self::WaitQueue, timeout: Timeout);

    /// Remove the first task from `wait_queue` and return it.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn unpend_first_task(wait_queue: &'static Self::WaitQueue) -> Option<Self::TaskRef>;

    /// Disarm the timeout of `task`, if any.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn abort_task_timeout(task: Self::TaskRef);

    /// Get a flag indicating whether `wait_queue` is empty.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn is_wait_queue_empty(wait_queue: &Self::WaitQueue) -> bool;
}

/// Everything the kernel needs from a port.
pub trait KernelTraits: PortWaitQueue {}

impl<T: PortWaitQueue> KernelTraits for T {}
