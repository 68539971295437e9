//! Simulation environment for running `kstack_kernel` on a hosted
//! environment.
//!
//! Every context is backed by an OS thread: each task gets its own thread,
//! interrupt handlers run on a dedicated interrupt thread, and timeouts are
//! driven by a timer thread, which is treated as an interrupt context as well.
//! CPU Lock is a system-wide lock, so it serializes all kernel operations even
//! though the threads themselves run in parallel.
//!
//! Kernel operations may only be called from the threads managed by the port.
//! Use [`spawn_task`] or [`run_in_interrupt`] to get into one.
//!
//! ```rust,ignore
//! kstack_port_std::use_port!(unsafe struct SystemTraits);
//!
//! static STACK: Stack<SystemTraits> = Stack::new();
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use kstack_kernel::{gate::PortObjects, KernelTraits, Timeout};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    mem,
    sync::atomic::{AtomicUsize, Ordering},
    thread::LocalKey,
    time::Instant,
};

mod interrupt;
mod objects;
mod task;
mod timer;
mod wait_queue;

pub use self::{
    interrupt::{pend_interrupt, run_in_interrupt},
    objects::{for_each_stack, grant_user_memory, register_stack, unregister_stack, StackHandle},
    task::{interrupt_task, spawn_task, TaskCb, TaskHandle},
    wait_queue::{QueueOrder, WaitQueue},
};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate kstack_kernel;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: KernelTraits + PortObjects {
    fn port_state() -> &'static State<Self>;

    /// The per-thread state of the system.
    fn thread_state() -> &'static LocalKey<ThreadState<Self>>;
}

/// The restore key of the port's CPU Lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLockKey {
    nested: bool,
}

impl CpuLockKey {
    /// Get a flag indicating whether CPU Lock was already active when this key
    /// was produced.
    #[inline]
    pub fn is_nested(self) -> bool {
        self.nested
    }
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State<Traits: KernelTraits> {
    /// Held by the context in CPU Lock. Entering and leaving CPU Lock don't
    /// happen in the same scope, so the guard is never kept.
    cpu_lock: SpinMutex<()>,
    tasks: SpinMutex<Vec<&'static TaskCb<Traits>>>,
    preemption_count: AtomicUsize,
    timer: timer::Timer<Traits>,
    interrupt: interrupt::InterruptThread,
    objects: objects::ObjectTable<Traits>,
}

/// The per-thread state of the port, stored in a thread-local variable
/// defined by [`use_port!`].
#[doc(hidden)]
pub struct ThreadState<Traits> {
    /// The task backed by the current thread.
    task: Cell<Option<&'static TaskCb<Traits>>>,
    /// Whether the current thread is in CPU Lock.
    cpu_lock: Cell<bool>,
}

impl<Traits> ThreadState<Traits> {
    pub const fn new() -> Self {
        Self {
            task: Cell::new(None),
            cpu_lock: Cell::new(false),
        }
    }
}

impl<Traits> Default for ThreadState<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread for an interrupt context (including the timer).
    Interrupt,
    /// The backing thread for a task.
    Task,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

#[allow(clippy::missing_safety_doc)]
impl<Traits: PortInstance> State<Traits> {
    pub const fn new() -> Self {
        Self {
            cpu_lock: SpinMutex::new(()),
            tasks: SpinMutex::new(Vec::new()),
            preemption_count: AtomicUsize::new(0),
            timer: timer::Timer::new(),
            interrupt: interrupt::InterruptThread::new(),
            objects: objects::ObjectTable::new(),
        }
    }

    pub unsafe fn enter_cpu_lock(&self) -> CpuLockKey {
        log::trace!("enter_cpu_lock");
        expect_worker_thread();

        Traits::thread_state().with(|ts| {
            if ts.cpu_lock.get() {
                return CpuLockKey { nested: true };
            }
            mem::forget(self.cpu_lock.lock());
            ts.cpu_lock.set(true);
            CpuLockKey { nested: false }
        })
    }

    pub unsafe fn leave_cpu_lock(&self, key: CpuLockKey) {
        log::trace!("leave_cpu_lock({key:?})");
        expect_worker_thread();

        Traits::thread_state().with(|ts| {
            assert!(ts.cpu_lock.get(), "CPU Lock is not active");
            if !key.nested {
                ts.cpu_lock.set(false);
                // Safety: The lock was acquired and forgotten by
                //         `enter_cpu_lock` on this thread
                unsafe { self.cpu_lock.force_unlock() };
            }
        })
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        expect_worker_thread();
        Traits::thread_state().with(|ts| ts.cpu_lock.get())
    }

    pub fn is_interrupt_context(&self) -> bool {
        expect_worker_thread();

        THREAD_ROLE.with(|role| match role.get() {
            ThreadRole::Task => false,
            ThreadRole::Interrupt => true,
            ThreadRole::Unknown => unreachable!(),
        })
    }

    pub fn current_task(&self) -> Option<&'static TaskCb<Traits>> {
        expect_worker_thread();
        Traits::thread_state().with(|ts| ts.task.get())
    }

    pub unsafe fn make_ready(&self, task: &'static TaskCb<Traits>) {
        log::trace!("make_ready({task:?})");
        debug_assert!(self.is_cpu_lock_active());
        task.wake();
    }

    pub unsafe fn must_switch_tasks(&self) -> bool {
        let Some(current) = self.current_task() else {
            return false;
        };
        self.tasks
            .lock()
            .iter()
            .any(|task| task.is_ready() && task.priority() < current.priority())
    }

    pub unsafe fn swap(&self, key: CpuLockKey) {
        let Some(current) = self.current_task() else {
            panic!("`swap` was called outside a task");
        };
        assert!(!key.nested, "`swap` was called in a nested CPU Lock state");

        if current.is_waiting() {
            log::trace!("swap: {current:?} is blocking");
            // Safety: `key` is the key of the CPU Lock state we are in
            unsafe { self.leave_cpu_lock(key) };
            current.park_while_waiting();
            log::trace!("swap: {current:?} resumed");
        } else {
            // Let the higher-priority tasks that are now Ready run until they
            // block or exit
            let preempting: Vec<_> = (self.tasks.lock().iter())
                .filter(|task| task.is_ready() && task.priority() < current.priority())
                .copied()
                .collect();
            log::trace!("swap: {current:?} is preempted by {preempting:?}");
            self.preemption_count.fetch_add(1, Ordering::Relaxed);

            // Safety: `key` is the key of the CPU Lock state we are in
            unsafe { self.leave_cpu_lock(key) };
            for task in preempting {
                task.wait_until_descheduled();
            }
        }
    }

    pub unsafe fn pend_current_task(&'static self, wait_queue: &'static WaitQueue<Traits>, timeout: Timeout) {
        debug_assert!(self.is_cpu_lock_active());
        let Some(current) = self.current_task() else {
            panic!("`pend_current_task` was called outside a task");
        };
        log::trace!("pend_current_task({current:?}, {timeout:?})");

        current.start_waiting(wait_queue);
        let generation = current.next_timeout_generation();

        // An unrepresentable deadline is as good as none
        if let Some(at) = (timeout.duration()).and_then(|d| Instant::now().checked_add(d)) {
            self.timer.arm(at, current, generation);
        }
    }

    pub unsafe fn unpend_first_task(
        &self,
        wait_queue: &'static WaitQueue<Traits>,
    ) -> Option<&'static TaskCb<Traits>> {
        debug_assert!(self.is_cpu_lock_active());
        let task = wait_queue.pop_front()?;
        task.leave_wait_queue();
        Some(task)
    }

    pub unsafe fn abort_task_timeout(&self, task: &'static TaskCb<Traits>) {
        task.next_timeout_generation();
    }

    pub unsafe fn is_wait_queue_empty(&self, wait_queue: &WaitQueue<Traits>) -> bool {
        wait_queue.is_empty()
    }

    /// End the wait of `task` by the port's own decision, delivering `e`.
    ///
    /// # Safety
    ///
    /// CPU Lock active. Not inside a kernel operation. `task` is Waiting.
    unsafe fn end_wait(&self, task: &'static TaskCb<Traits>, e: kstack_kernel::WaitTimeoutError) {
        debug_assert!(task.is_waiting());
        if let Some(wait_queue) = task.leave_wait_queue() {
            wait_queue.remove(task);
        }
        task.next_timeout_generation();

        // Safety: CPU Lock active, and the task is no longer in a wait queue,
        //         so no other waker can complete the wait
        unsafe {
            task.wait().complete(Err(e));
            self.make_ready(task);
        }
    }

    fn register_task(&self, task: &'static TaskCb<Traits>) {
        self.tasks.lock().push(task);
    }

    /// Forget an exited task so that the scheduler stops scanning it.
    fn unregister_task(&self, task: &'static TaskCb<Traits>) {
        self.tasks.lock().retain(|t| !std::ptr::eq(*t, task));
    }
}

/// Assert that the current thread is a worker thread managed by the port.
fn expect_worker_thread() -> ThreadRole {
    let role = THREAD_ROLE.with(|r| r.get());
    assert_ne!(
        role,
        ThreadRole::Unknown,
        "kernel operations must be called from a task or an interrupt handler"
    );
    role
}

/// Get the number of times a task has yielded the processor to a
/// higher-priority task that it made Ready.
pub fn preemption_count<Traits: PortInstance>() -> usize {
    Traits::port_state().preemption_count.load(Ordering::Relaxed)
}

/// Get the number of spawned tasks that haven't exited yet.
pub fn task_count<Traits: PortInstance>() -> usize {
    Traits::port_state().tasks.lock().len()
}

/// Call `f` inside a critical section entered by the application, as if by
/// disabling interrupts.
pub fn with_cpu_lock<Traits: PortInstance, R>(f: impl FnOnce() -> R) -> R {
    let state = Traits::port_state();
    // Safety: The key is returned right after `f` completes
    let key = unsafe { state.enter_cpu_lock() };
    let result = f();
    // Safety: `key` is the most recent key
    unsafe { state.leave_cpu_lock(key) };
    result
}

#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::kstack_kernel::{
                gate::PortObjects, PortCpuLock, PortThreading, PortWaitQueue, Stack, TaskWait,
                Timeout,
            };
            use $crate::{
                CpuLockKey, PortInstance, QueueOrder, StackHandle, State, TaskCb, ThreadState,
                WaitQueue,
            };

            pub(super) static PORT_STATE: State<$SystemTraits> = State::new();

            ::std::thread_local! {
                static THREAD_STATE: ThreadState<$SystemTraits> = ThreadState::new();
            }

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State<Self> {
                    &PORT_STATE
                }

                #[inline]
                fn thread_state() -> &'static ::std::thread::LocalKey<ThreadState<Self>> {
                    &THREAD_STATE
                }
            }

            unsafe impl PortCpuLock for $SystemTraits {
                type CpuLockKey = CpuLockKey;

                unsafe fn enter_cpu_lock() -> CpuLockKey {
                    PORT_STATE.enter_cpu_lock()
                }

                unsafe fn leave_cpu_lock(key: CpuLockKey) {
                    PORT_STATE.leave_cpu_lock(key)
                }

                fn is_nested_key(key: CpuLockKey) -> bool {
                    key.is_nested()
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }
            }

            unsafe impl PortThreading for $SystemTraits {
                type TaskRef = &'static TaskCb<Self>;

                fn is_interrupt_context() -> bool {
                    PORT_STATE.is_interrupt_context()
                }

                fn current_task() -> Option<Self::TaskRef> {
                    PORT_STATE.current_task()
                }

                fn task_wait(task: Self::TaskRef) -> &'static TaskWait<Self> {
                    task.wait()
                }

                unsafe fn make_ready(task: Self::TaskRef) {
                    PORT_STATE.make_ready(task)
                }

                unsafe fn must_switch_tasks() -> bool {
                    PORT_STATE.must_switch_tasks()
                }

                unsafe fn swap(key: CpuLockKey) {
                    PORT_STATE.swap(key)
                }
            }

            unsafe impl PortWaitQueue for $SystemTraits {
                type WaitQueue = WaitQueue<Self>;

                #[allow(clippy::declare_interior_mutable_const)]
                const WAIT_QUEUE_INIT: Self::WaitQueue = WaitQueue::new(QueueOrder::TaskPriority);

                unsafe fn pend_current_task(wait_queue: &'static Self::WaitQueue, timeout: Timeout) {
                    PORT_STATE.pend_current_task(wait_queue, timeout)
                }

                unsafe fn unpend_first_task(
                    wait_queue: &'static Self::WaitQueue,
                ) -> Option<Self::TaskRef> {
                    PORT_STATE.unpend_first_task(wait_queue)
                }

                unsafe fn abort_task_timeout(task: Self::TaskRef) {
                    PORT_STATE.abort_task_timeout(task)
                }

                unsafe fn is_wait_queue_empty(wait_queue: &Self::WaitQueue) -> bool {
                    PORT_STATE.is_wait_queue_empty(wait_queue)
                }
            }

            unsafe impl PortObjects for $SystemTraits {
                type ObjectHandle = StackHandle;

                fn stack_from_handle(handle: StackHandle) -> Option<&'static Stack<Self>> {
                    PORT_STATE.stack_from_handle(handle)
                }

                fn is_user_writable(addr: usize, len: usize) -> bool {
                    PORT_STATE.is_user_writable(addr, len)
                }
            }
        }
    };
}
