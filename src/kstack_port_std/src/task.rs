//! Tasks
use kstack_kernel::{InterruptTaskError, TaskWait, WaitTimeoutError};
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use std::{
    fmt, panic,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    thread,
};

use crate::{CpuLockKey, PortInstance, State, ThreadRole, WaitQueue, THREAD_ROLE};

/// Task state machine
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Tsm {
    /// The task's thread is running (or about to).
    Running,
    /// The task is in a wait queue.
    Waiting,
    /// The task was woken up, but its thread hasn't resumed yet.
    Ready,
    /// The task's entry point has returned or panicked.
    Exited,
}

/// *Task control block* - the state data of a task.
pub struct TaskCb<Traits> {
    id: usize,

    /// The task's priority. A smaller value means a higher priority.
    priority: usize,

    /// This field is expected to be accessed with CPU Lock active, so
    /// `SpinMutex` is sufficient.
    tsm: SpinMutex<Tsm>,

    /// The backing thread, used to wake up the task. Set by the thread itself
    /// before the entry point is called.
    thread: OnceCell<thread::Thread>,

    /// The wait queue the task is in.
    wait_queue: SpinMutex<Option<&'static WaitQueue<Traits>>>,

    /// Incremented whenever an armed timeout becomes obsolete.
    timeout_generation: AtomicU64,

    wait: TaskWait<Traits>,
}

impl<Traits> TaskCb<Traits> {
    pub(crate) fn new(id: usize, priority: usize) -> Self {
        Self {
            id,
            priority,
            tsm: SpinMutex::new(Tsm::Running),
            thread: OnceCell::new(),
            wait_queue: SpinMutex::new(None),
            timeout_generation: AtomicU64::new(0),
            wait: TaskWait::new(),
        }
    }

    /// Get the task's unique identifier.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the task's priority. A smaller value means a higher priority.
    #[inline]
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Get the task's wait mailbox. Used by `use_port!`.
    #[doc(hidden)]
    #[inline]
    pub fn wait(&self) -> &TaskWait<Traits> {
        &self.wait
    }

    /// Get a flag indicating whether the task is blocked in a wait queue.
    pub fn is_waiting(&self) -> bool {
        *self.tsm.lock() == Tsm::Waiting
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.tsm.lock() == Tsm::Ready
    }

    /// Transition the (current) task into the Waiting state and insert it
    /// into `wait_queue`.
    pub(crate) fn start_waiting(&'static self, wait_queue: &'static WaitQueue<Traits>) {
        let mut tsm = self.tsm.lock();
        assert_eq!(*tsm, Tsm::Running);
        *tsm = Tsm::Waiting;
        drop(tsm);

        wait_queue.push(self);
        *self.wait_queue.lock() = Some(wait_queue);
    }

    /// Forget the wait queue the task is in, returning it. The task must be
    /// removed from the wait queue separately.
    pub(crate) fn leave_wait_queue(&self) -> Option<&'static WaitQueue<Traits>> {
        self.wait_queue.lock().take()
    }

    /// Invalidate the current timeout, if any, returning the new generation.
    pub(crate) fn next_timeout_generation(&self) -> u64 {
        self.timeout_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn timeout_generation(&self) -> u64 {
        self.timeout_generation.load(Ordering::Relaxed)
    }

    /// Transition the task from the Waiting state to the Ready state and
    /// unpark its thread.
    pub(crate) fn wake(&self) {
        let mut tsm = self.tsm.lock();
        assert_eq!(*tsm, Tsm::Waiting, "waking up a task that is not waiting");
        *tsm = Tsm::Ready;
        drop(tsm);

        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// Block the current thread while the task is Waiting. Must be called by
    /// the task's own thread.
    pub(crate) fn park_while_waiting(&self) {
        loop {
            let mut tsm = self.tsm.lock();
            match *tsm {
                Tsm::Waiting => {}
                Tsm::Ready => {
                    *tsm = Tsm::Running;
                    return;
                }
                Tsm::Running | Tsm::Exited => unreachable!(),
            }
            drop(tsm);
            thread::park();
        }
    }

    /// Block the current thread until the task's thread blocks or exits.
    pub(crate) fn wait_until_descheduled(&self) {
        while matches!(*self.tsm.lock(), Tsm::Ready | Tsm::Running) {
            thread::yield_now();
        }
    }
}

impl<Traits> fmt::Debug for TaskCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Marks the task as exited when the task's thread finishes, whether it
/// returns or unwinds.
struct ExitGuard<Traits: PortInstance>(&'static TaskCb<Traits>);

impl<Traits: PortInstance> Drop for ExitGuard<Traits> {
    fn drop(&mut self) {
        let task = self.0;

        // Don't leave the system locked up if the task panicked in CPU Lock
        if Traits::thread_state().with(|ts| ts.cpu_lock.get()) {
            log::warn!("{task:?} exited in CPU Lock");
            // Safety: The outermost key of this thread
            unsafe {
                Traits::port_state().leave_cpu_lock(CpuLockKey { nested: false });
            }
        }

        *task.tsm.lock() = Tsm::Exited;
        Traits::port_state().unregister_task(task);
        log::debug!("{task:?} exited");
    }
}

/// A handle to a task spawned by [`spawn_task`].
pub struct TaskHandle<Traits: 'static, R> {
    task: &'static TaskCb<Traits>,
    join_handle: thread::JoinHandle<R>,
}

impl<Traits: 'static, R> TaskHandle<Traits, R> {
    /// Get the task's control block.
    pub fn task(&self) -> &'static TaskCb<Traits> {
        self.task
    }

    /// Get a flag indicating whether the task is blocked in a wait queue.
    pub fn is_waiting(&self) -> bool {
        self.task.is_waiting()
    }

    /// Wait for the task to complete, returning the entry point's result. If
    /// the task panicked, the panic is propagated to the caller.
    pub fn join(self) -> R {
        match self.join_handle.join() {
            Ok(x) => x,
            Err(e) => panic::resume_unwind(e),
        }
    }
}

/// Create a task with the specified priority and start running `entry_point`
/// in it. A smaller `priority` value means a higher priority.
///
/// Tasks run in parallel, except that a task that yields to a higher-priority
/// task in a kernel operation doesn't resume until that task blocks in a wait
/// queue or exits.
pub fn spawn_task<Traits: PortInstance, R: Send + 'static>(
    priority: usize,
    entry_point: impl FnOnce() -> R + Send + 'static,
) -> TaskHandle<Traits, R> {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

    let task: &'static TaskCb<Traits> = Box::leak(Box::new(TaskCb::new(id, priority)));
    Traits::port_state().register_task(task);

    let join_handle = thread::Builder::new()
        .name(format!("task{id}"))
        .spawn(move || {
            THREAD_ROLE.with(|role| role.set(ThreadRole::Task));
            Traits::thread_state().with(|ts| ts.task.set(Some(task)));
            task.thread.set(thread::current()).ok().unwrap();

            let _guard = ExitGuard(task);
            log::debug!("{task:?} is now running");
            entry_point()
        })
        .expect("failed to spawn a task thread");

    log::trace!("spawned {join_handle:?} for the task {task:?}");

    TaskHandle { task, join_handle }
}

/// Cancel the ongoing wait of `task`, causing the blocking operation to fail
/// with `Interrupted`.
///
/// If `task` has a higher priority than the current task, the current task
/// yields to it (unless this is called from an interrupt handler or in CPU
/// Lock).
pub fn interrupt_task<Traits: PortInstance>(
    task: &'static TaskCb<Traits>,
) -> Result<(), InterruptTaskError> {
    log::trace!("interrupt_task({task:?})");
    let state = Traits::port_state();

    // Safety: The key is consumed by `unlock_cpu_and_check_preemption`
    let key = unsafe { state.enter_cpu_lock() };

    if !task.is_waiting() {
        // Safety: `key` is the most recent key
        unsafe { state.leave_cpu_lock(key) };
        return Err(InterruptTaskError::BadObjectState);
    }

    // Safety: CPU Lock active, not inside a kernel operation, and the task is
    //         Waiting
    unsafe {
        state.end_wait(task, WaitTimeoutError::Interrupted);
        state.unlock_cpu_and_check_preemption(key);
    }

    Ok(())
}

impl<Traits: PortInstance> State<Traits> {
    /// Leave CPU Lock, yielding the processor first if a higher-priority task
    /// is Ready and a task switch is allowed.
    ///
    /// # Safety
    ///
    /// CPU Lock active, entered with `key`.
    unsafe fn unlock_cpu_and_check_preemption(&self, key: CpuLockKey) {
        // Safety: CPU Lock active
        let switch = !key.is_nested()
            && !self.is_interrupt_context()
            && unsafe { self.must_switch_tasks() };

        // Safety: `key` is the key of the CPU Lock state we are in
        unsafe {
            if switch {
                self.swap(key);
            } else {
                self.leave_cpu_lock(key);
            }
        }
    }
}
