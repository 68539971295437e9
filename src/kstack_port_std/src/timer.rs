//! The timer thread, which ends the waits whose timeouts have elapsed
use kstack_kernel::{KernelTraits, WaitTimeoutError};
use spin::Mutex as SpinMutex;
use std::{
    cmp::{Ordering, Reverse},
    collections::{binary_heap::PeekMut, BinaryHeap},
    sync::mpsc,
    thread,
    time::Instant,
};

use crate::{PortInstance, State, TaskCb, ThreadRole, THREAD_ROLE};

pub(crate) struct Timer<Traits: KernelTraits> {
    cmd_send: SpinMutex<Option<mpsc::Sender<TimerCmd<Traits>>>>,
}

/// A request to end the wait of `task` at `at`, unless the timeout's
/// generation has changed by then.
struct TimerCmd<Traits: 'static> {
    at: Instant,
    generation: u64,
    task: &'static TaskCb<Traits>,
}

impl<Traits> PartialEq for TimerCmd<Traits> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<Traits> Eq for TimerCmd<Traits> {}

impl<Traits> PartialOrd for TimerCmd<Traits> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Traits> Ord for TimerCmd<Traits> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.generation, self.task.id()).cmp(&(
            other.at,
            other.generation,
            other.task.id(),
        ))
    }
}

impl<Traits: PortInstance> Timer<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            cmd_send: SpinMutex::new(None),
        }
    }

    /// Schedule the timeout of `task` at `at`. The timer thread is started on
    /// first use.
    pub(crate) fn arm(&self, at: Instant, task: &'static TaskCb<Traits>, generation: u64) {
        log::trace!("arming a timeout for {task:?} (generation {generation})");
        let mut cmd_send = self.cmd_send.lock();
        let cmd_send = cmd_send.get_or_insert_with(start_timer_thread::<Traits>);
        cmd_send
            .send(TimerCmd {
                at,
                generation,
                task,
            })
            .unwrap();
    }
}

fn start_timer_thread<Traits: PortInstance>() -> mpsc::Sender<TimerCmd<Traits>> {
    let (cmd_send, cmd_recv) = mpsc::channel();
    log::debug!("starting the timer thread");
    thread::Builder::new()
        .name("timer".to_owned())
        .spawn(move || {
            THREAD_ROLE.with(|role| role.set(ThreadRole::Interrupt));
            timer_loop::<Traits>(cmd_recv);
        })
        .expect("failed to spawn the timer thread");
    cmd_send
}

fn timer_loop<Traits: PortInstance>(cmd_recv: mpsc::Receiver<TimerCmd<Traits>>) {
    let mut pending: BinaryHeap<Reverse<TimerCmd<Traits>>> = BinaryHeap::new();
    loop {
        let recv_result = if let Some(Reverse(next)) = pending.peek() {
            cmd_recv.recv_timeout(next.at.saturating_duration_since(Instant::now()))
        } else {
            cmd_recv
                .recv()
                .map_err(|_| mpsc::RecvTimeoutError::Disconnected)
        };
        match recv_result {
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(cmd) => pending.push(Reverse(cmd)),
        }

        let now = Instant::now();
        while let Some(next) = pending.peek_mut() {
            if next.0.at > now {
                break;
            }
            let Reverse(cmd) = PeekMut::pop(next);
            Traits::port_state().expire_timeout(cmd.task, cmd.generation);
        }
    }
    log::debug!("the timer thread is exiting");
}

impl<Traits: PortInstance> State<Traits> {
    /// Called by the timer thread when the timeout of `task` with
    /// `generation` has elapsed.
    fn expire_timeout(&self, task: &'static TaskCb<Traits>, generation: u64) {
        // Safety: The key is returned at the end of this function
        let key = unsafe { self.enter_cpu_lock() };

        // A stale generation means the wait has already ended
        if task.timeout_generation() == generation && task.is_waiting() {
            log::trace!("{task:?} timed out");
            // Safety: CPU Lock active, not inside a kernel operation, and the
            //         task is Waiting
            unsafe { self.end_wait(task, WaitTimeoutError::Timeout) };
        }

        // Safety: `key` is the most recent key
        unsafe { self.leave_cpu_lock(key) };
    }
}
