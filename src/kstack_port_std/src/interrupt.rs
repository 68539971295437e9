//! The interrupt thread
use spin::Mutex as SpinMutex;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::mpsc,
    thread,
};

use crate::{PortInstance, ThreadRole, THREAD_ROLE};

type Handler = Box<dyn FnOnce() + Send>;

/// Runs interrupt handlers one at a time on a dedicated thread.
pub(crate) struct InterruptThread {
    handler_send: SpinMutex<Option<mpsc::Sender<Handler>>>,
}

impl InterruptThread {
    pub(crate) const fn new() -> Self {
        Self {
            handler_send: SpinMutex::new(None),
        }
    }

    fn pend(&self, handler: Handler) {
        let mut handler_send = self.handler_send.lock();
        let handler_send = handler_send.get_or_insert_with(start_interrupt_thread);
        handler_send.send(handler).unwrap();
    }
}

fn start_interrupt_thread() -> mpsc::Sender<Handler> {
    let (handler_send, handler_recv) = mpsc::channel::<Handler>();
    log::debug!("starting the interrupt thread");
    thread::Builder::new()
        .name("interrupt".to_owned())
        .spawn(move || {
            THREAD_ROLE.with(|role| role.set(ThreadRole::Interrupt));
            for handler in handler_recv {
                log::debug!("dispatching an interrupt handler");
                if panic::catch_unwind(AssertUnwindSafe(handler)).is_err() {
                    log::error!("an interrupt handler panicked");
                }
            }
        })
        .expect("failed to spawn the interrupt thread");
    handler_send
}

/// Pend an interrupt, causing `handler` to be called in an interrupt context.
///
/// Handlers run one at a time in the order they were pended. This can be
/// called from any thread, including the ones not managed by the port.
pub fn pend_interrupt<Traits: PortInstance>(handler: impl FnOnce() + Send + 'static) {
    log::trace!("pend_interrupt");
    Traits::port_state().interrupt.pend(Box::new(handler));
}

/// Call `handler` in an interrupt context and wait for it to complete,
/// returning its result. If `handler` panics, the panic is propagated to the
/// caller.
///
/// # Panics
///
/// Panics if called from an interrupt handler, which would never complete.
/// Calling this in CPU Lock deadlocks if `handler` enters CPU Lock.
pub fn run_in_interrupt<Traits: PortInstance, R: Send + 'static>(
    handler: impl FnOnce() -> R + Send + 'static,
) -> R {
    assert_ne!(
        THREAD_ROLE.with(|role| role.get()),
        ThreadRole::Interrupt,
        "`run_in_interrupt` was called from an interrupt context"
    );

    let (result_send, result_recv) = mpsc::channel();
    pend_interrupt::<Traits>(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(handler));
        // The receiver outlives the handler
        let _ = result_send.send(result);
    });

    match result_recv.recv() {
        Ok(Ok(x)) => x,
        Ok(Err(e)) => panic::resume_unwind(e),
        Err(mpsc::RecvError) => unreachable!("the interrupt thread is gone"),
    }
}
