use crate::{error::BadContextError, klock::CpuLockGuard, KernelTraits};

/// If the current context is not waitable, return `Err(BadContext)`.
///
/// `lock` is the guard the caller is holding; a nested guard means the caller
/// entered CPU Lock by itself before calling the kernel, and suspending then
/// would leave interrupts disabled across the context switch.
pub(crate) fn expect_waitable_context<Traits: KernelTraits>(
    lock: &CpuLockGuard<Traits>,
) -> Result<(), BadContextError> {
    if Traits::is_interrupt_context() || lock.is_nested() || Traits::current_task().is_none() {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}

/// Determine whether a kernel operation that has just made a task Ready may
/// switch to it before returning.
///
/// An interrupt handler must never switch away, and neither may a caller that
/// holds CPU Lock on its own (the switch happens when the scheduler next runs).
pub(crate) fn may_switch_now<Traits: KernelTraits>(lock: &CpuLockGuard<Traits>) -> bool {
    !Traits::is_interrupt_context() && !lock.is_nested()
}
