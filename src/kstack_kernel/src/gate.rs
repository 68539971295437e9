//! The call gate: entry points taking unvalidated arguments from less
//! privileged code.
//!
//! Every argument is checked before the corresponding [`Stack`] operation is
//! called, so none of the operation's preconditions can be violated through
//! the gate. In particular, [`stack_push`] reports a full stack as
//! [`StackPushError::QueueOverflow`] instead of panicking.
use core::mem;

use crate::{
    error::{NoAccessError, StackInitError, StackPopError, StackPushError},
    KernelTraits, Stack, Timeout, Word,
};

/// Object lookup and memory validation for the call gate.
///
/// # Safety
///
/// [`Self::is_user_writable`] must return `true` only for a memory region
/// that is valid for reads and writes, and that stays so (and isn't accessed
/// by anything but the kernel) as long as a stack uses it.
pub unsafe trait PortObjects: KernelTraits {
    /// An opaque reference to a kernel object, as passed by the caller.
    type ObjectHandle: Copy;

    /// Resolve `handle` to a stack. Returns `None` if `handle` doesn't refer
    /// to a live stack the caller may access.
    fn stack_from_handle(handle: Self::ObjectHandle) -> Option<&'static Stack<Self>>;

    /// Get a flag indicating whether the caller may write the `len` bytes
    /// starting at `addr`.
    fn is_user_writable(addr: usize, len: usize) -> bool;
}

/// Check that `[addr, addr + num_words * 4)` is a word-aligned region the
/// caller may write.
fn expect_user_words<Traits: PortObjects>(
    addr: usize,
    num_words: usize,
) -> Result<*mut Word, NoAccessError> {
    let len = num_words
        .checked_mul(mem::size_of::<Word>())
        .ok_or(NoAccessError::NoAccess)?;

    if addr == 0
        || addr % mem::align_of::<Word>() != 0
        || addr.checked_add(len).is_none()
        || !Traits::is_user_writable(addr, len)
    {
        return Err(NoAccessError::NoAccess);
    }

    Ok(addr as *mut Word)
}

/// Validate the arguments and call [`Stack::init_raw`].
///
/// `num_entries` is checked first, then the handle, then the buffer region.
pub fn stack_init<Traits: PortObjects>(
    handle: Traits::ObjectHandle,
    buffer_addr: usize,
    num_entries: i32,
) -> Result<(), StackInitError> {
    if num_entries <= 0 {
        return Err(StackInitError::BadParam);
    }
    // `num_entries > 0`, so the cast is lossless
    let num_entries = num_entries as usize;

    let stack = Traits::stack_from_handle(handle).ok_or(NoAccessError::NoAccess)?;
    let buffer = expect_user_words::<Traits>(buffer_addr, num_entries)?;

    // Safety: The region was validated by `expect_user_words`
    unsafe { stack.init_raw(buffer, num_entries) };
    Ok(())
}

/// Validate the arguments and push `data` onto the stack.
pub fn stack_push<Traits: PortObjects>(
    handle: Traits::ObjectHandle,
    data: Word,
) -> Result<(), StackPushError> {
    let stack = Traits::stack_from_handle(handle).ok_or(NoAccessError::NoAccess)?;
    stack.try_push(data)?;
    Ok(())
}

/// Validate the arguments, pop a value from the stack, and store it at
/// `out_addr`. Nothing is written to `out_addr` on failure.
///
/// `timeout_ms` is decoded by [`Timeout::from_raw_millis`].
pub fn stack_pop<Traits: PortObjects>(
    handle: Traits::ObjectHandle,
    out_addr: usize,
    timeout_ms: i32,
) -> Result<(), StackPopError> {
    let stack = Traits::stack_from_handle(handle).ok_or(NoAccessError::NoAccess)?;
    let out = expect_user_words::<Traits>(out_addr, 1)?;
    let timeout = Timeout::from_raw_millis(timeout_ms)?;

    let value = stack.pop(timeout)?;

    // Safety: `out` was validated by `expect_user_words`
    unsafe { out.write(value) };
    Ok(())
}
