//! Stacks
use core::{fmt, mem, ptr};

use crate::{
    error::{PopError, QueueOverflowError},
    klock::{self, CpuLockCell, CpuLockGuard},
    state, wait, KernelTraits, Timeout, Word,
};


/// A fixed-capacity LIFO stack of [`Word`]s.
///
/// A `Stack` doesn't own its storage. The buffer is bound by [`Self::init`]
/// and borrowed for the rest of the program's lifetime (or until the next
/// `init`).
///
/// # Examples
///
/// ```rust,ignore
/// static STACK: Stack<SystemTraits> = Stack::new();
///
/// let buffer = Box::leak(Box::new([0; 8]));
/// STACK.init(buffer);
/// STACK.push(42);
/// assert_eq!(STACK.pop(Timeout::NoWait), Ok(42));
/// ```
pub struct Stack<Traits: KernelTraits> {
    buf: CpuLockCell<Traits, StackBuf>,

    wait_queue: Traits::WaitQueue,
}

// Safety: `buf` is only accessed with CPU Lock active, and `WaitQueue: Sync`
unsafe impl<Traits: KernelTraits> Sync for Stack<Traits> {}

/// The buffer pointers of a [`Stack`].
///
/// `base <= next <= top` whenever CPU Lock is inactive. All three are null
/// while the stack is unbound.
#[derive(Clone, Copy)]
struct StackBuf {
    base: *mut Word,
    next: *mut Word,
    top: *mut Word,
}

// Safety: `StackBuf` is just a set of pointers into a buffer that is never
//         accessed outside CPU Lock
unsafe impl Send for StackBuf {}

impl StackBuf {
    const UNBOUND: Self = Self {
        base: ptr::null_mut(),
        next: ptr::null_mut(),
        top: ptr::null_mut(),
    };

    #[inline]
    fn len(&self) -> usize {
        (self.next as usize - self.base as usize) / mem::size_of::<Word>()
    }

    #[inline]
    fn capacity(&self) -> usize {
        (self.top as usize - self.base as usize) / mem::size_of::<Word>()
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.next == self.top
    }
}

impl fmt::Debug for StackBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StackBuf")
            .field("base", &self.base)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<Traits: KernelTraits> Stack<Traits> {
    /// Construct an unbound `Stack` whose wait queue is
    /// [`PortWaitQueue::WAIT_QUEUE_INIT`].
    ///
    /// [`PortWaitQueue::WAIT_QUEUE_INIT`]: crate::PortWaitQueue::WAIT_QUEUE_INIT
    pub const fn new() -> Self {
        Self::with_wait_queue(Traits::WAIT_QUEUE_INIT)
    }

    /// Construct an unbound `Stack` with the specified wait queue. A port
    /// supporting more than one ordering policy lets the application choose
    /// one this way.
    pub const fn with_wait_queue(wait_queue: Traits::WaitQueue) -> Self {
        Self {
            buf: CpuLockCell::new(StackBuf::UNBOUND),
            wait_queue,
        }
    }

    /// Bind `buffer` to the stack, making it empty. The capacity is
    /// `buffer.len()`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is empty.
    pub fn init(&self, buffer: &'static mut [Word]) {
        let num_entries = buffer.len();
        // Safety: `buffer` is exclusively borrowed forever
        unsafe { self.init_raw(buffer.as_mut_ptr(), num_entries) };
    }

    /// Bind the buffer of `num_entries` words starting at `buffer` to the
    /// stack, making it empty.
    ///
    /// # Panics
    ///
    /// Panics if `num_entries` is zero.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads and writes of `num_entries` words and
    /// suitably aligned. Nothing else may access the buffer while it's bound
    /// to the stack. No task may be waiting on the stack.
    pub unsafe fn init_raw(&self, buffer: *mut Word, num_entries: usize) {
        assert!(num_entries > 0, "stack capacity must be positive");

        let mut lock = klock::lock_cpu::<Traits>();

        // Safety: CPU Lock active
        debug_assert!(
            unsafe { Traits::is_wait_queue_empty(&self.wait_queue) },
            "re-initializing a stack that has waiting tasks"
        );

        *self.buf.write(&mut *lock) = StackBuf {
            base: buffer,
            next: buffer,
            // Safety: Upheld by the caller
            top: unsafe { buffer.add(num_entries) },
        };
    }

    /// Push `data` onto the stack.
    ///
    /// If a task is waiting in [`Self::pop`], `data` is handed over to the
    /// first one in the wait queue instead, and the buffer is left untouched.
    /// If that task has a higher priority than the caller, and the caller is
    /// in a task context that doesn't hold CPU Lock by itself, the caller
    /// yields to it before returning.
    ///
    /// # Panics
    ///
    /// Panics if the stack is full (which includes the case where the stack
    /// is unbound).
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn push(&'static self, data: Word) {
        let lock = klock::lock_cpu::<Traits>();
        if let Err(lock) = self.push_locked(lock, data) {
            // Leave CPU Lock before unwinding
            drop(lock);
            panic!("stack is full");
        }
    }

    /// Push `data` onto the stack, or fail with `QueueOverflow` if the stack
    /// is full. The fullness check and the push are done in the same critical
    /// section.
    pub(crate) fn try_push(&'static self, data: Word) -> Result<(), QueueOverflowError> {
        let lock = klock::lock_cpu::<Traits>();
        self.push_locked(lock, data)
            .map_err(|_| QueueOverflowError::QueueOverflow)
    }

    /// The body of [`Self::push`]. Hands the guard back if the stack is full.
    fn push_locked(
        &'static self,
        mut lock: CpuLockGuard<Traits>,
        data: Word,
    ) -> Result<(), CpuLockGuard<Traits>> {
        let buf = *self.buf.read(&*lock);
        if buf.is_full() {
            return Err(lock);
        }

        // Safety: CPU Lock active
        if let Some(task) = unsafe { Traits::unpend_first_task(&self.wait_queue) } {
            wait::wake_up_with(lock.borrow_mut(), task, Ok(data));

            // Safety: CPU Lock active
            if state::may_switch_now(&lock) && unsafe { Traits::must_switch_tasks() } {
                let key = lock.into_key();
                // Safety: `key` is the key of the CPU Lock state we are in,
                //         and we are in a task context
                unsafe { Traits::swap(key) };
            }
        } else {
            // Safety: `next < top`, so `next` points to a slot in the buffer
            //         bound by `init`
            unsafe { buf.next.write(data) };
            // Safety: `next < top`
            self.buf.write(&mut *lock).next = unsafe { buf.next.add(1) };
        }

        Ok(())
    }

    /// Pop a value from the stack.
    ///
    /// If the stack is empty, the behavior depends on `timeout`:
    /// [`Timeout::NoWait`] fails with [`PopError::WouldBlock`]; otherwise the
    /// current task is blocked until a value is pushed (which is then handed
    /// over directly), the timeout elapses ([`PopError::Timeout`]), or the
    /// wait is cancelled by the port ([`PopError::Interrupted`]).
    ///
    /// Waiting is only possible in a [waitable] context. Otherwise, the
    /// operation fails with [`PopError::BadContext`] when waiting would be
    /// required.
    ///
    /// [waitable]: crate#contexts
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn pop(&'static self, timeout: Timeout) -> Result<Word, PopError> {
        let mut lock = klock::lock_cpu::<Traits>();

        let buf = self.buf.write(&mut *lock);
        if buf.next != buf.base {
            // Safety: `base < next`, so `next - 1` points to an occupied slot
            unsafe {
                buf.next = buf.next.sub(1);
                return Ok(buf.next.read());
            }
        }

        if timeout.is_no_wait() {
            return Err(PopError::WouldBlock);
        }

        state::expect_waitable_context(&lock)?;

        Ok(wait::wait_timeout(lock, &self.wait_queue, timeout)?)
    }

    /// Get the number of values currently stored in the buffer.
    pub fn len(&self) -> usize {
        let lock = klock::lock_cpu::<Traits>();
        self.buf.read(&*lock).len()
    }

    /// Get the capacity. Returns `0` if the stack is unbound.
    pub fn capacity(&self) -> usize {
        let lock = klock::lock_cpu::<Traits>();
        self.buf.read(&*lock).capacity()
    }

    /// Get a flag indicating whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a flag indicating whether the buffer is full.
    pub fn is_full(&self) -> bool {
        let lock = klock::lock_cpu::<Traits>();
        self.buf.read(&*lock).is_full()
    }
}

impl<Traits: KernelTraits> fmt::Debug for Stack<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stack")
            .field("self", &(self as *const _))
            .field("buf", &self.buf)
            .field("wait_queue", &self.wait_queue)
            .finish()
    }
}
