//! Kernel state locking mechanism
use core::{fmt, mem, ops};
use tokenlock::UnsyncTokenLock;

use crate::PortCpuLock;

pub(crate) struct CpuLockTag<Traits>(Traits);

/// The key that "unlocks" [`CpuLockCell`].
pub(crate) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub(crate) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits: PortCpuLock, T: ?Sized> CpuLockCell<Traits, T> {
    /// Return a debug formatting proxy of the cell. The given closure is used
    /// to format the borrowed contents. Note that CPU Lock is active when the
    /// closure is called.
    ///
    /// This must not be used while the kernel holds a [`CpuLockGuard`] (i.e.,
    /// from inside a kernel operation).
    pub(crate) fn debug_fmt_with_ref<'a, F: 'a + Fn(&T, &mut fmt::Formatter) -> fmt::Result>(
        &'a self,
        f: F,
    ) -> impl fmt::Debug + 'a {
        struct DebugFmtWithRef<'a, Traits, T: ?Sized, F> {
            cell: &'a CpuLockCell<Traits, T>,
            f: F,
        }

        impl<Traits: PortCpuLock, T: ?Sized, F: Fn(&T, &mut fmt::Formatter) -> fmt::Result>
            fmt::Debug for DebugFmtWithRef<'_, Traits, T, F>
        {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let lock = lock_cpu::<Traits>();
                f.write_str("CpuLockCell(")?;
                (self.f)(self.cell.0.read(&*lock), f)?;
                f.write_str(")")
            }
        }

        DebugFmtWithRef { cell: self, f }
    }
}

impl<Traits: PortCpuLock, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.debug_fmt_with_ref(|x, f| x.fmt(f)).fmt(f)
    }
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Enter a CPU Lock state and get an RAII guard.
///
/// Unlike a plain flag, CPU Lock may already be held by the current context
/// (e.g., an application disabled interrupts around a kernel call). In this
/// case the returned guard is *nested*: dropping it leaves CPU Lock active,
/// and [`CpuLockGuard::is_nested`] reports `true`.
pub(crate) fn lock_cpu<Traits: PortCpuLock>() -> CpuLockGuard<Traits> {
    // Safety: The key is returned to `leave_cpu_lock` by `CpuLockGuard::drop`
    //         or handed over to `PortThreading::swap`
    let key = unsafe { Traits::enter_cpu_lock() };

    // Safety: The kernel never calls `lock_cpu` while holding another
    //         `CpuLockGuard`, and applications can't obtain `CpuLockToken`,
    //         so this is the only instance
    unsafe { assume_cpu_lock(key) }
}

/// Assume a CPU Lock state and get `CpuLockGuard`.
///
/// # Safety
///
/// The system must be really in a CPU Lock state, entered with `key`. There
/// must be no instances of `CpuLockGuard` or `CpuLockToken` existing at the
/// point of the call.
pub(crate) unsafe fn assume_cpu_lock<Traits: PortCpuLock>(
    key: Traits::CpuLockKey,
) -> CpuLockGuard<Traits> {
    debug_assert!(Traits::is_cpu_lock_active());

    CpuLockGuard {
        key,
        // Safety: There are no other instances of `CpuLockToken`; this is
        //         upheld by the caller.
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type.
pub(crate) struct CpuLockGuard<Traits: PortCpuLock> {
    key: Traits::CpuLockKey,
    token: CpuLockToken<Traits>,
}

impl<Traits: PortCpuLock> CpuLockGuard<Traits> {
    /// Construct a [`CpuLockTokenRefMut`] by borrowing `self`.
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }

    /// Get a flag indicating whether CPU Lock was already active when this
    /// guard was created.
    pub(crate) fn is_nested(&self) -> bool {
        Traits::is_nested_key(self.key)
    }

    /// Dissolve the guard without leaving CPU Lock, returning the restore
    /// key. The caller takes the responsibility of releasing CPU Lock, usually
    /// by passing the key to [`PortThreading::swap`].
    ///
    /// [`PortThreading::swap`]: crate::PortThreading::swap
    pub(crate) fn into_key(self) -> Traits::CpuLockKey {
        let key = self.key;
        mem::forget(self);
        key
    }
}

impl<Traits: PortCpuLock> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock is currently active, and it's us (the kernel) who
        // entered it with `self.key`
        unsafe {
            Traits::leave_cpu_lock(self.key);
        }
    }
}

impl<Traits: PortCpuLock> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortCpuLock> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed version of [`CpuLockGuard`]. This is equivalent to
/// `&'a mut CpuLockGuard` but does not consume memory.
///
///  - Always prefer this over `&mut CpuLockGuard` in function parameters.
///  - When you pass `&'a mut _` to a function, the compiler automatically
///    reborrows it as `&'b mut _` so that the original `&'a mut _` remains
///    accessible after the function call. This does not happen with
///    `CpuLockTokenRefMut`. You have to call [`borrow_mut`] manually.
///
/// [`borrow_mut`]: tokenlock::UnsyncSingletonTokenRefMut::borrow_mut
pub(crate) type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;
