//! Result codes and error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use kstack_kernel::ResultCode;
            /// assert_eq!(ResultCode::WouldBlock.as_str(), "WouldBlock");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the call gate can return.
    ///
    /// The values are the negated POSIX `errno` values closest to each
    /// condition so that they can be handed to C callers unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The current context disallows the operation.
        BadContext = -1,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -3,
        /// The wait operation was cancelled by an external event before it
        /// could complete.
        Interrupted = -4,
        /// The operation timed out.
        Timeout = -11,
        /// A value couldn't be enqueued because the object is at its capacity.
        QueueOverflow = -12,
        /// The specified object handle or memory region is invalid or
        /// inaccessible from the caller.
        NoAccess = -14,
        /// The operation would have to wait, but the caller asked it not to.
        WouldBlock = -16,
        /// A parameter is invalid in a way that is not covered by any other
        /// error codes.
        BadParam = -22,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// `BadContext`
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod no_access_error {}
    /// `NoAccess`
    pub enum NoAccessError {
        NoAccess,
    }
}

define_error! {
    mod bad_param_error {}
    /// `BadParam`
    pub enum BadParamError {
        BadParam,
    }
}

define_error! {
    mod queue_overflow_error {}
    /// `QueueOverflow`
    pub enum QueueOverflowError {
        QueueOverflow,
    }
}

define_error! {
    mod wait_timeout_error {}
    /// The outcome of a wait that didn't end with a delivered value. This is
    /// what a port writes into [`TaskWait`] when it wakes up a task by itself.
    ///
    /// [`TaskWait`]: crate::TaskWait
    pub enum WaitTimeoutError {
        Interrupted,
        Timeout,
    }
}

define_error! {
    mod pop_error {}
    /// Error type for [`Stack::pop`].
    ///
    /// [`Stack::pop`]: crate::Stack::pop
    pub enum PopError: BadContextError, WaitTimeoutError {
        /// The stack is empty and waiting is required, but the current context
        /// is not [waitable].
        ///
        /// [waitable]: crate#contexts
        BadContext,
        /// The stack is empty and [`Timeout::NoWait`] was specified.
        ///
        /// [`Timeout::NoWait`]: crate::Timeout::NoWait
        WouldBlock,
        /// No value arrived within the specified duration.
        Timeout,
        /// The wait was cancelled by the port (e.g., by
        /// `interrupt_task`).
        Interrupted,
    }
}

define_error! {
    mod interrupt_task_error {}
    /// Error type for a port's operation that cancels a task's ongoing wait.
    pub enum InterruptTaskError {
        /// The task is not waiting.
        BadObjectState,
    }
}

define_error! {
    mod stack_init_error {}
    /// Error type for [`gate::stack_init`].
    ///
    /// [`gate::stack_init`]: crate::gate::stack_init
    pub enum StackInitError: NoAccessError, BadParamError {
        /// The handle doesn't refer to a stack, or the buffer region isn't
        /// accessible.
        NoAccess,
        /// The number of entries is not positive.
        BadParam,
    }
}

define_error! {
    mod stack_push_error {}
    /// Error type for [`gate::stack_push`].
    ///
    /// [`gate::stack_push`]: crate::gate::stack_push
    pub enum StackPushError: NoAccessError, QueueOverflowError {
        /// The handle doesn't refer to a stack.
        NoAccess,
        /// The stack is full.
        QueueOverflow,
    }
}

define_error! {
    mod stack_pop_error {}
    /// Error type for [`gate::stack_pop`].
    ///
    /// [`gate::stack_pop`]: crate::gate::stack_pop
    pub enum StackPopError: NoAccessError, BadParamError, PopError {
        /// The handle doesn't refer to a stack, or the output location can't
        /// hold a word.
        NoAccess,
        /// The timeout value is not one of the recognized encodings.
        BadParam,
        BadContext,
        WouldBlock,
        Timeout,
        Interrupted,
    }
}
