//! Timeout classes for blocking operations
use core::time::Duration;

use crate::error::BadParamError;

/// Specifies how long a blocking operation such as [`Stack::pop`] may wait.
///
/// [`Stack::pop`]: crate::Stack::pop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Return immediately if the operation can't complete right now.
    NoWait,
    /// Wait until the operation completes or the wait is cancelled.
    Forever,
    /// Wait for at most the specified duration.
    After(Duration),
}

impl Timeout {
    /// The raw encoding of [`Self::NoWait`] accepted by [`Self::from_raw_millis`].
    pub const RAW_NO_WAIT: i32 = 0;

    /// The raw encoding of [`Self::Forever`] accepted by [`Self::from_raw_millis`].
    pub const RAW_FOREVER: i32 = -1;

    /// Construct a bounded `Timeout` from the specified number of
    /// milliseconds. A zero duration is the same as [`Self::NoWait`].
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::NoWait
        } else {
            Self::After(Duration::from_millis(millis))
        }
    }

    /// Decode a timeout from the raw millisecond encoding used at the call
    /// gate: `0` means [`Self::NoWait`], `-1` means [`Self::Forever`], and a
    /// positive value is a duration in milliseconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use kstack_kernel::{Timeout, BadParamError};
    /// use core::time::Duration;
    /// assert_eq!(Timeout::from_raw_millis(0), Ok(Timeout::NoWait));
    /// assert_eq!(Timeout::from_raw_millis(-1), Ok(Timeout::Forever));
    /// assert_eq!(
    ///     Timeout::from_raw_millis(50),
    ///     Ok(Timeout::After(Duration::from_millis(50))),
    /// );
    /// assert_eq!(Timeout::from_raw_millis(-2), Err(BadParamError::BadParam));
    /// ```
    pub const fn from_raw_millis(raw: i32) -> Result<Self, BadParamError> {
        match raw {
            Self::RAW_NO_WAIT => Ok(Self::NoWait),
            Self::RAW_FOREVER => Ok(Self::Forever),
            // `raw > 0` here, so the cast is lossless
            1.. => Ok(Self::After(Duration::from_millis(raw as u64))),
            _ => Err(BadParamError::BadParam),
        }
    }

    /// Get a flag indicating whether the operation must not wait at all. A
    /// zero-length [`Self::After`] is treated as [`Self::NoWait`].
    #[inline]
    pub const fn is_no_wait(self) -> bool {
        match self {
            Self::NoWait => true,
            Self::After(duration) => duration.is_zero(),
            Self::Forever => false,
        }
    }

    /// Get the bounded duration, if any.
    #[inline]
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::After(duration) => Some(duration),
            Self::NoWait | Self::Forever => None,
        }
    }
}

impl From<Duration> for Timeout {
    /// Convert `Duration` to `Timeout::After`. A zero `Duration` becomes
    /// `Timeout::NoWait`, as in [`Timeout::from_millis`].
    #[inline]
    fn from(x: Duration) -> Self {
        if x.is_zero() {
            Self::NoWait
        } else {
            Self::After(x)
        }
    }
}
