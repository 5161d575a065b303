//! Nanosecond-precision timestamps.
//!
//! [`Timestamp`] wraps a `u64` of nanoseconds since the Unix epoch. Receive
//! timestamps, persistence timestamps, and latency fields all share this
//! epoch so persisted records can be correlated across processes.
//! [`Timestamp::now`] uses `clock_gettime(CLOCK_REALTIME)` directly for
//! sub-microsecond overhead on the read loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Capture the current wall-clock time as nanoseconds.
    #[inline]
    pub fn now() -> Self {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            Self(realtime_nanos())
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            use std::time::{SystemTime, UNIX_EPOCH};
            let dur = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before UNIX epoch");
            Self(dur.as_nanos() as u64)
        }
    }

    /// Create a timestamp from milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * 1_000_000)
    }

    /// Convert to milliseconds since the epoch.
    #[inline]
    pub const fn to_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Raw nanosecond value.
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Elapsed nanoseconds from `earlier` to `self`, saturating at zero if
    /// the clock stepped backwards in between.
    #[inline]
    pub const fn elapsed_since(&self, earlier: &Timestamp) -> u64 {
        if self.0 >= earlier.0 {
            self.0 - earlier.0
        } else {
            0
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{}.{:09}", secs, nanos)
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn realtime_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: passing a valid pointer to a stack-allocated timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
