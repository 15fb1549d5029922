//! Device restart primitive.

use std::fmt;

/// Why the device last started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetReason {
    /// Power applied
    PowerOn,
    /// Requested restart
    Software,
    /// Crash
    Panic,
    /// Watchdog expiry
    Watchdog,
    /// Brownout detector
    Brownout,
    /// Anything else
    #[default]
    Unknown,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetReason::PowerOn => "power-on",
            ResetReason::Software => "software",
            ResetReason::Panic => "panic",
            ResetReason::Watchdog => "watchdog",
            ResetReason::Brownout => "brownout",
            ResetReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Restart control.
///
/// A restart is the only recovery primitive the runtime uses. Shutdown hooks
/// have already run by the time [`DeviceControl::restart`] is called.
pub trait DeviceControl: Send + Sync {
    /// Restart the device. On hardware this does not return.
    fn restart(&self, reason: &str);

    /// Reason for the current boot.
    fn reset_reason(&self) -> ResetReason {
        ResetReason::Unknown
    }
}
