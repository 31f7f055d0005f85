//! Process-local watchdog.
//!
//! A watchdog kills its own process when the owner stops calling
//! [`Watchdog::reset`] in time, when resident memory grows past a ceiling, or
//! when resets arrive suspiciously often. Restarting the process is left to
//! an external supervisor.
//!
//! ```no_run
//! use selfwatch::{new_watchdog, WatchdogConfig};
//!
//! let config = WatchdogConfig::new(30).with_max_resets(120);
//! let mut watchdog = new_watchdog(&config).expect("watchdog");
//! loop {
//!     // ... one unit of work, well under 30s ...
//!     watchdog.reset();
//! }
//! ```

pub mod config;
pub mod destruct;
mod factory;
pub mod memory;
pub mod polling;
#[cfg(unix)]
pub mod timer;
pub mod window;

use std::time::Duration;

pub use config::{EngineChoice, WatchdogConfig};
pub use destruct::Violation;
pub use factory::{new_watchdog, new_watchdog_with, EngineKind, Platform};
pub use polling::PollingWatchdog;
#[cfg(unix)]
pub use timer::TimerWatchdog;

/// Contract shared by the enforcement engines.
pub trait Watchdog: Send {
    /// Signal liveness. Must be called more often than [`Watchdog::duration`].
    ///
    /// Pushes the deadline out and runs the engine's resource and activity
    /// checks. Does not return if a check fails.
    fn reset(&mut self);

    /// Log `violation` and kill the owning process.
    fn destruct(&self, violation: &Violation) -> !;

    /// Run the enforcement loop, for engines that have one.
    fn watch(&self);

    fn duration(&self) -> Duration;

    fn kind(&self) -> EngineKind;
}

/// Errors that can occur while constructing a watchdog.
#[derive(Debug)]
pub enum WatchdogError {
    /// The configured duration is zero.
    InvalidDuration,
    /// Another timer watchdog already owns the process alarm.
    AlarmAlreadyHeld,
    /// Installing the alarm handler failed.
    #[cfg(unix)]
    SignalHandler(nix::Error),
    /// Installing the address-space limit failed.
    #[cfg(unix)]
    MemoryLimit(nix::Error),
    /// Starting the polling thread failed.
    Spawn(std::io::Error),
    /// The requested engine is not available on this platform.
    Unsupported(&'static str),
}

impl std::fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogError::InvalidDuration => write!(f, "watchdog duration must be at least 1s"),
            WatchdogError::AlarmAlreadyHeld => {
                write!(f, "a timer watchdog is already installed in this process")
            }
            #[cfg(unix)]
            WatchdogError::SignalHandler(e) => write!(f, "failed to install SIGALRM handler: {e}"),
            #[cfg(unix)]
            WatchdogError::MemoryLimit(e) => write!(f, "failed to set address-space limit: {e}"),
            WatchdogError::Spawn(e) => write!(f, "failed to start polling thread: {e}"),
            WatchdogError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for WatchdogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(unix)]
            WatchdogError::SignalHandler(e) | WatchdogError::MemoryLimit(e) => Some(e),
            WatchdogError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}
