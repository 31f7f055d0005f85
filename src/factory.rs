/// Engine selection by host platform.
use crate::config::{EngineChoice, WatchdogConfig};
use crate::polling::PollingWatchdog;
use crate::{Watchdog, WatchdogError};

/// Host platform, as far as engine selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Signals and `alarm(2)` are available.
    Posix,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(unix) {
            Platform::Posix
        } else {
            Platform::Other
        }
    }
}

/// The engine a watchdog runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Timer,
    Polling,
}

impl EngineChoice {
    /// Resolve the requested engine against `platform`.
    pub fn resolve(self, platform: Platform) -> Result<EngineKind, WatchdogError> {
        match (self, platform) {
            (EngineChoice::Auto, Platform::Posix) | (EngineChoice::Timer, Platform::Posix) => {
                Ok(EngineKind::Timer)
            }
            (EngineChoice::Auto, Platform::Other) | (EngineChoice::Polling, _) => {
                Ok(EngineKind::Polling)
            }
            (EngineChoice::Timer, Platform::Other) => {
                Err(WatchdogError::Unsupported("the timer engine requires a unix host"))
            }
        }
    }
}

/// Build the watchdog best suited to the current platform.
pub fn new_watchdog(config: &WatchdogConfig) -> Result<Box<dyn Watchdog>, WatchdogError> {
    new_watchdog_with(EngineChoice::Auto, config)
}

/// Build a watchdog on the requested engine.
pub fn new_watchdog_with(
    choice: EngineChoice,
    config: &WatchdogConfig,
) -> Result<Box<dyn Watchdog>, WatchdogError> {
    match choice.resolve(Platform::current())? {
        EngineKind::Timer => build_timer(config),
        EngineKind::Polling => Ok(Box::new(PollingWatchdog::new(config)?)),
    }
}

#[cfg(unix)]
fn build_timer(config: &WatchdogConfig) -> Result<Box<dyn Watchdog>, WatchdogError> {
    Ok(Box::new(crate::timer::TimerWatchdog::new(config)?))
}

#[cfg(not(unix))]
fn build_timer(_config: &WatchdogConfig) -> Result<Box<dyn Watchdog>, WatchdogError> {
    Err(WatchdogError::Unsupported("the timer engine requires a unix host"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_picks_timer_on_posix() {
        assert_eq!(
            EngineChoice::Auto.resolve(Platform::Posix).unwrap(),
            EngineKind::Timer
        );
    }

    #[test]
    fn test_auto_picks_polling_elsewhere() {
        assert_eq!(
            EngineChoice::Auto.resolve(Platform::Other).unwrap(),
            EngineKind::Polling
        );
    }

    #[test]
    fn test_polling_can_be_forced_on_posix() {
        assert_eq!(
            EngineChoice::Polling.resolve(Platform::Posix).unwrap(),
            EngineKind::Polling
        );
    }

    #[test]
    fn test_timer_unsupported_without_posix() {
        let err = EngineChoice::Timer.resolve(Platform::Other).unwrap_err();
        assert!(matches!(err, WatchdogError::Unsupported(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_current_platform_is_posix_on_unix() {
        assert_eq!(Platform::current(), Platform::Posix);
    }

    #[test]
    fn test_zero_duration_fails_before_building() {
        let err = match new_watchdog_with(EngineChoice::Polling, &WatchdogConfig::new(0)) {
            Err(e) => e,
            Ok(_) => panic!("zero duration accepted"),
        };
        assert!(matches!(err, WatchdogError::InvalidDuration));
    }
}
