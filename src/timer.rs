/// Alarm-driven watchdog engine for unix hosts.
///
/// The deadline lives in the kernel: every reset re-arms `alarm(2)`, and
/// `SIGALRM` kills the process. Memory and activity checks run inline in
/// `reset()`.
///
/// The alarm is a process-wide resource, so only one timer watchdog can exist
/// per process. Not thread-safe beyond that: `reset()` is meant to be called
/// from the owner's work loop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, warn};

use crate::config::WatchdogConfig;
use crate::destruct::{self, Violation};
use crate::memory::{MemoryCeiling, MemoryProbe, PsProbe};
use crate::window::ActivityWindow;
use crate::{EngineKind, Watchdog, WatchdogError};

static ALARM_HELD: AtomicBool = AtomicBool::new(false);

/// Ownership of the process alarm. Acquired once and never given back.
#[derive(Debug)]
struct AlarmSlot(());

impl AlarmSlot {
    fn acquire() -> Result<Self, WatchdogError> {
        ALARM_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| AlarmSlot(()))
            .map_err(|_| WatchdogError::AlarmAlreadyHeld)
    }

    /// Give the slot back after a failed construction.
    fn release(self) {
        ALARM_HELD.store(false, Ordering::SeqCst);
    }
}

/// The checks `reset()` runs before re-arming, in order.
pub(crate) struct ResetChecks {
    ceiling: Option<MemoryCeiling>,
    probe: Box<dyn MemoryProbe>,
    window: Option<ActivityWindow>,
}

impl ResetChecks {
    pub(crate) fn new(config: &WatchdogConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            ceiling: config.max_mem_mb.map(MemoryCeiling::from_mb),
            probe,
            // A zero cap means "not configured", not "no resets allowed".
            window: config
                .max_resets
                .filter(|&n| n > 0)
                .map(ActivityWindow::new),
        }
    }

    /// Run the memory check, then record the reset in the activity window.
    /// Stops at the first violation.
    pub(crate) fn run(&mut self, now: Instant) -> Option<Violation> {
        if let Some(ceiling) = self.ceiling {
            match self.probe.resident_bytes() {
                Ok(rss_bytes) if ceiling.is_exceeded_by(rss_bytes) => {
                    return Some(Violation::MemoryCeiling {
                        rss_bytes,
                        ceiling_bytes: ceiling.bytes(),
                    });
                }
                Ok(rss_bytes) => debug!(rss_bytes, ceiling_bytes = ceiling.bytes(), "memory ok"),
                Err(e) => warn!(error = %e, "memory check skipped"),
            }
        }

        if let Some(window) = self.window.as_mut() {
            if window.record(now) {
                return Some(Violation::Frenetic {
                    resets: window.len(),
                    max_resets: window.max_resets(),
                    timeframe: window.timeframe(),
                });
            }
        }

        None
    }
}

pub struct TimerWatchdog {
    duration: Duration,
    checks: ResetChecks,
    _slot: AlarmSlot,
}

impl TimerWatchdog {
    /// Install the alarm handler and optional address-space limit, then arm
    /// the alarm for the configured duration.
    pub fn new(config: &WatchdogConfig) -> Result<Self, WatchdogError> {
        Self::with_probe(config, Box::new(PsProbe::current()))
    }

    /// Like [`TimerWatchdog::new`] with a custom resident-memory source.
    pub fn with_probe(
        config: &WatchdogConfig,
        probe: Box<dyn MemoryProbe>,
    ) -> Result<Self, WatchdogError> {
        let duration = config.duration()?;
        let slot = AlarmSlot::acquire()?;

        if let Err(e) = install(config) {
            slot.release();
            return Err(e);
        }

        let watchdog = Self {
            duration,
            checks: ResetChecks::new(config, probe),
            _slot: slot,
        };
        arm(duration);
        tracing::info!(
            duration_secs = duration.as_secs(),
            max_mem_mb = ?config.max_mem_mb,
            max_resets = ?config.max_resets,
            "timer watchdog armed"
        );
        Ok(watchdog)
    }
}

fn install(config: &WatchdogConfig) -> Result<(), WatchdogError> {
    let action = SigAction::new(
        SigHandler::Handler(destruct::on_alarm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: on_alarm only calls async-signal-safe functions (write, getpid, kill).
    unsafe { sigaction(Signal::SIGALRM, &action) }.map_err(WatchdogError::SignalHandler)?;

    if let Some(mb) = config.max_mem_mb {
        MemoryCeiling::from_mb(mb)
            .install_hard_limit()
            .map_err(WatchdogError::MemoryLimit)?;
    }
    Ok(())
}

/// Arm the process alarm, replacing any pending one.
fn arm(duration: Duration) {
    let secs = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
    nix::unistd::alarm::set(secs);
}

impl Watchdog for TimerWatchdog {
    fn reset(&mut self) {
        if let Some(violation) = self.checks.run(Instant::now()) {
            self.destruct(&violation);
        }
        debug!(duration_secs = self.duration.as_secs(), "resetting watchdog");
        arm(self.duration);
    }

    fn destruct(&self, violation: &Violation) -> ! {
        destruct::self_destruct(violation)
    }

    fn watch(&self) {
        // Enforcement happens in the SIGALRM handler.
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Timer
    }
}
