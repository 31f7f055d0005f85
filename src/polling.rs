/// Polling watchdog engine, for hosts without usable alarm signals.
///
/// A background thread wakes every `duration / 20` and kills the process once
/// the deadline has passed. Only liveness is enforced here; memory ceilings
/// and activity limits are timer-engine features.
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::WatchdogConfig;
use crate::destruct::{self, Violation};
use crate::{EngineKind, Watchdog, WatchdogError};

/// Number of polls per deadline period.
const POLLS_PER_PERIOD: u32 = 20;

/// What the poll thread does once the deadline has passed.
type ExpireAction = Box<dyn Fn(&Violation) + Send + Sync>;

struct Shared {
    duration: Duration,
    deadline: Mutex<Instant>,
    on_expire: ExpireAction,
}

impl Shared {
    fn set_deadline(&self, deadline: Instant) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The violation, if `now` is past the deadline.
    fn check(&self, now: Instant) -> Option<Violation> {
        (now > self.deadline()).then_some(Violation::Timeout {
            duration: self.duration,
        })
    }

    fn poll_interval(&self) -> Duration {
        self.duration / POLLS_PER_PERIOD
    }

    fn watch(&self) {
        let interval = self.poll_interval();
        loop {
            if let Some(violation) = self.check(Instant::now()) {
                (self.on_expire)(&violation);
            }
            thread::sleep(interval);
        }
    }
}

pub struct PollingWatchdog {
    shared: Arc<Shared>,
}

impl PollingWatchdog {
    /// Start the poll thread with the deadline set `duration` from now.
    pub fn new(config: &WatchdogConfig) -> Result<Self, WatchdogError> {
        let duration = config.duration()?;
        if config.max_mem_mb.is_some() || config.max_resets.is_some_and(|n| n > 0) {
            warn!("memory and activity limits are not enforced by the polling watchdog");
        }
        let watchdog = Self::with_action(
            duration,
            Box::new(|violation: &Violation| destruct::destruct_via_handle(violation)),
        )?;
        tracing::info!(
            duration_secs = duration.as_secs(),
            "polling watchdog started"
        );
        Ok(watchdog)
    }

    pub(crate) fn with_action(
        duration: Duration,
        on_expire: ExpireAction,
    ) -> Result<Self, WatchdogError> {
        let shared = Arc::new(Shared {
            duration,
            deadline: Mutex::new(Instant::now() + duration),
            on_expire,
        });

        let poller = Arc::clone(&shared);
        thread::Builder::new()
            .name("selfwatch-poll".to_string())
            .spawn(move || poller.watch())
            .map_err(WatchdogError::Spawn)?;

        Ok(Self { shared })
    }

    /// Current deadline.
    pub fn deadline(&self) -> Instant {
        self.shared.deadline()
    }
}

impl Watchdog for PollingWatchdog {
    fn reset(&mut self) {
        debug!(
            duration_secs = self.shared.duration.as_secs(),
            "resetting watchdog"
        );
        self.shared.set_deadline(Instant::now() + self.shared.duration);
    }

    fn destruct(&self, violation: &Violation) -> ! {
        destruct::destruct_via_handle(violation)
    }

    /// Blocks forever; the constructor already runs this on its own thread.
    fn watch(&self) {
        self.shared.watch()
    }

    fn duration(&self) -> Duration {
        self.shared.duration
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Polling
    }
}
