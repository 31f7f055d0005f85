/// Violations and the self-termination paths.
///
/// Every violation is fatal. Termination always logs first on a best-effort
/// basis and then kills the process with a signal it cannot catch.
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// A condition that makes the watchdog kill its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// No reset within the deadline.
    Timeout { duration: Duration },
    /// Resident memory above the ceiling threshold.
    MemoryCeiling { rss_bytes: u64, ceiling_bytes: u64 },
    /// Too many resets within the activity timeframe.
    Frenetic {
        resets: usize,
        max_resets: usize,
        timeframe: Duration,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Timeout { duration } => {
                write!(f, "no reset within {}s", duration.as_secs())
            }
            Violation::MemoryCeiling {
                rss_bytes,
                ceiling_bytes,
            } => write!(
                f,
                "resident memory {rss_bytes} bytes exceeds 95% of the {ceiling_bytes} byte ceiling"
            ),
            Violation::Frenetic {
                resets,
                max_resets,
                timeframe,
            } => write!(
                f,
                "{resets} resets within {}s exceeds the limit of {max_resets}",
                timeframe.as_secs()
            ),
        }
    }
}

/// Log the violation together with the current backtrace.
///
/// Never panics: a failure inside the logging layer is swallowed so it cannot
/// keep the process alive.
pub fn log_violation(violation: &Violation) {
    let _ = std::panic::catch_unwind(AssertUnwindSafe(|| {
        tracing::error!(%violation, "self-destructing");
        let backtrace = Backtrace::force_capture();
        tracing::error!("pending context:\n{backtrace}");
    }));
}

/// Log, then kill the current process with `SIGKILL`.
#[cfg(unix)]
pub fn self_destruct(violation: &Violation) -> ! {
    log_violation(violation);
    kill_self()
}

/// Send `SIGKILL` to our own pid.
///
/// A signal sent to the calling process is delivered before `kill(2)`
/// returns, so the abort is only reached if the kill itself failed.
#[cfg(unix)]
pub fn kill_self() -> ! {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let _ = kill(Pid::this(), Signal::SIGKILL);
    std::process::abort()
}

#[cfg(unix)]
const ALARM_MESSAGE: &[u8] = b"selfwatch: deadline expired without reset, self-destructing\n";

/// `SIGALRM` handler.
///
/// Runs in whatever code the alarm interrupted, so it only uses
/// async-signal-safe calls: one raw write to stderr, then `kill(2)`.
#[cfg(unix)]
pub(crate) extern "C" fn on_alarm(_signum: nix::libc::c_int) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let _ = nix::unistd::write(std::io::stderr(), ALARM_MESSAGE);
    let _ = kill(Pid::this(), Signal::SIGKILL);
}

/// Log, then kill the current process through an OS process handle.
pub fn destruct_via_handle(violation: &Violation) -> ! {
    log_violation(violation);
    kill_via_handle()
}

fn kill_via_handle() -> ! {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new(),
    );
    match sys.process(pid) {
        Some(process) => {
            if !process.kill() {
                tracing::error!(pid = pid.as_u32(), "process handle refused kill");
            }
        }
        None => tracing::error!(pid = pid.as_u32(), "own process not found"),
    }
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let v = Violation::Timeout {
            duration: Duration::from_secs(5),
        };
        assert_eq!(v.to_string(), "no reset within 5s");
    }

    #[test]
    fn test_memory_display_names_both_sizes() {
        let v = Violation::MemoryCeiling {
            rss_bytes: 1000,
            ceiling_bytes: 1024,
        };
        let msg = v.to_string();
        assert!(msg.contains("1000 bytes"));
        assert!(msg.contains("1024 byte ceiling"));
    }

    #[test]
    fn test_frenetic_display() {
        let v = Violation::Frenetic {
            resets: 4,
            max_resets: 3,
            timeframe: Duration::from_secs(60),
        };
        assert_eq!(v.to_string(), "4 resets within 60s exceeds the limit of 3");
    }

    #[test]
    fn test_log_violation_does_not_panic_without_subscriber() {
        log_violation(&Violation::Timeout {
            duration: Duration::from_secs(1),
        });
    }
}
