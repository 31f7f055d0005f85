/// Resource limiter: resident memory queries and the hard address-space limit.
///
/// The ceiling is configured in megabytes and held in bytes. The soft check in
/// `reset()` and the `RLIMIT_AS` limit both use the same byte value.
use std::process::Command;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_KB: u64 = 1024;

/// Percentage of the ceiling above which resident usage is a violation.
pub const CEILING_PERCENT: u64 = 95;

/// Configured memory ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCeiling {
    bytes: u64,
}

impl MemoryCeiling {
    pub fn from_mb(mb: u64) -> Self {
        Self {
            bytes: mb.saturating_mul(BYTES_PER_MB),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// True when `rss_bytes` is above 95% of the ceiling.
    pub fn is_exceeded_by(&self, rss_bytes: u64) -> bool {
        u128::from(rss_bytes) * 100 > u128::from(self.bytes) * u128::from(CEILING_PERCENT)
    }

    /// Install the ceiling as both soft and hard `RLIMIT_AS`, so the kernel
    /// refuses allocations past it even when the allocation failure would be
    /// swallowed by the application.
    #[cfg(unix)]
    pub fn install_hard_limit(&self) -> nix::Result<()> {
        use nix::sys::resource::{setrlimit, Resource};
        setrlimit(Resource::RLIMIT_AS, self.bytes, self.bytes)?;
        tracing::info!(bytes = self.bytes, "address-space limit installed");
        Ok(())
    }
}

/// Errors from a process-status query.
#[derive(Debug)]
pub enum ProbeError {
    /// The status command could not be run.
    Spawn(std::io::Error),
    /// The status command ran but exited unsuccessfully.
    Status(Option<i32>),
    /// The status output did not contain a resident size.
    Parse(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Spawn(e) => write!(f, "failed to run process-status query: {e}"),
            ProbeError::Status(code) => {
                write!(f, "process-status query exited with code {code:?}")
            }
            ProbeError::Parse(out) => {
                write!(f, "unparsable process-status output: {out:?}")
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Spawn(e) => Some(e),
            ProbeError::Status(_) | ProbeError::Parse(_) => None,
        }
    }
}

/// Source of the current process's resident set size.
pub trait MemoryProbe: Send {
    /// Resident memory of the current process, in bytes.
    fn resident_bytes(&mut self) -> Result<u64, ProbeError>;
}

/// Queries resident size through `ps -p <pid> -o rss=`.
#[derive(Debug, Clone)]
pub struct PsProbe {
    pid: u32,
}

impl PsProbe {
    /// Probe scoped to the current process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
        }
    }
}

impl MemoryProbe for PsProbe {
    fn resident_bytes(&mut self) -> Result<u64, ProbeError> {
        let output = Command::new("ps")
            .args(["-p", &self.pid.to_string(), "-o", "rss="])
            .output()
            .map_err(ProbeError::Spawn)?;
        if !output.status.success() {
            return Err(ProbeError::Status(output.status.code()));
        }
        let kb = parse_rss_kb(&String::from_utf8_lossy(&output.stdout))?;
        Ok(kb.saturating_mul(BYTES_PER_KB))
    }
}

/// Parse the resident size (KiB) from `ps` output.
///
/// Takes the last non-empty line, so both `rss=` (no header) and plain `rss`
/// (with an `RSS` header) output are accepted.
fn parse_rss_kb(output: &str) -> Result<u64, ProbeError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .and_then(|line| line.parse::<u64>().ok())
        .ok_or_else(|| ProbeError::Parse(output.to_string()))
}
