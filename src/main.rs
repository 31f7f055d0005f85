use clap::Parser;
use selfwatch::config::{self, EngineChoice, HostConfig, SelfwatchConfig};
use selfwatch::Watchdog;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

/// Run a work loop under a self-killing watchdog: reset it on every tick,
/// optionally stall or reset too often to watch the watchdog fire.
#[derive(Parser, Debug)]
#[command(name = "selfwatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "selfwatch.toml")]
    config: PathBuf,

    /// Watchdog deadline in seconds (overrides config)
    #[arg(long)]
    duration: Option<u64>,

    /// Memory ceiling in megabytes (overrides config)
    #[arg(long)]
    max_mem_mb: Option<u64>,

    /// Maximum resets per 60s (overrides config)
    #[arg(long)]
    max_resets: Option<usize>,

    /// Enforcement engine (overrides config)
    #[arg(long, value_enum)]
    engine: Option<EngineChoice>,

    /// Milliseconds between resets (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Exit cleanly after this many seconds (overrides config)
    #[arg(long)]
    run_for: Option<u64>,

    /// Stop resetting after this many resets (overrides config)
    #[arg(long)]
    stall_after: Option<u64>,

    /// Print resolved settings, don't arm a watchdog
    #[arg(long)]
    dry_run: bool,

    /// Debug logging (every reset)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut SelfwatchConfig) {
        if let Some(secs) = self.duration {
            config.watchdog.duration_secs = secs;
        }
        if let Some(mb) = self.max_mem_mb {
            config.watchdog.max_mem_mb = Some(mb);
        }
        if let Some(n) = self.max_resets {
            config.watchdog.max_resets = Some(n);
        }
        if let Some(engine) = self.engine {
            config.host.engine = engine;
        }
        if let Some(ms) = self.interval_ms {
            config.host.reset_interval_ms = ms;
        }
        if let Some(secs) = self.run_for {
            config.host.run_for_secs = Some(secs);
        }
        if let Some(n) = self.stall_after {
            config.host.stall_after = Some(n);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = config::load(&cli.config)?;
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        print_settings(&cli, &config);
        return Ok(());
    }

    let deadline_ms = config.watchdog.duration_secs.saturating_mul(1000);
    if config.host.stall_after.is_none() && config.host.reset_interval_ms >= deadline_ms {
        tracing::warn!(
            reset_interval_ms = config.host.reset_interval_ms,
            duration_secs = config.watchdog.duration_secs,
            "reset interval is not shorter than the deadline; the watchdog will fire"
        );
    }

    let mut watchdog = selfwatch::new_watchdog_with(config.host.engine, &config.watchdog)?;
    tracing::info!(
        engine = ?watchdog.kind(),
        duration_secs = watchdog.duration().as_secs(),
        "watchdog armed"
    );

    run_work_loop(watchdog.as_mut(), &config.host).await;
    Ok(())
}

fn print_settings(cli: &Cli, config: &SelfwatchConfig) {
    let watchdog = &config.watchdog;
    let host = &config.host;
    println!("selfwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file: {}", cli.config.display());
    println!("duration_secs = {}", watchdog.duration_secs);
    println!("max_mem_mb = {:?}", watchdog.max_mem_mb);
    println!("max_resets = {:?}", watchdog.max_resets);
    println!("engine = {:?}", host.engine);
    println!("reset_interval_ms = {}", host.reset_interval_ms);
    println!("run_for_secs = {:?}", host.run_for_secs);
    println!("stall_after = {:?}", host.stall_after);
    println!("Dry run mode: config validated, not arming.");
}

/// Reset the watchdog on every tick until `run_for_secs` elapses.
///
/// Past `stall_after` resets the loop keeps ticking without resetting, which
/// is indistinguishable from a hang as far as the watchdog is concerned.
async fn run_work_loop(watchdog: &mut dyn Watchdog, host: &HostConfig) {
    let started = Instant::now();
    let run_for = host.run_for_secs.map(Duration::from_secs);
    let mut interval = tokio::time::interval(Duration::from_millis(host.reset_interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut resets: u64 = 0;
    loop {
        interval.tick().await;

        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            tracing::info!(resets, "run time reached, exiting");
            return;
        }

        if host.stall_after.is_some_and(|limit| resets >= limit) {
            continue;
        }

        watchdog.reset();
        resets += 1;
        if host.stall_after == Some(resets) {
            tracing::warn!(resets, "stalling: no further resets");
        }
    }
}
