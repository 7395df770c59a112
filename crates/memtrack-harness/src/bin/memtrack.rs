//! CLI entrypoint for the memtrack harness.

#![allow(unsafe_code)]

use clap::{Parser, Subcommand};
use memtrack_core::{
    Category, LogEmitter, LogFormat, LogLevel, Tracker, TrackerConfig, call_site,
};
use memtrack_harness::{StressConfig, run_demo, run_stress};

/// Debug-time allocation tracking tools.
#[derive(Debug, Parser)]
#[command(name = "memtrack")]
#[command(about = "Allocation tracker demonstration and stress harness")]
struct Cli {
    /// Diagnostic format on stderr (text or json). Overrides MEMTRACK_LOG_FORMAT.
    #[arg(long, global = true)]
    log_format: Option<String>,
    /// Minimum diagnostic level (trace..fatal). Overrides MEMTRACK_LOG_LEVEL.
    #[arg(long, global = true, value_parser = parse_level)]
    log_level: Option<LogLevel>,
    /// Number of tracker slots. Overrides MEMTRACK_CAPACITY.
    #[arg(long, global = true)]
    capacity: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build two example structures, report, free them, report again.
    Demo {
        /// Also print a JSON summary after the reports.
        #[arg(long)]
        json: bool,
    },
    /// Run a deterministic allocate/free sequence with an audit after every step.
    Stress {
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value_t = 2_000)]
        steps: usize,
        /// Largest single allocation in bytes.
        #[arg(long, default_value_t = 1024)]
        max_size: usize,
    },
    /// Request an impossible allocation to exercise the fatal path. Aborts.
    OomProbe {
        /// Bytes to request (defaults to isize::MAX).
        #[arg(long)]
        size: Option<usize>,
    },
}

fn parse_level(raw: &str) -> Result<LogLevel, String> {
    LogLevel::from_str_loose(raw).ok_or_else(|| format!("unknown log level `{raw}`"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = TrackerConfig::from_env();
    if let Some(format) = &cli.log_format {
        config = config.with_log_format(LogFormat::from_str_loose(format));
    }
    if let Some(level) = cli.log_level {
        config = config.with_log_level(level);
    }
    if let Some(capacity) = cli.capacity {
        config = config.with_capacity(capacity);
    }

    match cli.command {
        Command::Demo { json } => {
            let tracker = Tracker::with_config(config);
            let mut stdout = std::io::stdout().lock();
            let summary = run_demo(&tracker, &mut stdout)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            if summary.remaining_blocks != 0 {
                return Err(format!("{} block(s) leaked", summary.remaining_blocks).into());
            }
        }
        Command::Stress {
            seed,
            steps,
            max_size,
        } => {
            let emitter = LogEmitter::stderr("stress")
                .with_min_level(config.log_level)
                .with_format(config.log_format);
            let stress = StressConfig {
                seed,
                steps,
                capacity: cli.capacity.unwrap_or(StressConfig::default().capacity),
                max_size,
            };
            let summary = run_stress(stress, emitter)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::OomProbe { size } => {
            let tracker = Tracker::with_config(config);
            let size = size.unwrap_or(isize::MAX as usize);
            eprintln!("requesting {size} bytes");
            let handle = tracker.allocate(size, call_site!(), Category::Dynamic);
            // Only reached when the request unexpectedly succeeds or is refused.
            // SAFETY: `handle` is None or live in this tracker.
            unsafe { tracker.free(handle, call_site!()) };
            return Err(format!("allocation of {size} bytes did not abort").into());
        }
    }

    Ok(())
}
