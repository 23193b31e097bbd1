//! afterpaint CLI: drive the checkpoint scheduler on a virtual host.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use afterpaint_core::config::LogFormat;
use afterpaint_core::{
    AppScheduler, Capabilities, Checkpoint, SchedulePrimitive, SchedulerConfig,
    SchedulerSnapshot, VirtualHost,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "afterpaint",
    version,
    about = "Simulate navigation, paint and idle checkpoints"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AFTERPAINT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Scheduler configuration file (TOML)
    #[arg(long, global = true, env = "AFTERPAINT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run navigations through a virtual host and print when each
    /// checkpoint resolved
    Simulate(SimulateArgs),

    /// Print the scheduling primitive chosen for the painted and idle steps
    Select(SelectArgs),
}

#[derive(Args, Debug, Clone, Copy)]
struct HostArgs {
    /// Expose a next-frame primitive (default)
    #[arg(long, overrides_with = "no_frame")]
    frame: bool,

    /// Hide the next-frame primitive
    #[arg(long, overrides_with = "frame")]
    no_frame: bool,

    /// Expose an idle-callback primitive (default)
    #[arg(long, overrides_with = "no_idle")]
    idle: bool,

    /// Hide the idle-callback primitive
    #[arg(long, overrides_with = "idle")]
    no_idle: bool,

    /// Behave as if running under a test harness
    #[arg(long)]
    testing: bool,
}

impl HostArgs {
    fn frame_enabled(self) -> bool {
        self.frame || !self.no_frame
    }

    fn idle_enabled(self) -> bool {
        self.idle || !self.no_idle
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    host: HostArgs,

    /// Number of navigations to run
    #[arg(long, default_value_t = 1)]
    navigations: u32,

    /// Start each navigation before the previous chain settled
    #[arg(long)]
    overlap: bool,

    /// Give up after this many host turns per navigation
    #[arg(long, default_value_t = 16)]
    max_turns: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct SelectArgs {
    #[command(flatten)]
    host: HostArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_log_format(raw: &str) -> std::result::Result<LogFormat, String> {
    raw.parse()
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Resolution {
    tick: u64,
    generation: u64,
    checkpoint: Checkpoint,
    ok: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    capabilities: Capabilities,
    painted: SchedulePrimitive,
    idle: SchedulePrimitive,
    navigations: u32,
    rebuilt: u32,
    ignored_begins: u32,
    turns: usize,
    final_tick: u64,
    resolutions: Vec<Resolution>,
    snapshot: SchedulerSnapshot,
}

#[derive(Debug, Serialize)]
struct Selection {
    capabilities: Capabilities,
    painted: SchedulePrimitive,
    idle: SchedulePrimitive,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    config.validate().context("invalid configuration")?;
    config.install_logging().context("initializing logging")?;

    let output = match cli.command {
        Command::Simulate(args) => simulate(config, &args)?,
        Command::Select(args) => select(config, &args)?,
    };
    print!("{output}");
    Ok(())
}

fn build_scheduler(config: SchedulerConfig, host: HostArgs) -> (Arc<VirtualHost>, AppScheduler) {
    let sim = VirtualHost::new();
    let host = sim.host_with(host.frame_enabled(), host.idle_enabled(), host.testing);
    let scheduler = AppScheduler::builder(host).config(config).build();
    (sim, scheduler)
}

fn select(config: SchedulerConfig, args: &SelectArgs) -> Result<String> {
    let (_sim, scheduler) = build_scheduler(config, args.host);
    let snapshot = scheduler.snapshot();
    let selection = Selection {
        capabilities: snapshot.capabilities,
        painted: snapshot.painted,
        idle: snapshot.idle,
    };
    match args.format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&selection)?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Text => Ok(format!(
            "painted: {}\nidle: {}\n",
            selection.painted, selection.idle
        )),
    }
}

/// Record the tick at which each checkpoint of the current chain settles.
fn record(sim: &Arc<VirtualHost>, scheduler: &AppScheduler, log: &Arc<Mutex<Vec<Resolution>>>) {
    let chain = scheduler.chain();
    let generation = chain.generation();
    for checkpoint in Checkpoint::ALL {
        let sim = Arc::clone(sim);
        let log = Arc::clone(log);
        chain.handle(checkpoint).on_settle(move |outcome| {
            log.lock().push(Resolution {
                tick: sim.tick(),
                generation,
                checkpoint,
                ok: outcome.is_ok(),
            });
        });
    }
}

fn simulate(mut config: SchedulerConfig, args: &SimulateArgs) -> Result<String> {
    config.quiescence_tracking.get_or_insert(true);
    let (sim, scheduler) = build_scheduler(config, args.host);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut rebuilt = 0;
    let mut ignored_begins = 0;
    let mut turns = 0;

    info!(
        navigations = args.navigations,
        overlap = args.overlap,
        "starting simulation"
    );
    for navigation in 1..=args.navigations {
        if scheduler.begin_transition() {
            rebuilt += 1;
            record(&sim, &scheduler, &log);
        } else {
            ignored_begins += 1;
        }
        if args.overlap {
            // A second begin while this navigation is in flight is a no-op.
            if !scheduler.begin_transition() {
                ignored_begins += 1;
            }
        }
        scheduler.end_transition();

        if !args.overlap {
            turns += sim
                .run_until(|| scheduler.chain_state().is_settled(), args.max_turns)
                .with_context(|| format!("navigation {navigation} never settled"))?;
        }
        debug!(navigation, tick = sim.tick(), "navigation driven");
    }
    turns += sim
        .run_until(|| sim.pending_callbacks().total() == 0, args.max_turns)
        .context("host never drained")?;

    let snapshot = scheduler.snapshot();
    let mut resolutions = log.lock().clone();
    resolutions.sort_by_key(|r| (r.tick, r.generation, r.checkpoint));
    let report = SimulationReport {
        capabilities: snapshot.capabilities,
        painted: snapshot.painted,
        idle: snapshot.idle,
        navigations: args.navigations,
        rebuilt,
        ignored_begins,
        turns,
        final_tick: sim.tick(),
        resolutions,
        snapshot,
    };

    match args.format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&report)?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Text => Ok(render_text(&report)),
    }
}

fn render_text(report: &SimulationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "painted: {}, idle: {}",
        report.painted, report.idle
    );
    let _ = writeln!(out, "{:>6}  {:>4}  checkpoint", "tick", "gen");
    for resolution in &report.resolutions {
        let suffix = if resolution.ok { "" } else { " (rejected)" };
        let _ = writeln!(
            out,
            "{:>6}  {:>4}  {}{}",
            resolution.tick, resolution.generation, resolution.checkpoint, suffix
        );
    }
    let _ = writeln!(
        out,
        "{} navigations, {} chains built, {} begins ignored",
        report.navigations, report.rebuilt, report.ignored_begins
    );
    let _ = writeln!(
        out,
        "state: {} after {} ticks; quiescent: {}",
        report.snapshot.state, report.final_tick, report.snapshot.quiescent
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(frame: bool, idle: bool) -> HostArgs {
        HostArgs {
            frame,
            no_frame: !frame,
            idle,
            no_idle: !idle,
            testing: false,
        }
    }

    fn simulate_args(host: HostArgs, navigations: u32, overlap: bool) -> SimulateArgs {
        SimulateArgs {
            host,
            navigations,
            overlap,
            max_turns: 16,
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "afterpaint",
            "select",
            "--no-idle",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        match cli.command {
            Command::Select(args) => {
                assert!(args.host.frame_enabled());
                assert!(!args.host.idle_enabled());
            }
            Command::Simulate(_) => panic!("expected select"),
        }
    }

    #[test]
    fn later_flag_wins() {
        let cli = Cli::try_parse_from(["afterpaint", "select", "--no-frame", "--frame"]).unwrap();
        let Command::Select(args) = cli.command else {
            panic!("expected select");
        };
        assert!(args.host.frame_enabled());
    }

    #[test]
    fn select_reports_fallbacks() {
        let text = select(
            SchedulerConfig::default(),
            &SelectArgs {
                host: host(false, false),
                format: OutputFormat::Text,
            },
        )
        .unwrap();
        assert_eq!(text, "painted: immediate\nidle: immediate\n");
    }

    #[test]
    fn simulate_single_navigation_ticks() {
        let json = simulate(
            SchedulerConfig::default(),
            &simulate_args(host(true, true), 1, false),
        )
        .unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        let ticks: Vec<u64> = report["resolutions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["tick"].as_u64().unwrap())
            .collect();
        // Navigation at 0, painted after frame + run-loop, idle after
        // the next turn's idle + run-loop.
        assert_eq!(ticks, vec![0, 4, 7]);
        assert_eq!(report["snapshot"]["quiescent"], true);
    }

    #[test]
    fn overlapping_navigations_count_ignored_begins() {
        let json = simulate(
            SchedulerConfig::default(),
            &simulate_args(host(true, false), 3, true),
        )
        .unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["rebuilt"], 3);
        assert_eq!(report["ignored_begins"], 3);
        assert_eq!(report["resolutions"].as_array().unwrap().len(), 9);
        assert_eq!(report["snapshot"]["generation"], 3);
    }

    #[test]
    fn text_report_lists_checkpoints() {
        let mut config = SchedulerConfig::default();
        config.quiescence_tracking = Some(true);
        let args = SimulateArgs {
            format: OutputFormat::Text,
            ..simulate_args(host(false, false), 2, false)
        };
        let text = simulate(config, &args).unwrap();
        assert!(text.starts_with("painted: immediate, idle: immediate\n"));
        assert_eq!(text.matches("navigation-complete").count(), 2);
        assert!(text.contains("2 navigations, 2 chains built, 0 begins ignored"));
        assert!(text.contains("state: settled"));
    }
}
