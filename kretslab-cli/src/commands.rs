use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use kretslab_config::KretslabConfig;
use kretslab_engine::{
    check_script, load_catalog, load_layout, run_fuzz_mode, run_simulation_mode, FuzzRequest,
    SimulationReport, SimulationRequest,
};
use kretslab_simulator::StopReason;
use kretslab_telemetry::MetricsRecorder;

#[derive(Parser)]
#[command(name = "kretslab", version, about)]
pub struct Cli {
    /// Configuration file, replacing config/kretslab.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script against a board layout
    Run(RunArgs),
    /// Compile a script and report diagnostics without running it
    Check(CheckArgs),
    /// List the device templates in the catalog
    Catalog,
    /// Run successive seeds twice each and compare the results
    Fuzz(FuzzArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Script file; the board's example code when omitted
    #[arg(short, long)]
    pub script: Option<PathBuf>,
    /// Board layout file; the default workbench when omitted
    #[arg(short, long)]
    pub board: Option<PathBuf>,
    /// Loop iterations, overriding sandbox.max_iterations
    #[arg(long)]
    pub iterations: Option<u64>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Expected state digest; a mismatch writes a bug report
    #[arg(long)]
    pub validate_hash: Option<String>,
    #[arg(long, default_value = ".")]
    pub report_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    pub script: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct FuzzArgs {
    #[arg(short, long)]
    pub script: Option<PathBuf>,
    #[arg(short, long)]
    pub board: Option<PathBuf>,
    /// Initial seed (will auto-increment)
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    /// Number of seeds to try (0 for unlimited)
    #[arg(long, default_value_t = 0)]
    pub runs: u64,
    /// Loop iterations per run
    #[arg(long, default_value_t = 100)]
    pub iterations: u64,
    #[arg(long, default_value = ".")]
    pub report_dir: PathBuf,
}

pub async fn run_command(
    cli: Cli,
    config: &KretslabConfig,
    metrics: Option<MetricsRecorder>,
) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run(args, config, metrics).await,
        Commands::Check(args) => check(&args.script),
        Commands::Catalog => catalog(config),
        Commands::Fuzz(args) => fuzz(args, config, metrics).await,
    }
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn run(
    args: RunArgs,
    config: &KretslabConfig,
    metrics: Option<MetricsRecorder>,
) -> anyhow::Result<()> {
    let request = SimulationRequest {
        source: args.script.as_deref().map(read_script).transpose()?,
        layout: load_layout(args.board.as_ref())?,
        iterations: args.iterations,
        seed: args.seed,
        validate_hash: args.validate_hash,
        report_dir: args.report_dir,
    };
    let report = run_simulation_mode(config, request, metrics.clone()).await?;
    print_report(&report)?;

    if let Some(metrics) = metrics {
        println!("--- metrics ---");
        print!("{}", metrics.gather_metrics()?);
    }
    if report.outcome.reason == StopReason::CompileFailed {
        bail!(
            "script failed to compile with {} diagnostic(s)",
            report.outcome.diagnostics.len()
        );
    }
    Ok(())
}

fn print_report(report: &SimulationReport) -> anyhow::Result<()> {
    for diagnostic in &report.outcome.diagnostics {
        eprintln!("error: {}", diagnostic);
    }
    for entry in &report.console {
        println!("{}", entry);
    }
    println!("--- {} ({}) ---", report.outcome.status, report.outcome.reason);
    println!(
        "iterations: {}  virtual time: {}ms  seed: {}",
        report.outcome.iterations, report.outcome.virtual_time_ms, report.seed
    );
    if let Some(fault) = &report.outcome.fault {
        println!("fault: {}", fault);
    }
    print!("{}", serde_yaml::to_string(&report.snapshot)?);
    println!("digest: {}", report.digest);
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let result = check_script(&read_script(path)?);
    for diagnostic in &result.diagnostics {
        eprintln!("{}:{}", path.display(), diagnostic);
    }
    if !result.success {
        bail!("{} diagnostic(s)", result.diagnostics.len());
    }
    println!("{}: ok", path.display());
    Ok(())
}

fn catalog(config: &KretslabConfig) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    for template in catalog.iter() {
        println!(
            "{:<16} {:<14} {:<20} {} ports",
            template.id,
            template.class,
            template.name,
            template.ports.len()
        );
    }
    Ok(())
}

async fn fuzz(
    args: FuzzArgs,
    config: &KretslabConfig,
    metrics: Option<MetricsRecorder>,
) -> anyhow::Result<()> {
    let request = FuzzRequest {
        source: args.script.as_deref().map(read_script).transpose()?,
        layout: load_layout(args.board.as_ref())?,
        seed: args.seed,
        runs: args.runs,
        iterations: Some(args.iterations),
        report_dir: args.report_dir,
    };
    let summary = run_fuzz_mode(config, request, metrics).await?;
    println!(
        "{} seed(s), {} fault(s), {} mismatch(es)",
        summary.runs, summary.faults, summary.mismatches
    );
    for report in &summary.reports {
        println!("bug report: {}", report.display());
    }
    if summary.mismatches > 0 {
        bail!("nondeterministic runs detected");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from([
            "kretslab",
            "--config",
            "lab.yaml",
            "run",
            "--script",
            "blink.ino",
            "--iterations",
            "2",
            "--seed",
            "7",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("lab.yaml")));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.script, Some(PathBuf::from("blink.ino")));
        assert_eq!(args.iterations, Some(2));
        assert_eq!(args.seed, Some(7));
        assert!(args.board.is_none());
    }

    #[test]
    fn fuzz_defaults() {
        let cli = Cli::parse_from(["kretslab", "fuzz"]);
        let Commands::Fuzz(args) = cli.command else {
            panic!("expected fuzz");
        };
        assert_eq!(args.seed, 1);
        assert_eq!(args.runs, 0);
        assert_eq!(args.iterations, 100);
    }
}
