use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

use crate::cache::CacheManager;
use crate::config::{FileConfig, GeneratorConfig};
use crate::diagnostics::Severity;
use crate::pipeline::{CancellationToken, GenerationOutcome, Generator};
use crate::utils::errors::emit_diagnostics;
use crate::utils::logger;
use crate::utils::profiler::PhaseTiming;
use crate::version::VERSION;

/// Error text that tells `main` the diagnostics were already printed.
pub const CRITICAL_DIAGNOSTICS: &str = "critical diagnostics reported";

#[derive(Parser, Debug)]
#[command(
    name = "precomp",
    version = VERSION,
    about = "Runs #[precompute] functions at build time and substitutes their results"
)]
pub struct PrecompCli {
    #[arg(long, global = true)]
    /// Enable debug logging.
    debug: bool,

    #[arg(long, global = true)]
    /// Display phase timing information.
    time: bool,

    #[command(subcommand)]
    command: Command,
}

impl PrecompCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyses the sources, executes annotated calls and writes substitutes.
    Generate(GenerateArgs),
    /// Inspects or clears the project's result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Source file or glob, relative to the project directory. Repeatable.
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Library search path passed to the worker. Repeatable.
    #[arg(long = "reference")]
    pub references: Vec<PathBuf>,

    /// Directory receiving generated units and artifacts.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// skip, warn or fail.
    #[arg(long)]
    pub timeout_behavior: Option<String>,

    #[arg(long)]
    pub warn_threshold_ms: Option<u64>,

    /// Write `precomp-report.txt` next to the generated units.
    #[arg(long)]
    pub report: bool,

    /// Do not write rewritten copies of the sources.
    #[arg(long)]
    pub no_rewrite: bool,

    /// Do nothing and succeed.
    #[arg(long)]
    pub disable: bool,

    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Worker command line, e.g. `precomp-worker`.
    #[arg(long)]
    pub worker: Option<String>,

    #[arg(long)]
    pub edition: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Prints the cache location and its entries.
    Stats(CacheArgs),
    /// Removes every entry.
    Clear(CacheArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    let cli = PrecompCli::parse();
    logger::init_logging(cli.debug);
    match &cli.command {
        Command::Generate(args) => handle_generate(&cli, args),
        Command::Cache { action } => handle_cache(action),
    }
}

/// Builds the generator configuration: defaults, file, environment, then flags.
pub fn generator_config(args: &GenerateArgs, debug: bool) -> Result<GeneratorConfig> {
    let project_dir = args.project_dir.clone();
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| project_dir.join("target").join("precomp"));
    let mut config = GeneratorConfig::load(&project_dir, out_dir)?;
    if let Some(out_dir) = &args.out_dir {
        config.out_dir = out_dir.clone();
    }
    if !args.sources.is_empty() {
        config.sources = args.sources.clone();
    }
    if !args.references.is_empty() {
        config.references = args.references.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(behavior) = &args.timeout_behavior {
        config.timeout_behavior = behavior.parse()?;
    }
    if let Some(threshold) = args.warn_threshold_ms {
        config.warn_threshold_ms = threshold;
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = Some(cache_dir.clone());
    }
    if let Some(worker) = &args.worker {
        config.worker = crate::config::WorkerCommand::parse(worker);
    }
    if let Some(edition) = &args.edition {
        config.edition = edition.clone();
    }
    config.report |= args.report;
    config.rewrite &= !args.no_rewrite;
    config.enabled &= !args.disable;
    config.debug = debug;
    Ok(config)
}

fn handle_generate(cli: &PrecompCli, args: &GenerateArgs) -> Result<()> {
    let config = generator_config(args, cli.debug)?;
    debug!(?config, "generator configuration");
    let generator = Generator::new(config);
    let outcome = generator.run(&CancellationToken::new())?;

    if !outcome.enabled {
        println!("{} precomputation disabled", "skipped".yellow().bold());
        return Ok(());
    }

    emit_diagnostics(&outcome.diagnostics, &outcome.files);
    print_summary(&outcome, generator.config().out_dir.as_path());
    if cli.time {
        print_timings(&outcome.timings);
    }

    if outcome.has_critical() {
        bail!(CRITICAL_DIAGNOSTICS);
    }
    Ok(())
}

fn print_summary(outcome: &GenerationOutcome, out_dir: &Path) {
    let count = |severity: Severity| {
        outcome
            .diagnostics
            .iter()
            .filter(|diag| diag.severity() == severity)
            .count()
    };
    let stats = outcome.cache_stats;
    println!(
        "{} {} substitutes for {} call sites ({} functions, {} requests)",
        "generated".green().bold(),
        outcome.plan.substitute_count(),
        outcome.plan.intercepted_sites(),
        outcome.functions,
        outcome.requests,
    );
    println!(
        "{:>10} {} hits, {} misses, {} invalidated, {} executed",
        "cache".bold(),
        stats.hits,
        stats.misses,
        stats.invalidations,
        outcome.executed,
    );
    println!(
        "{:>10} {} errors, {} warnings, {} notes",
        "diag".bold(),
        count(Severity::Error),
        count(Severity::Warning),
        count(Severity::Info),
    );
    println!("{:>10} {}", "output".bold(), out_dir.display());
}

fn print_timings(timings: &[PhaseTiming]) {
    println!("{}", "[Timing]".bold());
    let mut total = Duration::ZERO;
    for PhaseTiming { name, duration } in timings {
        println!("{:>16}: {:>6.2} ms", name, duration.as_secs_f64() * 1000.0);
        total += *duration;
    }
    println!("{:>16}: {:>6.2} ms", "Total", total.as_secs_f64() * 1000.0);
}

fn cache_root_override(args: &CacheArgs) -> Result<Option<PathBuf>> {
    if args.cache_dir.is_some() {
        return Ok(args.cache_dir.clone());
    }
    let file = FileConfig::load(&args.project_dir)?;
    Ok(file
        .and_then(|file| file.cache_dir)
        .map(|dir| args.project_dir.join(dir)))
}

fn handle_cache(action: &CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats(args) => {
            let root = cache_root_override(args)?;
            let cache = CacheManager::open(root.as_deref(), &args.project_dir)
                .context("failed to open the cache")?;
            println!("{} {}", "cache".bold(), cache.path().display());
            println!("{:>10} {}", "entries", cache.len());
            let persistent = cache.entries().filter(|entry| entry.persistent).count();
            println!("{:>10} {}", "persisted", persistent);
            for entry in cache.entries() {
                let status = if entry.success {
                    "ok".green()
                } else {
                    "failed".red()
                };
                println!(
                    "  {} {} [{}] {} ms, {}",
                    &entry.cache_key[..entry.cache_key.len().min(8)],
                    entry.function,
                    status,
                    entry.execution_time_ms,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                );
            }
        }
        CacheAction::Clear(args) => {
            let root = cache_root_override(args)?;
            let mut cache = CacheManager::open(root.as_deref(), &args.project_dir)
                .context("failed to open the cache")?;
            let removed = cache.clear();
            cache.persist()?;
            println!("{} {removed} entries", "cleared".green().bold());
        }
    }
    Ok(())
}
