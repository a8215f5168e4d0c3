//! CLI command definitions, routing, and tracing setup.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use wordflow_core::{
    Pipeline, ProcessLauncher, ProgressReporter, RunContext, RunReport, StageStatus, UnitOutcome,
    run_builtin_stage, scan_artifacts,
};
use wordflow_shared::{
    AppConfig, EXIT_OK, EXIT_WARNING, RunId, StageName, find_config, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// wordflow: Word → text → structured Q&A → per-department files.
#[derive(Parser)]
#[command(
    name = "wordflow",
    version,
    about = "Run the staged document pipeline with per-unit error artifacts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (overrides ./wordflow.toml and ~/.wordflow/wordflow.toml).
    #[arg(long, global = true, env = "WORDFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project root holding the data and log directories (defaults to the current directory).
    #[arg(long, global = true, env = "WORDFLOW_PROJECT_ROOT")]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run every stage in order.
    Run {
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run one built-in stage in this process.
    Stage {
        /// Stage to run: extract, structure, or split.
        #[arg(value_parser = parse_stage)]
        stage: StageName,

        /// Run id to write under (defaults to now).
        #[arg(long, value_parser = parse_run_id)]
        run_id: Option<RunId>,
    },

    /// List error artifacts left in the output areas.
    Check {
        /// Limit the final stage to one run folder.
        #[arg(long, value_parser = parse_run_id)]
        run_id: Option<RunId>,

        /// Print the artifacts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_stage(s: &str) -> std::result::Result<StageName, String> {
    s.parse().map_err(|e: wordflow_shared::WordflowError| e.to_string())
}

fn parse_run_id(s: &str) -> std::result::Result<RunId, String> {
    s.parse().map_err(|e: wordflow_shared::WordflowError| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Events go to stderr. Under `stage` the output is captured line by line into
/// a timestamped stage log, so the subscriber's own timestamps are dropped.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "wordflow=info",
        1 => "wordflow=debug",
        _ => "wordflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));
    let captured = matches!(cli.command, Command::Stage { .. });
    let ansi = std::io::stderr().is_terminal();

    match cli.log_format {
        LogFormat::Text => {
            let builder = fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(ansi)
                .with_writer(std::io::stderr);
            if captured {
                builder.without_time().init();
            } else {
                builder.init();
            }
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let root = project_root(cli.project_root.as_deref())?;
    let config_flag = cli.config.as_deref();
    match cli.command {
        Command::Run { json } => cmd_run(&root, config_flag, json).await,
        Command::Stage { stage, run_id } => cmd_stage(&root, config_flag, stage, run_id),
        Command::Check { run_id, json } => cmd_check(&root, config_flag, run_id.as_ref(), json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&root),
            ConfigAction::Show => cmd_config_show(&root, config_flag),
        },
    }
}

fn project_root(flag: Option<&Path>) -> Result<PathBuf> {
    let root = match flag {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().map_err(|e| eyre!("cannot determine working directory: {e}"))?,
    };
    std::path::absolute(&root).map_err(|e| eyre!("invalid project root {}: {e}", root.display()))
}

/// Load the config and remember which file it came from.
fn load(root: &Path, flag: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>)> {
    let path = find_config(flag, root)?
        .map(|p| std::path::absolute(&p).unwrap_or(p));
    let config = load_config(flag, root)?;
    Ok((config, path))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(root: &Path, config_flag: Option<&Path>, json: bool) -> Result<ExitCode> {
    let (config, config_path) = load(root, config_flag)?;
    let pipeline = Pipeline::new(root, config, config_path);
    let launcher = ProcessLauncher::current()?;

    info!(project_root = %root.display(), "starting pipeline run");
    let reporter = CliProgress::new();

    let report = match pipeline.run(&launcher, &reporter).await {
        Ok(report) => report,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            error!(error = %e, "run did not start");
            eprintln!("error: {e}");
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_summary(&report);
    }
    Ok(ExitCode::from(report.exit_code))
}

fn print_run_summary(report: &RunReport) {
    println!();
    println!("  Run {} finished with exit code {}", report.run_id, report.exit_code);
    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Completed => "completed",
            StageStatus::CompletedWithWarnings => "completed with warnings",
            StageStatus::Aborted => "aborted",
        };
        let moved = stage
            .handoff
            .as_ref()
            .map(|h| format!(", {} file(s) handed off", h.copied.len()))
            .unwrap_or_default();
        println!("  {:<10} code {:<3} {status}{moved}", stage.stage, stage.exit_code);
    }
    if let Some(step) = &report.aborted_at {
        println!("  Aborted at: {step}");
    }
    println!("  Log:  {}", report.aggregate_log.display());
    println!("  Time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn cmd_stage(
    root: &Path,
    config_flag: Option<&Path>,
    stage: StageName,
    run_id: Option<RunId>,
) -> Result<ExitCode> {
    let (config, config_path) = load(root, config_flag)?;
    let ctx = RunContext::new(run_id.unwrap_or_else(RunId::now), root, config, config_path);

    match run_builtin_stage(&ctx, stage) {
        Ok(report) => {
            println!(
                "{stage}: {} unit(s), {} succeeded, {} partial, {} failed, {} skipped element(s)",
                report.units.len(),
                report.count(UnitOutcome::Succeeded),
                report.count(UnitOutcome::Partial),
                report.count(UnitOutcome::Failed),
                report.element_error_count(),
            );
            Ok(ExitCode::from(EXIT_OK))
        }
        Err(e) => {
            error!(%stage, error = %e, "stage failed");
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

fn cmd_check(
    root: &Path,
    config_flag: Option<&Path>,
    run_id: Option<&RunId>,
    json: bool,
) -> Result<ExitCode> {
    let (config, _) = load(root, config_flag)?;
    let ctx = RunContext::new(RunId::now(), root, config, None);
    let found = scan_artifacts(&ctx, run_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else if found.is_empty() {
        println!("No error artifacts found.");
    } else {
        for entry in &found {
            let cause = entry
                .record
                .as_ref()
                .map(|r| r.cause().to_string())
                .unwrap_or_else(|| "(unreadable record)".to_string());
            println!("{:<10} {}  {cause}", entry.stage, entry.path.display());
        }
        println!();
        println!("{} error artifact(s).", found.len());
    }

    let code = if found.is_empty() { EXIT_OK } else { EXIT_WARNING };
    Ok(ExitCode::from(code))
}

fn cmd_config_init(root: &Path) -> Result<ExitCode> {
    let path = init_config(root)?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(root: &Path, config_flag: Option<&Path>) -> Result<ExitCode> {
    let (config, path) = load(root, config_flag)?;
    match &path {
        Some(p) => println!("# loaded from {}", p.display()),
        None => println!("# built-in defaults"),
    }
    println!("{}", toml::to_string_pretty(&config)?);
    for stage in StageName::ALL {
        let s = config.stage(stage);
        let tool = s
            .command
            .as_ref()
            .map(|c| c.join(" "))
            .unwrap_or_else(|| "built-in".to_string());
        println!("# {stage}: {} -> {} ({tool})", s.input_dir, s.output_dir);
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_started(&self, stage: StageName, index: usize, total: usize) {
        self.spinner.set_message(format!("[{index}/{total}] {stage}"));
    }

    fn stage_finished(&self, stage: StageName, code: i32) {
        if code != 0 {
            self.spinner.println(format!("  {stage} returned {code}"));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stage_with_run_id() {
        let cli = Cli::try_parse_from([
            "wordflow", "stage", "structure", "--run-id", "20240105093000",
        ])
        .unwrap();
        match cli.command {
            Command::Stage { stage, run_id } => {
                assert_eq!(stage, StageName::Structure);
                assert_eq!(run_id.unwrap().as_str(), "20240105093000");
            }
            _ => panic!("expected stage command"),
        }
    }

    #[test]
    fn rejects_unknown_stage_and_bad_run_id() {
        assert!(Cli::try_parse_from(["wordflow", "stage", "convert"]).is_err());
        assert!(Cli::try_parse_from(["wordflow", "check", "--run-id", "yesterday"]).is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "wordflow", "run", "--project-root", "/srv/docs", "-vv", "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.project_root.as_deref(), Some(Path::new("/srv/docs")));
        assert!(matches!(cli.command, Command::Run { json: true }));
    }

    #[test]
    fn project_root_is_made_absolute() {
        let root = project_root(Some(Path::new("data-root"))).unwrap();
        assert!(root.is_absolute());
        assert!(root.ends_with("data-root"));
    }
}
