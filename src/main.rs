use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use cadence::config::Config;
use cadence::core::{AgentId, TaskStatus};
use cadence::orchestration::{CommandRunner, Engine, RunReport, SchedulerEvent};
use cadence::state::{ExecutionRecord, Stores};
use cadence::workflow::{loader, PhaseStatus, RunId, RunStatus};
use cadence::{Error, Result};

/// Cadence - dependency-ordered multi-agent workflow runner
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CADENCE_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to <state_dir>/cadence.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.cadence/cadence.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a new run of a workflow file
    Run {
        /// Path to the workflow YAML
        workflow: PathBuf,
    },

    /// Continue an interrupted, cancelled or aborted run
    Resume {
        /// Run ID (full or short prefix)
        run_id: String,
    },

    /// Show phase and task status of a run
    Status {
        /// Run ID (full or short prefix)
        run_id: String,
    },

    /// List recorded attempts of a run
    History {
        /// Run ID (full or short prefix)
        run_id: String,

        /// Only show attempts of this agent
        #[arg(long, short = 'a')]
        agent: Option<String>,
    },

    /// Check a workflow file without running it
    Validate {
        /// Path to the workflow YAML
        workflow: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("\x1b[31merror:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.ensure_dirs()?;
    let state_dir = config.state_path()?;
    cadence::log::init_with_debug(cli.debug, Some(&state_dir.join("cadence.log")))?;
    tracing::info!(command = ?cli.command, state_dir = %state_dir.display(), "cadence starting");

    match cli.command {
        Command::Run { workflow } => run_workflow(config, &state_dir, &workflow),
        Command::Resume { run_id } => run_resume(config, &state_dir, &run_id),
        Command::Status { run_id } => run_status(config, &state_dir, &run_id),
        Command::History { run_id, agent } => {
            run_history(config, &state_dir, &run_id, agent.as_deref())
        }
        Command::Validate { workflow } => run_validate(&config, &workflow),
    }
}

fn build_engine(config: Config, state_dir: &Path) -> Result<Engine> {
    let runner = CommandRunner::new(&config.agent_command)?;
    if !runner.is_available() {
        tracing::warn!(program = runner.program(), "agent command not found on PATH");
    }
    Ok(Engine::new(config, Stores::file(state_dir), Arc::new(runner)))
}

/// Start a new run and print progress as it happens.
fn run_workflow(config: Config, state_dir: &Path, workflow: &Path) -> Result<ExitCode> {
    let (definition, _) = loader::load_path(workflow, &config)?;
    println!("Starting workflow: {}", definition.name);
    println!("State:             {}", state_dir.display());
    println!();

    let engine = build_engine(config, state_dir)?;
    let report = drive(engine, |engine| async move { engine.start(definition).await })?;
    print_report(&report);
    Ok(exit_code(report.status))
}

fn run_resume(config: Config, state_dir: &Path, run_id: &str) -> Result<ExitCode> {
    let rt = tokio::runtime::Runtime::new()?;
    let stores = Stores::file(state_dir);
    let run_id = rt.block_on(resolve_run_id(&stores, run_id))?;
    drop(rt);

    println!("Resuming run: {}", run_id.short());
    println!();
    let engine = build_engine(config, state_dir)?;
    let report = drive(engine, |engine| async move { engine.resume(run_id).await })?;
    print_report(&report);
    Ok(exit_code(report.status))
}

/// Run `start` on a runtime with Ctrl-C wired to the engine's token and
/// scheduler events printed as they arrive.
fn drive<F, Fut>(engine: Engine, start: F) -> Result<RunReport>
where
    F: FnOnce(Arc<Engine>) -> Fut,
    Fut: std::future::Future<Output = Result<RunReport>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(engine.with_events(tx));

        let cancel = engine.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling, waiting for in-flight agents...");
                tracing::warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
        let printer = tokio::spawn(print_events(rx));

        let result = start(Arc::clone(&engine)).await;
        // The printer ends once every sender is gone.
        drop(engine);
        let _ = printer.await;
        result
    })
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SchedulerEvent::PhaseStarted { phase } => println!("▶ phase {}", phase),
            SchedulerEvent::PhaseCompleted { phase } => {
                println!("\x1b[32m✓ phase {}\x1b[0m", phase)
            }
            SchedulerEvent::PhaseFailed { phase } => println!("\x1b[31m✗ phase {}\x1b[0m", phase),
            SchedulerEvent::TaskDispatched {
                agent_id, attempt, ..
            } => println!("  • {} (attempt {})", agent_id, attempt),
            SchedulerEvent::AttemptFailed {
                agent_id,
                attempt,
                kind,
                error,
            } => println!(
                "  \x1b[33m! {} attempt {} {}: {}\x1b[0m",
                agent_id,
                attempt,
                kind,
                truncate_string(&error, 60)
            ),
            SchedulerEvent::TaskSucceeded {
                agent_id, version, ..
            } => println!("  \x1b[32m✓ {}\x1b[0m (v{})", agent_id, version),
            SchedulerEvent::TaskExhausted {
                agent_id,
                classification,
                reason,
            } => println!(
                "  \x1b[31m✗ {} {}: {}\x1b[0m",
                agent_id,
                classification,
                truncate_string(&reason, 60)
            ),
            SchedulerEvent::TaskInterrupted { agent_id } => {
                println!("  \x1b[90m- {} interrupted\x1b[0m", agent_id)
            }
            SchedulerEvent::RunFinished { .. } => {}
        }
    }
}

fn run_status(config: Config, state_dir: &Path, run_id: &str) -> Result<ExitCode> {
    let engine = build_engine(config, state_dir)?;
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let run_id = resolve_run_id(engine.stores(), run_id).await?;
        engine.status(run_id).await
    })?;
    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

fn run_history(
    config: Config,
    state_dir: &Path,
    run_id: &str,
    agent: Option<&str>,
) -> Result<ExitCode> {
    let agent = agent.map(AgentId::new).transpose()?;
    let engine = build_engine(config, state_dir)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (run_id, records) = rt.block_on(async {
        let run_id = resolve_run_id(engine.stores(), run_id).await?;
        let records = engine.history(run_id, agent.as_ref()).await?;
        Ok::<_, Error>((run_id, records))
    })?;

    println!();
    println!("  Run: {} ({} attempts)", run_id.short(), records.len());
    println!();
    if records.is_empty() {
        println!("  No attempts recorded");
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "  {:<20} {:<12} {:>3}  {:<8} {:<18} {:>8}  {}",
        "AGENT", "PHASE", "#", "OUTCOME", "KIND", "TIME", "DETAIL"
    );
    for record in &records {
        println!("  {}", format_record(record));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate(config: &Config, workflow: &Path) -> Result<ExitCode> {
    let (definition, graph) = loader::load_path(workflow, config)?;
    println!();
    println!("\x1b[32m✓\x1b[0m {} is valid", workflow.display());
    println!();
    println!("  Workflow: {}", definition.name);
    if let Some(description) = &definition.description {
        println!("  About:    {}", description);
    }
    println!(
        "  Phases:   {}  Agents: {}  Edges: {}",
        graph.phase_count(),
        graph.task_count(),
        graph.dependency_count()
    );
    println!();
    for name in graph.topological_order()? {
        let Some(phase) = graph.phase(name) else {
            continue;
        };
        let agents: Vec<&str> = phase.tasks.iter().map(|t| t.agent_id.as_str()).collect();
        let mode = if phase.parallel { "parallel" } else { "sequential" };
        println!("  {} [{}]: {}", name, mode, agents.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

/// Parse a run ID from string, supporting both full UUIDs and short prefixes.
async fn resolve_run_id(stores: &Stores, id: &str) -> Result<RunId> {
    if let Ok(run_id) = id.parse::<RunId>() {
        return Ok(run_id);
    }

    let runs = stores.runs.list_runs().await?;
    let matches: Vec<RunId> = runs
        .iter()
        .map(|r| r.run_id)
        .filter(|run_id| run_id.to_string().starts_with(id))
        .collect();

    match matches.as_slice() {
        [run_id] => Ok(*run_id),
        [] => Err(Error::RunNotFound(id.to_string())),
        _ => Err(Error::RunNotFound(format!(
            "{} is ambiguous ({} runs match)",
            id,
            matches.len()
        ))),
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                        Run Summary                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Run ID:  {}", report.run_id);
    println!("  Status:  {}", format_status(report.status));
    println!();
    for (phase, status) in &report.phases {
        println!("  {:<24} {}", phase, format_phase(*status));
    }
    println!();
    for (agent_id, status) in &report.tasks {
        println!("    {:<22} {}", agent_id.as_str(), format_task(status));
    }

    if !report.warnings.is_empty() {
        println!();
        println!("⚠️  Warnings:");
        for warning in &report.warnings {
            println!("    • {}", warning);
        }
    }

    if matches!(report.status, RunStatus::Cancelled | RunStatus::Aborted) {
        println!();
        println!("Resume with: cadence resume {}", report.run_id.short());
    }
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Cancelled => ExitCode::from(130),
        RunStatus::Aborted | RunStatus::Running => ExitCode::FAILURE,
    }
}

/// Format run status with color codes for terminal.
fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => format!("\x1b[32m{}\x1b[0m", status), // Green
        RunStatus::Aborted => format!("\x1b[31m{}\x1b[0m", status),   // Red
        RunStatus::Running => format!("\x1b[33m{}\x1b[0m", status),   // Yellow
        RunStatus::Cancelled => format!("\x1b[90m{}\x1b[0m", status), // Gray
    }
}

fn format_phase(status: PhaseStatus) -> String {
    match status {
        PhaseStatus::Completed => format!("\x1b[32m{}\x1b[0m", status),
        PhaseStatus::FailedBlocking => format!("\x1b[31m{}\x1b[0m", status),
        PhaseStatus::Running | PhaseStatus::Ready => format!("\x1b[33m{}\x1b[0m", status),
        PhaseStatus::Pending => format!("\x1b[90m{}\x1b[0m", status),
    }
}

fn format_task(status: &TaskStatus) -> String {
    let text = truncate_string(&status.to_string(), 70);
    match status {
        TaskStatus::Succeeded { .. } => format!("\x1b[32m{}\x1b[0m", text),
        TaskStatus::RetriesExhausted { .. } if status.is_blocking_failure() => {
            format!("\x1b[31m{}\x1b[0m", text)
        }
        TaskStatus::RetriesExhausted { .. } | TaskStatus::Failed { .. } => {
            format!("\x1b[33m{}\x1b[0m", text)
        }
        TaskStatus::Pending | TaskStatus::Dispatched { .. } => text,
    }
}

fn format_record(record: &ExecutionRecord) -> String {
    let elapsed = record.finished_at - record.started_at;
    let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
    let kind = record
        .failure_kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".to_string());
    let detail = match (&record.artifact_version, &record.error_summary) {
        (Some(version), _) => format!("v{}", version),
        (None, Some(error)) => truncate_string(error, 40),
        (None, None) => String::new(),
    };
    format!(
        "{:<20} {:<12} {:>3}  {:<8} {:<18} {:>7.1}s  {}",
        truncate_string(record.agent_id.as_str(), 20),
        truncate_string(&record.phase, 12),
        record.attempt_number,
        record.outcome.to_string(),
        kind,
        seconds,
        detail
    )
}

/// Truncate a string to a maximum number of characters, adding "..." if truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
