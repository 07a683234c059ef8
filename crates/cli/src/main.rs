use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use drift_engine::{
    CancellationToken, DriftEngine, EngineConfig, IngestSource, VerifyOptions,
};
use drift_protocol::{FindingStatus, Fork, ReviewDecision, Severity};
use drift_reasoning::{HeuristicOracle, HttpOracle, ReasoningOracle};
use drift_report::Report;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// State lives here unless the config or flags say otherwise
const DEFAULT_STATE_DIR: &str = ".drift";

#[derive(Parser)]
#[command(name = "drift")]
#[command(about = "Detect drift between code behavior and its specification", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// TOML engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the index, calibration history and trace journal
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Units reasoned about at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Model endpoint; the rule-based oracle is used without one
    #[arg(long, global = true)]
    oracle_endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk and index specification documents for a fork
    Ingest(IngestArgs),

    /// Print the behavioral units extracted from a code path
    Analyze(AnalyzeArgs),

    /// Check a code path against the indexed specification
    Verify(VerifyArgs),

    /// Confirm or dismiss a finding of a saved report
    Review(ReviewArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// Repository or directory holding the documents
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Read documents at this git revision instead of the working tree
    #[arg(long = "ref")]
    git_ref: Option<String>,

    #[arg(long, default_value_t = Fork::default().to_string())]
    fork: String,
}

#[derive(Args)]
struct AnalyzeArgs {
    path: PathBuf,

    #[arg(long, default_value_t = Fork::default().to_string())]
    fork: String,
}

#[derive(Args)]
struct VerifyArgs {
    path: PathBuf,

    #[arg(long, default_value_t = Fork::default().to_string())]
    fork: String,

    /// Commit stamped into the report (defaults to HEAD of the code path)
    #[arg(long)]
    commit: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Exit with status 1 when an open finding reaches this severity
    #[arg(long, value_enum)]
    fail_on: Option<FailOn>,

    /// Also reason against these forks' text (comma-separated)
    #[arg(long, value_delimiter = ',')]
    widen: Vec<String>,
}

#[derive(Args)]
struct ReviewArgs {
    /// JSON report written by `drift verify`
    report: PathBuf,

    finding_id: String,

    #[arg(value_enum)]
    decision: Decision,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
    Summary,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FailOn {
    Info,
    Warning,
    Critical,
}

impl From<FailOn> for Severity {
    fn from(value: FailOn) -> Self {
        match value {
            FailOn::Info => Severity::Info,
            FailOn::Warning => Severity::Warning,
            FailOn::Critical => Severity::Critical,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Decision {
    Confirm,
    Dismiss,
}

impl From<Decision> for ReviewDecision {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Confirm => ReviewDecision::Confirm,
            Decision::Dismiss => ReviewDecision::Dismiss,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, config).await,
        Commands::Analyze(args) => run_analyze(args, config).await,
        Commands::Verify(args) => run_verify(args, config).await,
        Commands::Review(args) => run_review(args, config).await,
    }
}

/// Defaults, then the TOML file, then `DRIFT_*` variables, then flags.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut config = config.with_env();

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    if cli.state_dir.is_some() || config.store_path.is_none() {
        config.store_path = Some(state_dir.join("index.json"));
    }
    if cli.state_dir.is_some() || config.calibration_path.is_none() {
        config.calibration_path = Some(state_dir.join("calibration.json"));
    }
    if cli.state_dir.is_some() || config.journal_path.is_none() {
        config.journal_path = Some(state_dir.join("traces.jsonl"));
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(endpoint) = &cli.oracle_endpoint {
        config.oracle_endpoint = Some(endpoint.clone());
    }

    let config = config.normalized();
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

fn build_oracle(config: &EngineConfig) -> Result<Arc<dyn ReasoningOracle>> {
    let Some(endpoint) = &config.oracle_endpoint else {
        log::debug!("No oracle endpoint configured; using the rule-based oracle");
        return Ok(Arc::new(HeuristicOracle::new()));
    };
    let mut oracle = HttpOracle::new(endpoint)
        .with_context(|| format!("Invalid oracle endpoint {endpoint}"))?;
    if let Some(model) = &config.oracle_model {
        oracle = oracle.with_model(model);
    }
    if let Ok(key) = std::env::var("DRIFT_ORACLE_API_KEY") {
        if !key.trim().is_empty() {
            oracle = oracle.with_api_key(key.trim());
        }
    }
    Ok(Arc::new(oracle))
}

async fn open_engine(config: EngineConfig) -> Result<DriftEngine> {
    let oracle = build_oracle(&config)?;
    DriftEngine::open(config, oracle)
        .await
        .context("Failed to open drift state")
}

async fn run_ingest(args: IngestArgs, config: EngineConfig) -> Result<ExitCode> {
    let engine = open_engine(config).await?;
    let source = IngestSource {
        repo: args.repo,
        git_ref: args.git_ref,
        fork: Fork::new(&args.fork),
    };
    let outcome = engine
        .ingest(&source)
        .await
        .with_context(|| format!("Failed to ingest {}", source.repo.display()))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.conflicts.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        for conflict in &outcome.conflicts {
            log::error!(
                "{}: chunk {} collides with different indexed content; document not ingested",
                conflict.document_id,
                conflict.chunk_id
            );
        }
        Ok(ExitCode::from(2))
    }
}

async fn run_analyze(args: AnalyzeArgs, config: EngineConfig) -> Result<ExitCode> {
    let engine = open_engine(config).await?;
    let analysis = engine
        .analyze(&args.path, &Fork::new(&args.fork))
        .await
        .with_context(|| format!("Failed to analyze {}", args.path.display()))?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_verify(args: VerifyArgs, mut config: EngineConfig) -> Result<ExitCode> {
    if !args.widen.is_empty() {
        config.widen_forks = args
            .widen
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(Fork::new)
            .collect();
    }
    let engine = open_engine(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; finishing in-flight units");
            on_signal.cancel();
        }
    });

    let fork = Fork::new(&args.fork);
    let options = VerifyOptions {
        commit: args.commit,
        generated_at: None,
    };
    let result = engine
        .verify_with_cancel(&args.path, &fork, options, &cancel)
        .await;
    signal.abort();
    let report = result.with_context(|| {
        format!("Failed to verify {} against fork {fork}", args.path.display())
    })?;

    if let Some(path) = &args.output {
        write_report(path, &report)?;
    }
    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Markdown => print!("{}", report.to_markdown()),
        OutputFormat::Summary => println!("{}", report.summary_line()),
    }

    if let Some(threshold) = args.fail_on {
        let threshold = Severity::from(threshold);
        let failing = report
            .findings
            .iter()
            .filter(|f| f.status() == FindingStatus::Open && f.severity >= threshold)
            .count();
        if failing > 0 {
            log::warn!("{failing} open findings at or above {threshold}");
            return Ok(ExitCode::from(1));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_review(args: ReviewArgs, config: EngineConfig) -> Result<ExitCode> {
    let data = fs::read_to_string(&args.report)
        .with_context(|| format!("Failed to read report {}", args.report.display()))?;
    let mut report = Report::from_json(&data)
        .with_context(|| format!("Failed to parse report {}", args.report.display()))?;

    let engine = open_engine(config).await?;
    let decision = ReviewDecision::from(args.decision);
    let status = engine
        .review(&mut report, &args.finding_id, decision)
        .await
        .with_context(|| format!("Failed to {decision} finding {}", args.finding_id))?;
    write_report(&args.report, &report)?;

    let response = serde_json::json!({
        "finding_id": args.finding_id,
        "decision": decision,
        "status": status,
    });
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(ExitCode::SUCCESS)
}

fn write_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, report.to_json()?)
        .with_context(|| format!("Failed to write report {}", path.display()))
}
