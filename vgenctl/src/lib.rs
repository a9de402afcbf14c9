use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use vgen_core::gateway::HttpGenerationGateway;
use vgen_core::job::HttpWebhookNotifier;
use vgen_core::{
    check_length_request, load_vgen_config, GatewayError, Job, JobError, JobFilter, JobStatus, JobSubmission,
    JobSummary, LengthBucketPlanner, LengthVariantRequest, PipelineError, Plan, Planner,
    SqliteJobStore, ValidationResult, Validator, VariantPipeline, VgenConfig,
};

pub mod server;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vgen_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("job store error: {0}")]
    Job(#[from] JobError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Variant generation pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the main vgen.toml
    #[arg(long, default_value = "configs/vgen.toml")]
    pub config: PathBuf,
    /// Override for the jobs database (replaces paths.data_dir/paths.jobs_db)
    #[arg(long)]
    pub jobs_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plans and validates a request without persisting anything
    Plan(PlanArgs),
    /// Shows the length-bucket plan for a piece of copy
    Buckets(BucketArgs),
    /// Inspects persisted jobs
    #[command(subcommand)]
    Job(JobCommands),
    /// Runs basic integrity checks
    Health,
    /// Starts the HTTP request boundary
    Serve(ServeArgs),
    /// Prints shell completions
    Completions(CompletionArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// JSON file holding a job submission
    #[arg(long)]
    pub request: PathBuf,
}

#[derive(Args, Debug)]
pub struct BucketArgs {
    /// Source copy to rewrite
    #[arg(long)]
    pub content: String,
    #[arg(long)]
    pub max_chars: Option<usize>,
    #[arg(long)]
    pub total: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Lists jobs, newest first
    List(JobListArgs),
    /// Shows one job with its results
    Show(JobShowArgs),
}

#[derive(Args, Debug)]
pub struct JobListArgs {
    /// Filter by status (queued, running, completed, failed)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct JobShowArgs {
    pub job_id: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "vgenctl", &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Plan(args) => {
            let report = context.plan(args)?;
            render(&report, cli.format)?;
        }
        Commands::Buckets(args) => {
            let report = context.buckets(args)?;
            render(&report, cli.format)?;
        }
        Commands::Job(JobCommands::List(args)) => {
            let jobs = context.job_list(args)?;
            render(&jobs, cli.format)?;
        }
        Commands::Job(JobCommands::Show(args)) => {
            let job = context.job_show(args)?;
            render(&job, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Serve(args) => context.serve(args)?,
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: Arc<VgenConfig>,
    config_path: PathBuf,
    jobs_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_vgen_config(&config_path)?;
        let jobs_db = cli
            .jobs_db
            .clone()
            .unwrap_or_else(|| config.jobs_db_path());
        Ok(Self {
            config: Arc::new(config),
            config_path,
            jobs_db,
        })
    }

    fn plan(&self, args: &PlanArgs) -> Result<PlanReport> {
        let raw = fs::read_to_string(&args.request)?;
        let submission: JobSubmission = serde_json::from_str(&raw)?;
        let (request, _, _) = submission.into_plan_request()?;
        let plan = Planner::new(Arc::clone(&self.config)).plan(&request);
        let validation = Validator::new(Arc::clone(&self.config)).validate(&plan);
        Ok(PlanReport { plan, validation })
    }

    fn buckets(&self, args: &BucketArgs) -> Result<PlanReport> {
        let request = LengthVariantRequest {
            content: args.content.clone(),
            max_chars: args.max_chars,
            seed: args.seed,
            total_variants: args.total,
        };
        check_length_request(&request)?;
        let plan = LengthBucketPlanner::new(Arc::clone(&self.config)).plan(&request);
        let validation = Validator::new(Arc::clone(&self.config)).validate(&plan);
        Ok(PlanReport { plan, validation })
    }

    fn job_list(&self, args: &JobListArgs) -> Result<JobList> {
        let status = match args.status.as_deref() {
            Some(raw) => Some(raw.parse::<JobStatus>().map_err(AppError::InvalidArgument)?),
            None => None,
        };
        let store = self.existing_store()?;
        let rows = store.list_jobs(&JobFilter {
            status,
            limit: Some(args.limit),
        })?;
        Ok(JobList { rows })
    }

    fn job_show(&self, args: &JobShowArgs) -> Result<JobDetail> {
        let store = self.existing_store()?;
        let job = store
            .load_job(&args.job_id)?
            .ok_or_else(|| AppError::MissingResource(format!("job {} not found", args.job_id)))?;
        Ok(JobDetail { job })
    }

    fn serve(&self, args: &ServeArgs) -> Result<()> {
        if let Some(parent) = self.jobs_db.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let store = SqliteJobStore::new(&self.jobs_db)?;
        store.initialize()?;
        let gateway = HttpGenerationGateway::from_config(&self.config.gateway)?;
        let notifier = HttpWebhookNotifier::from_config(&self.config.webhook);
        let pipeline = VariantPipeline::new(
            Arc::clone(&self.config),
            store,
            Arc::new(gateway),
            Arc::new(notifier),
        );

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let report = pipeline.recover().await?;
            info!(
                target: "vgenctl",
                resumed = report.resumed.len(),
                abandoned = report.abandoned.len(),
                "job store recovered"
            );
            server::serve(args.bind, Arc::new(pipeline)).await?;
            Ok::<(), AppError>(())
        })
    }

    fn existing_store(&self) -> Result<SqliteJobStore> {
        if !self.jobs_db.exists() {
            return Err(AppError::MissingResource(format!(
                "jobs database missing: {}",
                self.jobs_db.display()
            )));
        }
        Ok(SqliteJobStore::open_read_only(&self.jobs_db)?)
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![
            self.check_path("vgen.toml", &self.config_path),
            self.check_directory("data_dir", Path::new(&self.config.paths.data_dir)),
            self.check_database("jobs.sqlite", &self.jobs_db),
        ];
        results.push(match &self.config.gateway.endpoint {
            Some(endpoint) => match url::Url::parse(endpoint) {
                Ok(_) => HealthEntry::ok("gateway", endpoint.clone()),
                Err(err) => HealthEntry::error("gateway", format!("invalid endpoint: {err}")),
            },
            None => HealthEntry::warn("gateway", "gateway.endpoint not configured".to_string()),
        });
        if self.config.webhook.secret.is_none() {
            results.push(HealthEntry::warn(
                "webhook",
                "webhook.secret not set, notifications are unsigned".to_string(),
            ));
        }
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!("{path} not found", path = path.display()),
            ),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{path} not found", path = path.display()));
        }
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.eq_ignore_ascii_case("ok") => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub plan: Plan,
    pub validation: ValidationResult,
}

impl DisplayFallback for PlanReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Plan {} (seed {}, config {}): {} variants, cost {:.4} {}",
            self.plan.plan_id,
            self.plan.seed,
            self.plan.config_version,
            self.plan.len(),
            self.plan.cost.total,
            self.plan.cost.currency,
        )];
        for spec in &self.plan.variants {
            let angle = spec
                .param("angle")
                .or_else(|| spec.param("bucket"))
                .unwrap_or("-");
            lines.push(format!(
                "  - {}: {} chars, {} ({angle})",
                spec.key(),
                spec.constraints.max_length,
                spec.constraints.format,
            ));
        }
        if self.validation.valid {
            lines.push("Validation: ok".to_string());
        } else {
            lines.push("Validation issues:".to_string());
            for message in self.validation.messages() {
                lines.push(format!("  - {message}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub rows: Vec<JobSummary>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No jobs found".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "- {} [{}] plan {} | {}/{} ok, {} failed | updated {}",
                    row.job_id,
                    row.status,
                    row.plan_id,
                    row.succeeded,
                    row.variant_count,
                    row.failed,
                    row.updated_at.to_rfc3339(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
}

impl DisplayFallback for JobDetail {
    fn display(&self) -> String {
        let job = &self.job;
        let mut lines = vec![
            format!("Job {} [{}]", job.job_id, job.status),
            format!(
                "  plan {}, {} variants, created {}",
                job.plan.plan_id,
                job.plan.len(),
                job.created_at.to_rfc3339()
            ),
        ];
        if let Some(url) = &job.webhook_url {
            lines.push(format!("  webhook {url}"));
        }
        for result in &job.results {
            let line = match &result.outcome {
                vgen_core::VariantOutcome::Generated { content } => {
                    format!("  - {}: {}", result.key(), content)
                }
                vgen_core::VariantOutcome::Failed { reason } => {
                    format!("  - {}: FAILED ({reason})", result.key())
                }
            };
            lines.push(line);
        }
        let pending = job.plan.len().saturating_sub(job.results.len());
        if pending > 0 {
            lines.push(format!("  {pending} variants pending"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthEntry {
    fn ok(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            detail,
        }
    }

    fn warn(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            detail,
        }
    }

    fn error(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            detail,
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut counts: HashMap<CheckStatus, usize> = HashMap::new();
        let mut lines = Vec::with_capacity(self.len() + 1);
        for entry in self {
            *counts.entry(entry.status).or_default() += 1;
            let marker = match entry.status {
                CheckStatus::Ok => "OK",
                CheckStatus::Warn => "WARN",
                CheckStatus::Error => "ERROR",
            };
            lines.push(format!("[{marker}] {}: {}", entry.name, entry.detail));
        }
        lines.push(format!(
            "{} ok, {} warnings, {} errors",
            counts.get(&CheckStatus::Ok).copied().unwrap_or(0),
            counts.get(&CheckStatus::Warn).copied().unwrap_or(0),
            counts.get(&CheckStatus::Error).copied().unwrap_or(0),
        ));
        lines.join("\n")
    }
}
