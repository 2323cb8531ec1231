//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use subjectscan_core::{
    ContentStats, ExportFormat, KeywordSource, ProgressReporter, ScanOutcome, ScanRequest,
    ScanService,
};
use subjectscan_shared::{AppConfig, JobId, ScanJob, init_config, load_config, validate_credentials};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SubjectScan: find, score and track content about a subject.
#[derive(Parser)]
#[command(
    name = "subjectscan",
    version,
    about = "Discover content about a subject with self-improving search keywords.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Show the best learned keywords for a subject.
    Suggest {
        /// Subject name, e.g. "Jane Doe".
        subject: String,

        /// Number of keywords to show.
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Run a budget-bounded scan for a subject.
    Scan {
        /// Subject name, e.g. "Jane Doe".
        subject: String,

        /// Search keyword (repeatable).
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Use the subject's learned keywords instead of -k.
        #[arg(long, conflicts_with = "keywords")]
        suggested: bool,

        /// Timeframe such as "today", "7 days", "3 months" or "lifetime".
        #[arg(short, long)]
        timeframe: Option<String>,

        /// Maximum number of search API calls.
        #[arg(short, long)]
        budget: Option<u32>,
    },

    /// Show statistics for a subject's dataset.
    Stats {
        /// Subject name.
        subject: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export a subject's dataset.
    Export {
        /// Subject name.
        subject: String,

        /// Output format: csv, excel, or json.
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,
    },

    /// Show a scan job, or the most recent jobs.
    Status {
        /// Job ID (omit to list recent jobs).
        job_id: Option<JobId>,

        /// Number of recent jobs to list.
        #[arg(long, default_value = "10")]
        limit: usize,
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

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "subjectscan=info",
        1 => "subjectscan=debug",
        _ => "subjectscan=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
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
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Suggest { subject, count } => cmd_suggest(&subject, count).await,
        Command::Scan {
            subject,
            keywords,
            suggested,
            timeframe,
            budget,
        } => cmd_scan(subject, keywords, suggested, timeframe, budget).await,
        Command::Stats { subject, json } => cmd_stats(&subject, json).await,
        Command::Export { subject, format } => cmd_export(&subject, format).await,
        Command::Status { job_id, limit } => cmd_status(job_id, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn open_service() -> Result<ScanService> {
    let config = load_config()?;
    Ok(ScanService::open(&config).await?)
}

async fn cmd_suggest(subject: &str, count: Option<usize>) -> Result<()> {
    let service = open_service().await?;
    let keywords = service.suggest_keywords(subject, count).await?;

    println!();
    println!("  Suggested keywords for {subject}:");
    for (i, keyword) in keywords.iter().enumerate() {
        println!("  {:>2}. {keyword}", i + 1);
    }
    println!();
    Ok(())
}

async fn cmd_scan(
    subject: String,
    keywords: Vec<String>,
    suggested: bool,
    timeframe: Option<String>,
    budget: Option<u32>,
) -> Result<()> {
    // Validate credentials before touching the database
    let config = load_config()?;
    validate_credentials(&config)?;

    let keywords = if suggested {
        KeywordSource::Suggested
    } else if keywords.is_empty() {
        return Err(eyre!("pass at least one --keyword, or --suggested"));
    } else {
        KeywordSource::Explicit(keywords)
    };

    let service = ScanService::open(&config)
        .await?
        .connect_backends(&config)?;

    info!(subject = %subject, ?timeframe, ?budget, "starting scan");

    let reporter = CliProgress::new();
    let request = ScanRequest {
        subject: subject.clone(),
        keywords,
        timeframe,
        budget,
    };
    let report = service.run_scan(request, &reporter).await;
    reporter.spinner.finish_and_clear();
    let report = report?;
    let job = &report.job;

    println!();
    if report.end.is_aborted() {
        println!("  Scan stopped early: search quota exceeded.");
    } else {
        println!("  Scan finished.");
    }
    println!("  Job:        {}", job.id);
    println!("  Subject:    {subject}");
    println!(
        "  Timeframe:  {}",
        job.date_restrict.as_deref().unwrap_or("lifetime")
    );
    println!("  API calls:  {}/{}", job.api_calls, job.budget);
    println!("  New URLs:   {}", job.new_results);
    println!("  Added:      {}", job.inserted);

    if !report.top_domains.is_empty() {
        println!();
        println!("  Top domains:");
        for (domain, count) in &report.top_domains {
            println!("    {count:>4}  {domain}");
        }
    }

    if !report.keywords.is_empty() {
        println!();
        println!("  Learned keywords:");
        for record in report.keywords.iter().take(10) {
            println!("    {:>4}x  {}", record.occurrence, record.keyword);
        }
    }
    println!();

    Ok(())
}

async fn cmd_stats(subject: &str, json: bool) -> Result<()> {
    let service = open_service().await?;
    let stats = service.get_stats(subject).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!("No data for {subject}.");
        return Ok(());
    }
    print_stats(subject, &stats);
    Ok(())
}

fn print_stats(subject: &str, stats: &ContentStats) {
    println!();
    println!("  {subject}: {} items", stats.total);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("  Discovered: {oldest} .. {newest}");
    }
    println!(
        "  Confidence: {} high / {} medium / {} low",
        stats.confidence.high, stats.confidence.medium, stats.confidence.low
    );
    println!(
        "  Risk:       {} high / {} medium / {} low",
        stats.risk.high, stats.risk.medium, stats.risk.low
    );

    println!();
    println!("  Content types:");
    for (kind, count) in &stats.content_types {
        println!("    {count:>5}  {kind}");
    }

    println!();
    println!("  Top domains:");
    for (domain, count) in stats.top_domains(10) {
        println!("    {count:>5}  {domain}");
    }

    println!();
    println!("  Timeline:");
    for (month, count) in &stats.timeline {
        println!("    {month}  {count}");
    }
    println!();
}

async fn cmd_export(subject: &str, format: ExportFormat) -> Result<()> {
    let service = open_service().await?;

    match service.export_data(subject, format).await? {
        Some(file) => {
            println!("Exported {} items to {}", file.rows, file.path.display());
        }
        None => println!("No data to export for {subject}."),
    }
    Ok(())
}

async fn cmd_status(job_id: Option<JobId>, limit: usize) -> Result<()> {
    let service = open_service().await?;

    match job_id {
        Some(id) => {
            let job = service
                .job_status(&id)
                .await?
                .ok_or_else(|| eyre!("no scan job with id {id}"))?;
            print_job(&job);
        }
        None => {
            let jobs = service.recent_jobs(limit).await?;
            if jobs.is_empty() {
                println!("No scan jobs yet.");
            }
            for job in &jobs {
                println!(
                    "{}  {:<9}  {:<20}  {:>3} calls  {:>4} added",
                    job.id,
                    job.status.as_str(),
                    job.subject,
                    job.api_calls,
                    job.inserted
                );
            }
        }
    }
    Ok(())
}

fn print_job(job: &ScanJob) {
    println!();
    println!("  Job:        {}", job.id);
    println!("  Subject:    {}", job.subject);
    println!("  Status:     {}", job.status.as_str());
    println!("  Keywords:   {}", job.keywords.join(", "));
    println!("  API calls:  {}/{}", job.api_calls, job.budget);
    println!("  New URLs:   {}", job.new_results);
    println!("  Added:      {}", job.inserted);
    println!("  Started:    {}", job.started_at.to_rfc3339());
    if let Some(finished) = job.finished_at {
        println!("  Finished:   {}", finished.to_rfc3339());
    }
    if let Some(error) = &job.error {
        println!("  Error:      {error}");
    }
    println!();
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_started(&self, index: usize, total: usize, query: &str) {
        self.spinner
            .set_message(format!("Batch [{index}/{total}] {query}"));
    }

    fn page_fetched(&self, page: u32, new_urls: usize, api_calls: u32, budget: u32) {
        self.spinner.set_message(format!(
            "Page {page}: {new_urls} new URLs ({api_calls}/{budget} calls)"
        ));
    }

    fn done(&self, outcome: &ScanOutcome) {
        self.spinner.set_message(format!(
            "Search finished: {} new URLs",
            outcome.results.len()
        ));
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
