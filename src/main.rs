//! fintrend command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fintrend::assistant::QueryAssistant;
use fintrend::config::{self, Settings};
use fintrend::models::CompanyScope;
use fintrend::pipeline::context::render_context;
use fintrend::pipeline::llm::build_client;
use fintrend::pipeline::sampler::sample;
use fintrend::pipeline::series::{check_snapshot, SnapshotHealth, SnapshotStore};
use fintrend::pipeline::{ExtractionPipeline, RunSummary};

#[derive(Parser)]
#[command(name = "fintrend")]
#[command(about = "Quarterly statement extraction and trend queries")]
#[command(version)]
struct Cli {
    /// Data directory (overrides FINTREND_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract new statements into the financial series
    Extract {
        /// Only this company symbol
        #[arg(short, long)]
        company: Option<String>,
        /// Re-extract documents already in the series
        #[arg(short, long)]
        force: bool,
    },

    /// Check that the persisted series is present and loadable
    Check,

    /// Show the rows the assistant would receive
    Sample {
        #[arg(short, long)]
        company: Option<String>,
        /// Row budget (defaults to FINTREND_MAX_CONTEXT_ROWS or 35)
        #[arg(short, long)]
        max_rows: Option<usize>,
        /// Print the sampled context as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about the financial series
    Ask {
        question: String,
        #[arg(short, long)]
        company: Option<String>,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    fintrend::init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    tracing::debug!(app = config::APP_NAME, version = config::APP_VERSION, data_dir = %settings.data_dir.display(), "Starting");

    match cli.command {
        Commands::Extract { company, force } => {
            let scope = resolve_scope(&settings, company.as_deref())?;
            let llm = build_client(&settings.llm)?;
            let pipeline = ExtractionPipeline::from_settings(&settings, llm);
            let summary = pipeline.run(&scope, force)?;
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let store = SnapshotStore::new(settings.snapshot_path(), settings.tolerance);
            let health = check_snapshot(&store, &settings.companies);
            print_health(&store, &health);
            Ok(if health.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Sample {
            company,
            max_rows,
            json,
        } => {
            let scope = resolve_scope(&settings, company.as_deref())?;
            let series = SnapshotStore::new(settings.snapshot_path(), settings.tolerance).load()?;
            let max_rows = max_rows.unwrap_or(settings.sampler.max_rows);
            let context = sample(&series, &scope, max_rows, &settings.sampler);
            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                println!("{}", render_context(&context));
                println!(
                    "\n{} of {} rows, strategy {}, ~{} tokens",
                    context.row_count,
                    context.total_rows,
                    context.strategy.as_str(),
                    context.token_estimate
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ask { question, company } => {
            let scope = resolve_scope(&settings, company.as_deref())?;
            let series = SnapshotStore::new(settings.snapshot_path(), settings.tolerance).load()?;
            let llm = build_client(&settings.llm)?;
            let assistant = QueryAssistant::new(llm, &settings.llm.model, settings.sampler);
            let answer = assistant.ask(&series, &scope, &question)?;
            println!("{}", answer.answer);
            eprintln!(
                "\n[{} of {} rows, {}]",
                answer.rows_used,
                answer.total_rows,
                answer.strategy.as_str()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_scope(settings: &Settings, company: Option<&str>) -> Result<CompanyScope, config::ConfigError> {
    if let Some(symbol) = company {
        settings.company(symbol)?;
    }
    Ok(CompanyScope::from_option(company))
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id);
    println!("  newly accepted:    {}", summary.newly_accepted);
    println!("  overwritten:       {}", summary.overwritten);
    println!("  rejected:          {}", summary.rejected);
    println!("  extraction failed: {}", summary.extraction_failed);
    println!("  already present:   {}", summary.skipped_existing);
    if summary.cancelled {
        println!("  run was cancelled before all documents were processed");
    }
    if !summary.failures.is_empty() {
        println!("\nFailures:");
        for f in &summary.failures {
            println!(
                "  {}/{} [{}] {}",
                f.company_symbol, f.file_identifier, f.kind, f.detail
            );
        }
    }
}

fn print_health(store: &SnapshotStore, health: &SnapshotHealth) {
    let path = store.path().display();
    match health {
        SnapshotHealth::Missing => println!("{path}: missing; run `fintrend extract` first"),
        SnapshotHealth::Empty => println!("{path}: no records"),
        SnapshotHealth::Invalid { reason } => println!("{path}: invalid: {reason}"),
        SnapshotHealth::Healthy(summary) => {
            println!("{path}: {} records", summary.records);
            for (symbol, count) in &summary.companies {
                println!("  {symbol}: {count}");
            }
            println!(
                "  reports from {} to {}",
                summary.first_report, summary.last_report
            );
            for warning in &summary.warnings {
                println!("  warning: {warning}");
            }
        }
    }
}
