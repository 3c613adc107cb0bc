use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use top250_scraper::config::{FetchPolicy, Settings};
use top250_scraper::db::{self, SqliteStore};
use top250_scraper::export;
use top250_scraper::fetch::HttpFetcher;
use top250_scraper::pages;
use top250_scraper::pipeline::{Pipeline, PipelineOptions, RunSummary};

#[derive(Parser)]
#[command(name = "top250_scraper", about = "Bounded crawl of the movie Top 250 into SQLite")]
struct Cli {
    /// Settings file (default: top250.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one bounded crawl to completion
    Crawl(CrawlArgs),
    /// Show stored rows and the last run
    Stats,
    /// Write stored records to a CSV (or TSV) file
    Export {
        #[arg(short, long, default_value = "top250.csv")]
        output: PathBuf,
        /// Tab-separated instead of comma-separated
        #[arg(long)]
        tsv: bool,
        /// Max rows to export
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct CrawlArgs {
    /// Number of listing pages
    #[arg(short = 'n', long)]
    pages: Option<u32>,
    /// Entries per listing page
    #[arg(long)]
    page_size: Option<u32>,
    /// Records per bulk insert
    #[arg(short, long)]
    batch: Option<usize>,
    /// Concurrent page fetches
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long, value_enum)]
    on_fetch_error: Option<FetchPolicy>,
    /// Also crawl pagination links outside the static range
    #[arg(long)]
    follow_pagination: bool,
    /// Upper bound on pages crawled, including followed links
    #[arg(long)]
    max_pages: Option<u32>,
    #[arg(long)]
    base_url: Option<String>,
    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

impl CrawlArgs {
    fn apply(&self, s: &mut Settings) {
        if let Some(v) = self.pages {
            s.page_count = v;
        }
        if let Some(v) = self.page_size {
            s.page_size = v;
        }
        if let Some(v) = self.batch {
            s.batch_capacity = v;
        }
        if let Some(v) = self.concurrency {
            s.concurrency = v;
        }
        if let Some(v) = self.on_fetch_error {
            s.on_fetch_error = v;
        }
        if self.follow_pagination {
            s.follow_pagination = true;
        }
        if let Some(v) = self.max_pages {
            s.max_pages = Some(v);
        }
        if let Some(v) = &self.base_url {
            s.base_url = v.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Crawl(args) => {
            args.apply(&mut settings);
            crawl(&settings, args.quiet).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Movies:          {}", s.movies);
            println!("Missing rating:  {}", s.missing_rating);
            println!("Missing subject: {}", s.missing_subject);
            println!("Runs:            {}", s.runs);
            if let Some(last) = s.last_run {
                println!(
                    "Last run:        {} ({}, {}/{} written, {} pages failed)",
                    last.finished_at,
                    last.outcome,
                    last.records_written,
                    last.records_extracted,
                    last.pages_failed
                );
            }
            Ok(())
        }
        Commands::Export { output, tsv, limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let records = db::fetch_records(&conn, limit)?;
            if records.is_empty() {
                println!("No records stored. Run 'crawl' first.");
                return Ok(());
            }
            export::export_file(&output, &records, if tsv { '\t' } else { ',' })?;
            println!("Exported {} records to {}", records.len(), output.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn crawl(settings: &Settings, quiet: bool) -> anyhow::Result<()> {
    let options = PipelineOptions::try_from(settings)
        .with_context(|| format!("Invalid base_url {:?}", settings.base_url))?;
    let fetcher = HttpFetcher::new(settings)?;
    let store = SqliteStore::open(&settings.db_path)?;
    let requests = pages::produce(settings.page_count, settings.page_size)?;

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(requests.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );
        pb
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, flushing what was collected");
            on_signal.cancel();
        }
    });

    let started_at = chrono::Utc::now().to_rfc3339();
    println!(
        "Crawling {} pages of {} (batches of {})...",
        requests.len(),
        settings.page_size,
        settings.batch_capacity
    );
    let result = Pipeline::new(options, fetcher, store, settings.batch_capacity)
        .with_progress(pb)
        .run(requests, &cancel)
        .await;

    let (summary, outcome) = match &result {
        Ok(s) if s.cancelled => (s, "cancelled"),
        Ok(s) => (s, "ok"),
        Err(e) => (e.summary(), "failed"),
    };
    print_summary(summary);

    let conn = db::connect(&settings.db_path)?;
    db::record_run(&conn, &started_at, summary, outcome)?;

    result.map(|_| ()).map_err(Into::into)
}

fn print_summary(s: &RunSummary) {
    println!(
        "Pages: {} requested, {} fetched, {} failed",
        s.pages_requested, s.pages_fetched, s.pages_failed
    );
    println!(
        "Records: {} extracted, {} written in {} flushes",
        s.records_extracted, s.records_written, s.flushes
    );
    if s.links_uncovered > 0 {
        println!("Pagination links outside the crawl range: {}", s.links_uncovered);
    }
    if !s.is_complete() {
        println!(
            "WARNING: {} extracted records were not written ({} still buffered)",
            s.records_extracted.saturating_sub(s.records_written),
            s.records_unflushed
        );
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
