use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use visa_tracker::{compare, extract, fetch, persist, store};

const DEBUG_HTML_FILE: &str = "debug_page.html";

#[derive(Parser)]
#[command(
    name = "visa_tracker",
    about = "US visa bulletin tracker: fetch, extract, diff, and record monthly cutoff movement"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: fetch the current bulletin, compare against the previous run, store both
    Run {
        /// SQLite database path
        #[arg(long, default_value = store::DEFAULT_DB_PATH)]
        db: String,
        /// Output JSON file for the extracted bulletin
        #[arg(short = 'o', long, default_value = persist::DEFAULT_OUTPUT_FILE)]
        output: PathBuf,
        /// Dump raw HTML for inspection when nothing extracts
        #[arg(long)]
        debug: bool,
    },
    /// Fetch and extract only, saving the bulletin as JSON
    Fetch {
        /// Output JSON file path
        #[arg(short = 'o', long, default_value = persist::DEFAULT_OUTPUT_FILE)]
        output: PathBuf,
        /// Save under a timestamped filename in data/ instead
        #[arg(short = 't', long)]
        timestamp: bool,
        /// Print the extracted data summary after saving
        #[arg(long)]
        display: bool,
        /// Dump raw HTML for inspection when nothing extracts
        #[arg(long)]
        debug: bool,
    },
    /// Compare two saved bulletin JSON files
    Compare {
        /// Current (newer) bulletin JSON file
        current: PathBuf,
        /// Previous (older) bulletin JSON file
        previous: PathBuf,
    },
    /// List recorded runs
    History {
        #[arg(long, default_value = store::DEFAULT_DB_PATH)]
        db: String,
        /// Filter by run type (official, test, benchmark, manual)
        #[arg(long)]
        run_type: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Only show successful runs
        #[arg(long)]
        success_only: bool,
    },
    /// Run and comparison counts
    Stats {
        #[arg(long, default_value = store::DEFAULT_DB_PATH)]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { db, output, debug } => run_pipeline(&db, &output, debug).await,
        Commands::Fetch {
            output,
            timestamp,
            display,
            debug,
        } => fetch_only(&output, timestamp, display, debug).await,
        Commands::Compare { current, previous } => compare_files(&current, &previous),
        Commands::History {
            db,
            run_type,
            limit,
            success_only,
        } => show_history(&db, run_type.as_deref(), limit, success_only),
        Commands::Stats { db } => show_stats(&db),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn dump_debug_html(raw_html: &str) -> Result<()> {
    fs::write(DEBUG_HTML_FILE, raw_html)?;
    info!("Raw HTML saved to {} for inspection", DEBUG_HTML_FILE);
    Ok(())
}

async fn run_pipeline(db: &str, output: &Path, debug: bool) -> Result<()> {
    let conn = store::connect(db)?;
    store::init_schema(&conn)?;

    // Capture the previous official run BEFORE recording the new one, so the
    // comparison is against the truly prior bulletin.
    let previous_run = store::last_successful_run(&conn, "official", None)?;
    match &previous_run {
        Some(run) => info!(
            "Previous official run: {} ({})",
            run.id,
            run.bulletin_date.as_deref().unwrap_or("unknown date")
        ),
        None => info!("No previous official run found; this will be the first."),
    }

    let started_at = now_iso();
    let (url, raw_html) = match fetch::fetch_current_bulletin().await {
        Ok(fetched) => fetched,
        Err(e) => {
            let completed_at = now_iso();
            store::insert_run(
                &conn,
                &store::NewRun {
                    run_type: "official",
                    started_at: &started_at,
                    completed_at: Some(&completed_at),
                    success: false,
                    bulletin_date: None,
                    source_url: None,
                    data: None,
                    error_message: Some(&e.to_string()),
                },
            )?;
            return Err(e);
        }
    };

    let bulletin = extract::extract(&raw_html);
    if bulletin.categories.is_empty() {
        warn!("Zero categories extracted; possible parsing regression");
        if debug {
            dump_debug_html(&raw_html)?;
        }
    }

    let completed_at = now_iso();
    let run_id = store::insert_run(
        &conn,
        &store::NewRun {
            run_type: "official",
            started_at: &started_at,
            completed_at: Some(&completed_at),
            success: true,
            bulletin_date: Some(&bulletin.bulletin_date),
            source_url: Some(&url),
            data: Some(&bulletin),
            error_message: None,
        },
    )?;
    persist::save_json(&bulletin, output)?;

    match previous_run {
        Some(run) => {
            let Some(previous_data) = run.data else {
                println!("Previous run carries no bulletin data; skipping comparison.");
                return Ok(());
            };
            let diff = compare::compare(&bulletin, &previous_data);
            println!("{}", compare::render_comparison(&diff));
            if diff.has_changes {
                let codes: Vec<String> =
                    compare::changed_subscription_codes(&diff).into_iter().collect();
                info!("Subscription categories touched: {}", codes.join(", "));
            }
            store::insert_comparison(&conn, run_id, run.id, &diff)?;
        }
        None => {
            let first = compare::empty_comparison(&bulletin);
            info!(
                "First recorded bulletin: {}",
                first.current_run_bulletin_date.as_deref().unwrap_or("unknown")
            );
            println!("No previous run to compare against; skipping comparison.");
        }
    }

    Ok(())
}

async fn fetch_only(output: &Path, timestamp: bool, display: bool, debug: bool) -> Result<()> {
    let (url, raw_html) = fetch::fetch_current_bulletin().await?;
    let bulletin = extract::extract(&raw_html);
    if bulletin.categories.is_empty() {
        warn!("Zero categories extracted; possible parsing regression");
        if debug {
            dump_debug_html(&raw_html)?;
        }
    }

    let saved_path = if timestamp {
        persist::save_with_timestamp(&bulletin, Path::new("data"))?
    } else {
        persist::save_json(&bulletin, output)?;
        output.to_path_buf()
    };
    info!("Source: {}", url);
    info!("Saved to: {}", saved_path.display());

    if display {
        let loaded = persist::load_json(&saved_path)?;
        println!("{}", persist::format_bulletin(&loaded, 10));
    }

    Ok(())
}

fn compare_files(current: &Path, previous: &Path) -> Result<()> {
    let current_value: serde_json::Value = serde_json::from_str(&fs::read_to_string(current)?)?;
    let previous_value: serde_json::Value = serde_json::from_str(&fs::read_to_string(previous)?)?;

    let diff = compare::compare_json(&current_value, &previous_value);
    println!("{}", compare::render_comparison(&diff));

    if let Some(error) = diff.error {
        bail!("Comparison failed: {}", error);
    }
    Ok(())
}

fn show_history(db: &str, run_type: Option<&str>, limit: usize, success_only: bool) -> Result<()> {
    let conn = store::connect(db)?;
    store::init_schema(&conn)?;
    let runs = store::list_runs(&conn, run_type, limit, success_only)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:>17} | {:<9} | {:<19} | {:<4} | {:<14} | {:>4}",
        "id", "type", "started", "ok", "bulletin", "cats"
    );
    println!("{}", "-".repeat(80));
    for run in &runs {
        println!(
            "{:>17} | {:<9} | {:<19} | {:<4} | {:<14} | {:>4}",
            run.id,
            run.run_type,
            truncate(&run.started_at, 19),
            if run.success { "yes" } else { "no" },
            truncate(run.bulletin_date.as_deref().unwrap_or("-"), 14),
            run.categories_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into()),
        );
    }
    println!("\n{} run(s)", runs.len());
    Ok(())
}

fn show_stats(db: &str) -> Result<()> {
    let conn = store::connect(db)?;
    store::init_schema(&conn)?;
    let stats = store::get_stats(&conn)?;
    println!("Runs:           {}", stats.total_runs);
    println!("  Successful:   {}", stats.successful_runs);
    println!("  Failed:       {}", stats.failed_runs);
    println!("Comparisons:    {}", stats.comparisons);
    println!("  With changes: {}", stats.comparisons_with_changes);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
