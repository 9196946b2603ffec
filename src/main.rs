use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod db;
mod import;
mod models;
mod report;
mod summary;
mod trends;

use models::{AttendanceRecord, HierarchyLevel, ReportScope};
use trends::TrendWindow;

#[derive(Parser)]
#[command(name = "cell-trends")]
#[command(about = "Weekly cell attendance trends for the MVCP-BENIN network", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct WindowArgs {
    /// Rolling window in weeks, split into a recent and a previous half
    #[arg(long, default_value_t = trends::DEFAULT_WINDOW_WEEKS)]
    window_weeks: u32,
    /// Reference date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl WindowArgs {
    fn window(&self) -> anyhow::Result<TrendWindow> {
        let window = match self.as_of {
            Some(as_of) => TrendWindow::new(self.window_weeks, as_of)?,
            None => TrendWindow::ending_today(self.window_weeks)?,
        };
        Ok(window)
    }
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    district: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> ReportScope {
        ReportScope {
            region: self.region.clone(),
            group: self.group.clone(),
            district: self.district.clone(),
        }
    }
}

#[derive(Args)]
struct SourceArgs {
    /// Read reports from a CSV file instead of the database
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data ending today
    Seed,
    /// Import cell reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List regions, groups, districts and cells with their ids
    Hierarchy,
    /// Rename a region, group, district or cell by id
    Rename {
        #[arg(long, value_enum)]
        level: HierarchyLevel,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
    },
    /// Classify attendance trends per hierarchy level
    Trends {
        #[arg(long, value_enum, default_value_t = HierarchyLevel::Region)]
        level: HierarchyLevel,
        /// Compute one overall trend instead of one per level entry
        #[arg(long)]
        overall: bool,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Rank the struggling groups, districts and cells of one region
    DrillDown {
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Summarize attendance and program figures per hierarchy level
    Summary {
        #[arg(long, value_enum, default_value_t = HierarchyLevel::Region)]
        level: HierarchyLevel,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Headline figures, membership and weekly attendance/visits series
    Overview {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set (or pass --csv for read commands)")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_records(
    csv: Option<&Path>,
    scope: &ReportScope,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    match csv {
        Some(path) => {
            let loaded = import::load_csv(path)?;
            if loaded.skipped > 0 {
                warn!(skipped = loaded.skipped, path = %path.display(), "ignored invalid report rows");
            }
            Ok(loaded
                .into_records()
                .into_iter()
                .filter(|record| {
                    scope.matches(record) && record.occurred_on >= start && record.occurred_on <= end
                })
                .collect())
        }
        None => {
            let pool = connect().await?;
            db::fetch_records(&pool, scope, start, end).await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool, Utc::now().date_naive()).await?;
            println!("Seed data inserted ({inserted} reports).");
        }
        Commands::Import { csv } => {
            let loaded = import::load_csv(&csv)?;
            let skipped = loaded.skipped;
            let pool = connect().await?;
            let inserted = db::import_reports(&pool, &loaded.reports).await?;
            println!(
                "Inserted {inserted} reports from {} ({skipped} invalid rows skipped).",
                csv.display()
            );
        }
        Commands::Hierarchy => {
            let pool = connect().await?;
            let entities = db::list_hierarchy(&pool).await?;
            if entities.is_empty() {
                println!("No hierarchy recorded yet.");
                return Ok(());
            }
            for entity in entities.iter() {
                match &entity.parent {
                    Some(parent) => println!(
                        "- {} {} ({}) in {}",
                        entity.level, entity.name, entity.id, parent
                    ),
                    None => println!("- {} {} ({})", entity.level, entity.name, entity.id),
                }
            }
        }
        Commands::Rename { level, id, name } => {
            let pool = connect().await?;
            db::rename_entity(&pool, level, id, &name).await?;
            println!("Renamed {level} {id} to {}.", name.trim());
        }
        Commands::Trends {
            level,
            overall,
            json,
            scope,
            window,
            source,
        } => {
            let window = window.window()?;
            let records = load_records(
                source.csv.as_deref(),
                &scope.scope(),
                window.start_date(),
                window.as_of(),
            )
            .await?;
            let group_by = (!overall).then_some(level);
            let trends = trends::compute_trends(&records, &window, group_by);

            if json {
                println!("{}", serde_json::to_string_pretty(&trends)?);
                return Ok(());
            }
            if trends.is_empty() {
                println!("No reports found for this window.");
                return Ok(());
            }

            println!(
                "Attendance trends over {} weeks ending {}:",
                window.weeks(),
                window.as_of()
            );
            for (name, trend) in trends.iter() {
                println!(
                    "- {}: {} ({})",
                    name,
                    trend.classification,
                    report::trend_badge(Some(trend))
                );
            }
        }
        Commands::DrillDown {
            region,
            limit,
            window,
            source,
        } => {
            let window = window.window()?;
            let records = load_records(
                source.csv.as_deref(),
                &ReportScope::region(&region),
                window.start_date(),
                window.as_of(),
            )
            .await?;
            let mut drill = trends::drill_down(&records, &region, &window);
            drill.groups.truncate(limit);
            drill.districts.truncate(limit);
            drill.cells.truncate(limit);

            let mut output = String::new();
            report::write_drill_down(&mut output, &drill);
            print!("{output}");
        }
        Commands::Summary {
            level,
            since_days,
            scope,
            source,
        } => {
            let end = Utc::now().date_naive();
            let start = end - Duration::days(since_days.max(1));
            let records = load_records(source.csv.as_deref(), &scope.scope(), start, end).await?;
            let summaries = summary::summarize_by_level(&records, level);

            if summaries.is_empty() {
                println!("No reports found since {start}.");
                return Ok(());
            }

            println!("Attendance by {level} since {start}:");
            for summary in summaries.iter() {
                println!(
                    "- {}: {} reports, {} present (avg {:.1}), bible study {}, miracle hour {}, sunday service {}",
                    summary.name,
                    summary.report_count,
                    summary.total_present,
                    summary.avg_attendance,
                    summary.bible_study,
                    summary.miracle_hour,
                    summary.sunday_service
                );
            }
        }
        Commands::Overview {
            since_days,
            scope,
            source,
        } => {
            let end = Utc::now().date_naive();
            let start = end - Duration::days(since_days.max(1));
            let records = load_records(source.csv.as_deref(), &scope.scope(), start, end).await?;

            let mut output = String::new();
            report::write_overview(&mut output, &summary::overview(&records));
            output.push('\n');
            report::write_weekly(&mut output, &records);
            print!("{output}");

            let members = summary::members_by_region(&records);
            if !members.is_empty() {
                println!();
                println!("Registered members by region:");
                for entry in members.iter() {
                    let demographics = &entry.demographics;
                    println!(
                        "- {}: {} (men {}, women {}, children {})",
                        entry.region,
                        demographics.total(),
                        demographics.men,
                        demographics.women,
                        demographics.children
                    );
                }
            }
        }
        Commands::Report {
            out,
            scope,
            window,
            source,
        } => {
            let window = window.window()?;
            let scope = scope.scope();
            let records = load_records(
                source.csv.as_deref(),
                &scope,
                window.start_date(),
                window.as_of(),
            )
            .await?;
            let report = report::build_report(scope.label(), &window, &records);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
