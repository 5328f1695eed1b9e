use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod artifacts;
mod classifier;
mod codec;
mod config;
mod db;
mod decrypt;
mod error;
mod features;
mod marks;
mod models;
mod pipeline;
mod predict;
mod report;
mod scaler;
mod trend;

use artifacts::ArtifactStore;
use config::AppConfig;
use decrypt::DecryptClient;
use marks::{AcademicSummary, MarksModels};
use models::Timetable;

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Parser)]
#[command(name = "attendance-forecast")]
#[command(about = "Student attendance and marks forecasting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull attendance history for every student into the raw dataset CSV
    FetchAttendance {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Retrain the attendance model and publish a new artifact set
    Retrain {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Forecast a student's attendance over the upcoming timetable
    PredictAttendance {
        #[arg(long)]
        prn: i64,
        /// Read the timetable from a JSON file instead of the database
        #[arg(long)]
        timetable: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Fit the per-semester marks regressors from a CSV export
    RetrainMarks {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Predict a student's marks for the current semester
    PredictMarks {
        #[arg(long)]
        prn: i64,
    },
    /// Periodically refresh the dataset and retrain the attendance model
    Schedule {
        #[arg(long, default_value_t = 5)]
        interval_weeks: u32,
    },
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn fetch_attendance(config: &AppConfig, out: &Path) -> anyhow::Result<usize> {
    let pool = connect(config).await?;
    let client = DecryptClient::new(&config.decrypt_api_url)?;
    client.wake_up().await;

    let rows = db::fetch_all_attendance(&pool, &client).await?;
    artifacts::write_csv(out, &rows)?;
    Ok(rows.len())
}

async fn retrain(store: Arc<ArtifactStore>, csv: PathBuf) -> anyhow::Result<artifacts::Manifest> {
    let manifest = tokio::task::spawn_blocking(move || pipeline::retrain(&csv, &store))
        .await
        .context("retraining task panicked")??;
    Ok(manifest)
}

async fn refresh(config: &AppConfig, store: &Arc<ArtifactStore>) -> anyhow::Result<()> {
    let raw_path = config.raw_dataset_path();
    let rows = fetch_attendance(config, &raw_path).await?;
    info!(rows, path = %raw_path.display(), "attendance dataset refreshed");

    let manifest = retrain(Arc::clone(store), raw_path).await?;
    let live = store.reload()?;
    info!(run_id = %manifest.run_id, live = %live.run_id(), "scheduled retraining published");
    Ok(())
}

fn load_timetable(path: &Path, prn: i64) -> anyhow::Result<Timetable> {
    let timetable: Timetable = artifacts::read_json(path)?;
    if timetable.prn != prn {
        anyhow::bail!(
            "timetable in {} is for student {}, not {}",
            path.display(),
            timetable.prn,
            prn
        );
    }
    Ok(timetable)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();

    match cli.command {
        Commands::FetchAttendance { out } => {
            let out = out.unwrap_or_else(|| config.raw_dataset_path());
            let rows = fetch_attendance(&config, &out).await?;
            println!("Wrote {rows} attendance rows to {}.", out.display());
        }
        Commands::Retrain { csv } => {
            let csv = csv.unwrap_or_else(|| config.raw_dataset_path());
            let store = Arc::new(ArtifactStore::new(config.attendance_artifact_dir()));
            let manifest = retrain(store, csv).await?;
            println!(
                "Published run {} trained on {} rows (hold-out accuracy {}).",
                manifest.run_id,
                manifest.enriched_rows,
                manifest
                    .report
                    .ensemble_accuracy
                    .map(|a| format!("{:.1}%", a * 100.0))
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }
        Commands::PredictAttendance {
            prn,
            timetable,
            format,
        } => {
            let store = ArtifactStore::new(config.attendance_artifact_dir());
            let bundle = store.current().context("no usable attendance model")?;

            let timetable = match timetable {
                Some(path) => load_timetable(&path, prn)?,
                None => {
                    let pool = connect(&config).await?;
                    let client = DecryptClient::new(&config.decrypt_api_url)?;
                    client.wake_up().await;
                    db::fetch_latest_timetable(&pool, &client, prn).await?
                }
            };

            let forecast = predict::predict_attendance(&bundle, &timetable)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&forecast)?),
                OutputFormat::Markdown => print!("{}", report::build_report(&forecast)),
            }
        }
        Commands::RetrainMarks { csv } => {
            let summaries: Vec<AcademicSummary> = artifacts::read_csv(&csv)?;
            let models = marks::train_marks(&summaries)?;
            let path = config.marks_model_path();
            models.save(&path)?;
            println!(
                "Trained marks models for semesters {:?} into {}.",
                models.semesters.keys().collect::<Vec<_>>(),
                path.display()
            );
        }
        Commands::PredictMarks { prn } => {
            let models = MarksModels::load(&config.marks_model_path())
                .context("no trained marks models")?;
            let pool = connect(&config).await?;
            let client = DecryptClient::new(&config.decrypt_api_url)?;
            client.wake_up().await;

            let summary = db::fetch_academic_summary(&pool, &client, prn)
                .await?
                .with_context(|| format!("no academic summary for student {prn}"))?;
            let prediction = marks::predict_marks(&models, &summary)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Commands::Schedule { interval_weeks } => {
            let period = WEEK * interval_weeks.max(1);
            let store = Arc::new(ArtifactStore::new(config.attendance_artifact_dir()));
            match store.current() {
                Ok(bundle) => info!(interval_weeks, run_id = %bundle.run_id(), "scheduling attendance refresh"),
                Err(err) => info!(interval_weeks, reason = %err, "scheduling attendance refresh with no live model"),
            }

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(err) = refresh(&config, &store).await {
                    let live = store.live().map(|bundle| bundle.run_id().to_string());
                    error!(error = ?err, live = ?live, "scheduled refresh failed; the current model stays live");
                }
            }
        }
    }

    Ok(())
}
