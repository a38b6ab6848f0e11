//! Grading CLI: drives one batch run against a configured scoring service.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use grading::config::GradingConfig;
use grading::graph::build_grading_graph;
use grading::persistence::{InMemoryFileStorage, InMemoryGradingStore};
use grading::progress::NoopProgressSink;
use grading::scoring_service::{FakeScoringService, ReqwestScoringService, ScoringService};
use grading::stages::StageContext;
use grading::state::{BatchGradingState, GradingInputs};

#[derive(Parser)]
#[command(name = "grading")]
#[command(about = "Batched AI grading orchestrator", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one grading batch to completion (or until the first interrupt).
    Run {
        /// Batch identifier.
        #[arg(long)]
        batch_id: String,
        /// Rubric page image URLs.
        #[arg(long, value_delimiter = ',')]
        rubric_images: Vec<String>,
        /// Student answer page image URLs.
        #[arg(long, value_delimiter = ',')]
        answer_images: Vec<String>,
        /// Path to a YAML config file; falls back to `GradingConfig::default()`.
        #[arg(long)]
        config: Option<String>,
        /// Base URL of the scoring service. Omit to run against an
        /// in-memory fake (useful for dry runs and demos).
        #[arg(long)]
        scoring_service_url: Option<String>,
    },
    /// Print the default configuration as YAML.
    PrintConfig,
}

fn load_config(path: Option<&str>) -> Result<GradingConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(GradingConfig::from_yaml(&text)?)
        }
        None => Ok(GradingConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::PrintConfig => {
            let yaml = serde_yaml::to_string(&GradingConfig::default())?;
            println!("{yaml}");
        }
        Commands::Run {
            batch_id,
            rubric_images,
            answer_images,
            config,
            scoring_service_url,
        } => {
            let config = load_config(config.as_deref())?;
            let scoring_service: Arc<dyn ScoringService> = match scoring_service_url {
                Some(url) => Arc::new(ReqwestScoringService::new(url)),
                None => {
                    tracing::warn!("no --scoring-service-url given, grading against an in-memory fake");
                    Arc::new(FakeScoringService::default())
                }
            };

            let ctx = StageContext {
                config: Arc::new(config),
                scoring_service,
                progress: Arc::new(NoopProgressSink),
                store: Arc::new(InMemoryGradingStore::default()),
                files: Arc::new(InMemoryFileStorage::default()),
            };

            let graph = build_grading_graph(ctx, Arc::new(|| chrono::Utc::now().to_rfc3339()))?;

            let inputs = GradingInputs {
                rubric_images,
                answer_images,
                ..Default::default()
            };
            let state = BatchGradingState::new(batch_id, inputs);

            match graph.invoke(state.to_value()?).await {
                Ok(final_value) => {
                    let final_state = BatchGradingState::from_value(&final_value)?;
                    tracing::info!(stage = %final_state.current_stage, students = final_state.student_results.len(), "batch finished");
                    println!("{}", serde_json::to_string_pretty(&final_state)?);
                }
                Err(err) => {
                    tracing::error!(error = %err, "batch run did not complete");
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}
