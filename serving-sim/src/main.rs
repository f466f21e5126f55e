use clap::{Parser, Subcommand};
use interfaces::{BlobStore, SqliteBlobStore};
use serving_sim::{log_codec, Sampling, SimulationConfig, Simulation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "serving-sim")]
#[command(about = "Simulated prediction service with a versioned model registry")]
struct Cli {
    /// SQLite database holding the log, registry and session state
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://serving_sim.db")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and serve requests for a while
    Run {
        /// Seconds to run; runs until Ctrl-C when omitted
        #[arg(short, long)]
        duration: Option<u64>,

        /// Target requests per second
        #[arg(short, long)]
        rate: Option<f64>,

        #[arg(long)]
        accelerated: Option<bool>,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Train a candidate model from a range of the log
    Train {
        #[arg(long)]
        start: u64,

        #[arg(long)]
        end: u64,

        /// `odd` or `all`
        #[arg(long, default_value = "odd")]
        sampling: Sampling,

        /// Commit the candidate and serve it
        #[arg(long)]
        commit: bool,
    },
    /// Inspect and manage committed models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Print interactions as CSV
    Log {
        #[arg(long, requires = "end")]
        start: Option<u64>,

        #[arg(long, requires = "start")]
        end: Option<u64>,

        /// Last N records when no range is given
        #[arg(long, default_value = "20")]
        recent: usize,
    },
    /// Print throughput, accuracy and latency series as JSON
    Metrics,
    /// Clear the log and session settings; models are kept
    Clear,
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    List,
    Delete { version: u32 },
    Load { version: u32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    info!("Opening {}", cli.database_url);

    let store = Arc::new(SqliteBlobStore::connect(&cli.database_url).await?);
    let mut config = SimulationConfig::default();
    if let Command::Run { seed, .. } = &cli.command {
        config.seed = *seed;
    }

    let simulation = Simulation::open(config, store.clone() as Arc<dyn BlobStore>).await?;
    let outcome = execute(&simulation, cli.command).await;

    simulation.shutdown().await;
    store.close().await;

    if let Err(e) = &outcome {
        error!("{}", e);
    }
    outcome
}

async fn execute(simulation: &Simulation, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run {
            duration,
            rate,
            accelerated,
            ..
        } => {
            if let Some(rate) = rate {
                simulation.set_target_rate(rate).await?;
            }
            if let Some(accelerated) = accelerated {
                simulation.set_accelerated(accelerated).await?;
            }

            simulation.start()?;
            info!(
                "Running with {:?} serving {}",
                simulation.scheduler().settings(),
                simulation.active_model().model_name()
            );

            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => tokio::signal::ctrl_c().await?,
            }
            simulation.stop()?;

            let stats = simulation.stats();
            info!(
                "Served {} requests ({} prediction failures, {} append failures)",
                stats.ticks_completed, stats.prediction_failures, stats.append_failures
            );
        }
        Command::Train {
            start,
            end,
            sampling,
            commit,
        } => {
            let candidate = simulation.train_range(start, end, sampling).await?;
            println!(
                "Candidate v{} trained on {} examples",
                candidate.version(),
                candidate.example_count()
            );
            if commit {
                let version = simulation.commit(candidate).await?;
                println!("Committed and serving v{}", version);
            }
        }
        Command::Models { action } => match action {
            ModelsAction::List => {
                let active = simulation.active_model().version();
                for model in simulation.list_models().await {
                    let marker = if active == Some(model.version) { "*" } else { " " };
                    let trained_at = model
                        .trained_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{} v{}  {}", marker, model.version, trained_at);
                }
            }
            ModelsAction::Delete { version } => {
                if simulation.delete_model(version).await? {
                    println!("Deleted v{}", version);
                } else {
                    warn!("Model v{} does not exist", version);
                }
            }
            ModelsAction::Load { version } => {
                simulation.load_model(version).await?;
                println!("Serving v{}", version);
            }
        },
        Command::Log { start, end, recent } => {
            let records = match (start, end) {
                (Some(start), Some(end)) => simulation.query(start, end).await,
                _ => simulation.recent(recent).await,
            };
            print!("{}", log_codec::encode(&records));
        }
        Command::Metrics => {
            let series = simulation.compute_metrics().await;
            println!("{}", serde_json::to_string_pretty(&series)?);
        }
        Command::Clear => {
            simulation.clear_all().await?;
            println!("Log and session settings cleared");
        }
    }

    Ok(())
}
