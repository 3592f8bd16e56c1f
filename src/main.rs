use clap::{Parser, Subcommand};
use pubsub_archive::cli::producer::ProducerOptions;
use pubsub_archive::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pubsub")]
#[command(about = "Event bus with a buffered, partitioned object-storage archive", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Send synthetic events to a running bus
    PutEvents {
        #[arg(long, default_value = "http://127.0.0.1:7200")]
        endpoint: String,

        #[arg(long, default_value_t = 2000)]
        count: usize,

        #[arg(long, default_value_t = 10)]
        batch_size: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pubsub_archive=info,pubsub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            let config_path = resolve_config_path(cli.config.as_deref());
            pubsub_archive::cli::run::run(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                pubsub_archive::cli::config::init(stdout)?;
            }
        },
        Some(Commands::PutEvents {
            endpoint,
            count,
            batch_size,
        }) => {
            pubsub_archive::cli::producer::put_events(&ProducerOptions {
                endpoint,
                count,
                batch_size,
            })
            .await?;
        }
    }

    Ok(())
}
