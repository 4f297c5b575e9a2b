use clap::{Parser, Subcommand};
use dpe_stream_app::{config::AppConfig, master, submit, worker, Error};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dpe-stream")]
#[command(version)]
#[command(about = "Runs user defined processing chains over partitioned streams.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the job API
    Master,

    /// Consume the partition assigned through DPE_STREAM_WORKER_JOB
    Worker,

    /// Submit a job definition file to the master
    Submit {
        /// Account owning the job
        #[arg(short, long)]
        account: String,

        /// Job definition (YAML, JSON or TOML)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Stop a running job
    Stop {
        #[arg(short, long)]
        account: String,

        #[arg(short, long)]
        job: String,
    },
}

#[tokio::main]
async fn main() {
    // Install global log collector.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    run(cli).await.unwrap_or_else(|err| {
        error!("{:?}", err);
        process::exit(1);
    });
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = AppConfig::load()?;
    match cli.command {
        Commands::Master => master::run(config).await?,
        Commands::Worker => worker::run(config).await?,
        Commands::Submit { account, file } => {
            let job_id = submit::submit(&config, &account, &file).await?;
            info!("Submitted job {}", job_id);
            println!("{job_id}");
        }
        Commands::Stop { account, job } => submit::stop(&config, &account, &job).await?,
    }
    Ok(())
}
