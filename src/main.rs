//! sleet: command line entry point for the pipeline stages.
//!
//! Each stage subcommand performs one invocation and prints the stage response
//! as JSON on stdout. `setup` and `wire` provision what the stages rely on;
//! `plan` runs everything against the in-memory cloud and prints the calls.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sleet::cloud::aws::AwsCloud;
use sleet::cloud::memory::MemoryCloud;
use sleet::cloud::JobApi;
use sleet::config::Config;
use sleet::error::{
    CliError, ConfigSnafu, EventError, ReadEventSnafu, ResponseSnafu, SetupSnafu, WiringSnafu,
};
use sleet::signal::cancel_on_signal;
use sleet::stage::{
    self, Loader, LoaderApi, ObjectWrittenTrigger, ScheduleTrigger, StageEvent, StageResponse,
    Trigger,
};
use sleet::{setup, wiring};

/// Batch warehouse pipeline orchestration.
#[derive(Parser, Debug)]
#[command(name = "sleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "SLEET_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure the configured roles and the batch jobs.
    Setup,
    /// Connect the schedule and the bucket to the stage functions.
    Wire,
    /// Timer stage: start the transform job.
    Tick {
        /// Optional event payload file, `-` for stdin. Its content is ignored.
        #[arg(long)]
        event: Option<PathBuf>,
    },
    /// Object-written stage: start the split job for matching writes.
    ObjectWritten {
        /// Storage notification payload file, `-` for stdin.
        #[arg(long)]
        event: PathBuf,
    },
    /// Loader stage: provision the warehouse and load the curated data.
    Load,
    /// Run setup, wiring and every stage against an in-memory cloud and print the calls.
    Plan,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    if let Command::Plan = args.command {
        return plan(&config, shutdown).await;
    }

    let cloud = AwsCloud::load(&config.aws).await;
    match args.command {
        Command::Setup => {
            let entries = setup::setup(&cloud, &config).await.context(SetupSnafu)?;
            print_json(&entries)
        }
        Command::Wire => {
            let report = wiring::wire(&cloud, &config).await.context(WiringSnafu)?;
            print_json(&report)
        }
        Command::Tick { event } => {
            let trigger = ScheduleTrigger::from_config(&config);
            print_json(&respond(&trigger, &cloud, event.as_deref()).await)
        }
        Command::ObjectWritten { event } => {
            let trigger = ObjectWrittenTrigger::from_config(&config);
            print_json(&respond(&trigger, &cloud, Some(event.as_path())).await)
        }
        Command::Load => print_json(&load(&cloud, &config, shutdown).await),
        // Handled above, without touching the account.
        Command::Plan => Ok(()),
    }
}

/// Read the payload, if the stage uses one, and invoke the stage with it.
async fn respond<T, J>(trigger: &T, jobs: &J, event: Option<&Path>) -> StageResponse
where
    T: Trigger + ?Sized,
    J: JobApi + ?Sized,
{
    let payload = match event {
        Some(path) if trigger.reads_payload() => match read_event(path).await {
            Ok(payload) => payload,
            Err(e) => return StageResponse::from_error(trigger.name(), &e),
        },
        _ => String::new(),
    };
    stage::invoke_payload(trigger, jobs, &payload).await
}

async fn tick<J: JobApi + ?Sized>(jobs: &J, config: &Config, events: &[StageEvent]) -> StageResponse {
    stage::invoke(&ScheduleTrigger::from_config(config), jobs, events).await
}

async fn object_written<J: JobApi + ?Sized>(
    jobs: &J,
    config: &Config,
    events: &[StageEvent],
) -> StageResponse {
    stage::invoke(&ObjectWrittenTrigger::from_config(config), jobs, events).await
}

async fn load<C: LoaderApi + ?Sized>(cloud: &C, config: &Config, shutdown: CancellationToken) -> StageResponse {
    Loader::new(cloud, config, shutdown).invoke().await
}

/// Dry run of a clean account: setup, wiring, one tick, one matching write and one load.
async fn plan(config: &Config, shutdown: CancellationToken) -> Result<(), CliError> {
    info!("Planning against an in-memory cloud");
    let cloud = MemoryCloud::new();

    setup::setup(&cloud, config).await.context(SetupSnafu)?;
    wiring::wire(&cloud, config).await.context(WiringSnafu)?;
    let written = StageEvent::ObjectWritten {
        bucket: config.bucket.clone(),
        key: format!(
            "{}part-00000{}",
            config.prefixes.transformed, config.prefixes.transformed_suffix
        ),
    };
    let responses = [
        ("tick", tick(&cloud, config, &[StageEvent::TimerTick]).await),
        ("object_written", object_written(&cloud, config, &[written]).await),
        ("load", load(&cloud, config, shutdown).await),
    ];

    for call in cloud.calls() {
        println!("{call:?}");
    }
    for (name, response) in &responses {
        info!("{} would report {:?}", name, response.status);
    }
    print_json(&responses.map(|(_, response)| response))
}

async fn read_event(path: &Path) -> Result<String, EventError> {
    let mut payload = String::new();
    if path == Path::new("-") {
        tokio::io::stdin()
            .read_to_string(&mut payload)
            .await
            .context(ReadEventSnafu { path: "stdin" })?;
    } else {
        payload = tokio::fs::read_to_string(path).await.context(ReadEventSnafu {
            path: path.display().to_string(),
        })?;
    }
    Ok(payload)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).context(ResponseSnafu)?;
    println!("{json}");
    Ok(())
}
