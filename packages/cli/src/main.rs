//! `docpipe`: the document pipeline worker and its local tools.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use broker::SqsBroker;
use clap::{Parser, Subcommand};
use consumer::{ConsumerArgs, ConsumerMessage, JobRunner, start_consumer};
use docpipe_core::{JobEvent, PipelineConfig};
use storage::Storage;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use transform::{Transform, XmlToJson};

/// Convert XML documents referenced by queued jobs into JSON.
#[derive(Parser, Debug)]
#[command(name = "docpipe", version, about, arg_required_else_help = true)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "DOCPIPE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume jobs from the queue until interrupted.
    ///
    /// Reads SQS_QUEUE_URL, S3_INPUT_BUCKET_NAME and S3_OUTPUT_BUCKET_NAME
    /// from the environment and refuses to start without them.
    Run,

    /// Convert a local XML file to JSON.
    Convert {
        /// XML file to convert.
        input: PathBuf,

        /// Write JSON to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a sample `<logs>` document for load testing.
    Sample {
        /// Number of `<log>` records.
        #[arg(short, long, default_value_t = 20)]
        records: usize,

        #[arg(short, long, default_value = "test.xml")]
        output: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        let _ = builder.json().with_target(false).try_init();
    } else {
        let _ = builder.try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run => run().await,
        Command::Convert { input, output } => convert_file(&input, output.as_deref()),
        Command::Sample { records, output } => write_sample(records, &output),
    }
}

async fn run() -> Result<()> {
    let cfg = PipelineConfig::from_env().context("Invalid configuration")?;

    let storage = Storage::from_env([cfg.input_bucket.clone(), cfg.output_bucket.clone()])
        .context("Failed to open object storage")?;
    tracing::info!(
        "Using {} storage: input bucket {}, output bucket {}",
        storage.kind_str(),
        cfg.input_bucket,
        cfg.output_bucket
    );

    let broker = SqsBroker::from_env(&cfg.queue_url).await;
    tracing::info!("Consuming from {}", broker.queue_url());

    let runner = Arc::new(JobRunner::from_config(
        &cfg,
        Arc::new(storage),
        Arc::new(XmlToJson),
    ));
    let args = ConsumerArgs::new(Arc::new(broker), runner, cfg.consumer.clone());
    tokio::spawn(log_events(args.subscribe()));
    let (consumer, mut handle) = start_consumer(args)
        .await
        .context("Failed to start consumer")?;

    let stopped_early = tokio::select! {
        signal = shutdown_signal() => {
            signal.context("Failed to listen for shutdown signal")?;
            false
        }
        joined = &mut handle => {
            joined.context("Consumer task failed")?;
            true
        }
    };
    if stopped_early {
        anyhow::bail!("Consumer stopped unexpectedly");
    }

    tracing::info!("Shutdown requested, waiting for in-flight jobs");
    if consumer.send_message(ConsumerMessage::Shutdown).is_err() {
        tracing::warn!("Consumer already stopped");
    }
    handle.await.context("Consumer task failed")?;

    Ok(())
}

async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Log consumer events until the channel closes.
async fn log_events(mut events: broadcast::Receiver<JobEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                seen += 1;
                tracing::debug!("{}", event.description());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} consumer events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return seen,
        }
    }
}

fn convert_file(input: &Path, output: Option<&Path>) -> Result<()> {
    let xml =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let json = XmlToJson
        .convert(&xml)
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {} ({} bytes)", path.display(), json.len());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&json)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn write_sample(records: usize, output: &Path) -> Result<()> {
    let doc = transform::sample::log_document(records);
    std::fs::write(output, doc)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!("Wrote {} records to {}", records, output.display());
    Ok(())
}
