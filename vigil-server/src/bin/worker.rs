//! Isolated batch worker.
//!
//! Spawned once per batch by the process boundary. Reads one `BatchRequest`
//! JSON line from stdin, establishes only that batch's sessions, runs its
//! checks and streams `WorkerFrame`s as NDJSON on stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info};
use vigil_config::{ConfigLoad, ConfigLoader};
use vigil_model::{BatchRequest, WorkerFrame};
use vigil_server::infra::{
    startup::{build_batch_runner, http_client},
    telemetry::{LogTarget, WORKER_LOG_FILTER, init_tracing},
};

#[derive(Parser, Debug)]
#[command(name = "vigil-worker")]
#[command(about = "Runs one batch of checks inside its own process")]
struct WorkerCli {
    /// Same configuration file as the parent server
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = WorkerCli::parse();
    init_tracing(WORKER_LOG_FILTER, LogTarget::Stderr);

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config {
        loader = loader.with_config_path(path);
    }
    // The parent already reported configuration warnings.
    let ConfigLoad { config, .. } = loader.load().context("failed to load configuration")?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read batch request")?;
    let request: BatchRequest =
        serde_json::from_str(line.trim()).context("malformed batch request")?;
    info!(
        scan_id = %request.scan_id,
        batch = %request.batch.name,
        checks = request.batch.len(),
        "worker accepted batch"
    );

    let runner = build_batch_runner(&config, http_client()?);
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerFrame>();
    let run = tokio::spawn(async move { runner.run(&request, tx).await });

    let mut stdout = tokio::io::stdout();
    while let Some(frame) = rx.recv().await {
        let mut encoded = serde_json::to_vec(&frame).context("failed to encode frame")?;
        encoded.push(b'\n');
        stdout
            .write_all(&encoded)
            .await
            .context("coordinator closed the frame pipe")?;
        stdout.flush().await?;
    }

    let payload = run.await.context("batch task aborted")?;
    debug!(checks = payload.checks_executed, "worker finished");
    Ok(())
}
