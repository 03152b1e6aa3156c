//! Gateway service loop
//!
//! Reads one JSON command per line from stdin and writes one JSON state
//! change per line to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use spk_core::{Command, StateChange, ACTIONS_ROUTING_KEY, ALARMS_ROUTING_KEY};
use spk_gateway::{GatewayConfig, SpeakerDriver};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub async fn run(config: GatewayConfig, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
    let driver = SpeakerDriver::from_config(&config)
        .await
        .context("Failed to create speaker driver")?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<StateChange>();
    driver.set_publish(move |change| {
        let _ = out_tx.send(change);
    });

    // Stdout writer task
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(change) = out_rx.recv().await {
            let line = match serde_json::to_string(&change) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode {:?}: {}", change, e);
                    continue;
                }
            };
            debug!("{} {}", ALARMS_ROUTING_KEY, line);
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    driver.start().await.context("Failed to start speaker server")?;
    info!(
        "Consuming {} from {}, publishing {}",
        ACTIONS_ROUTING_KEY,
        config.queue_name(),
        ALARMS_ROUTING_KEY
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(&driver, &line).await,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("stdin read error: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    if let Err(e) = driver.stop().await {
        warn!("Speaker server did not stop cleanly: {}", e);
    }
    // dropping the driver drops the publisher and ends the writer
    drop(driver);
    let _ = writer.await;

    info!("Gateway stopped");
    Ok(())
}

async fn handle_line(driver: &SpeakerDriver, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let command = match parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring invalid command {:?}: {}", line, e);
            return;
        }
    };

    if let Err(e) = driver.handle_command(command).await {
        warn!("Command rejected: {}", e);
    }
}

fn parse_command(line: &str) -> Result<Command> {
    Ok(serde_json::from_str(line)?)
}
