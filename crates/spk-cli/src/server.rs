//! Echo server standing in for a speaker server

use anyhow::Result;
use colored::Colorize;
use spk_transport::{TcpServer, TransportEvent, TransportReceiver, TransportSender, UdpTransport};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Run an echo server until shutdown
pub async fn run_echo_server(
    protocol: &str,
    bind: &str,
    port: u16,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    eprintln!(
        "{} Starting {} echo server on {}:{}",
        "SPK".cyan().bold(),
        protocol.green(),
        bind,
        port
    );

    match protocol {
        "tcp" => run_tcp_echo(bind, port, shutdown_rx).await,
        "udp" => run_udp_echo(bind, port, shutdown_rx).await,
        _ => {
            eprintln!(
                "{}",
                format!("Unknown protocol: {}. Use tcp or udp.", protocol).red()
            );
            Ok(())
        }
    }
}

async fn run_tcp_echo(bind: &str, port: u16, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let server = TcpServer::bind(&addr).await?;

    eprintln!("{} TCP echo server listening on {}", "OK".green().bold(), addr);
    eprintln!("  Press Ctrl+C to stop");

    loop {
        tokio::select! {
            result = server.accept() => {
                match result {
                    Ok((sender, mut receiver, peer)) => {
                        eprintln!("{} Client connected: {}", "TCP".cyan(), peer);
                        tokio::spawn(async move {
                            while let Some(event) = receiver.recv().await {
                                match event {
                                    TransportEvent::Data(data) => {
                                        info!("{} -> {:02X?}", peer, data.as_ref());
                                        if sender.send(data).await.is_err() {
                                            break;
                                        }
                                    }
                                    TransportEvent::Disconnected { .. } | TransportEvent::Error(_) => break,
                                }
                            }
                            debug!("{} disconnected", peer);
                        });
                    }
                    Err(e) => {
                        eprintln!("{} Accept error: {}", "ERROR".red(), e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    eprintln!("{}", "Server stopped".yellow());
    Ok(())
}

async fn run_udp_echo(bind: &str, port: u16, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let socket = UdpTransport::bind(&addr).await?;

    eprintln!("{} UDP echo server listening on {}", "OK".green().bold(), addr);
    eprintln!("  Press Ctrl+C to stop");

    loop {
        tokio::select! {
            result = socket.recv_from() => {
                match result {
                    Ok((data, from)) => {
                        info!("{} -> {:02X?}", from, data.as_ref());
                        if let Err(e) = socket.send_to(&data, from).await {
                            eprintln!("{} Reply to {} failed: {}", "ERROR".red(), from, e);
                        }
                    }
                    Err(e) => {
                        eprintln!("{} Receive error: {}", "ERROR".red(), e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    eprintln!("{}", "Server stopped".yellow());
    Ok(())
}
