//! A server that echoes every message it receives back to the sender.
//!
//! Run with `cargo run --bin echo_server -- --port 7878` and connect with
//! `echo_client`.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use cdtp::{ClientId, Server, ServerConfig, ServerHandler};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "echo_server", about = "Echo every message back to its sender")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 7878)]
    port: u16,

    #[arg(long, default_value_t = 16)]
    max_clients: usize,
}

struct EchoHandler {
    server: OnceLock<Server>,
}

impl EchoHandler {
    fn new() -> Self {
        Self { server: OnceLock::new() }
    }

    fn attach(&self, server: Server) {
        let _ = self.server.set(server);
    }
}

#[async_trait]
impl ServerHandler for EchoHandler {
    async fn on_connect(&self, id: ClientId) {
        info!(client_id = id, "client connected");
    }

    async fn on_recv(&self, id: ClientId, data: Vec<u8>) {
        info!(client_id = id, bytes = data.len(), "echoing message back");
        if let Some(server) = self.server.get() {
            if let Err(e) = server.send(id, &data).await {
                warn!(client_id = id, error = %e, "failed to echo message");
            }
        }
    }

    async fn on_disconnect(&self, id: ClientId) {
        info!(client_id = id, "client disconnected");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let handler = Arc::new(EchoHandler::new());
    let config = ServerConfig {
        max_clients: cli.max_clients,
        ..ServerConfig::default()
    };
    let server = Server::with_handler(config, handler.clone());
    handler.attach(server.clone());

    server.start(&cli.host, cli.port).await?;
    info!(host = %cli.host, port = server.port().unwrap_or(cli.port), "echo server listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await;

    Ok(())
}
