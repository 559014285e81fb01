//! Connects to an `echo_server`, sends one message (or, without `--message`,
//! every line read from stdin), and prints what comes back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdtp::{Client, ClientConfig, ClientHandler};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "echo_client", about = "Send a message to an echo_server and print the reply")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Message to send. If omitted, every line read from stdin is sent instead.
    #[arg(long)]
    message: Option<String>,
}

struct PrintHandler;

#[async_trait]
impl ClientHandler for PrintHandler {
    async fn on_recv(&self, data: Vec<u8>) {
        match String::from_utf8(data) {
            Ok(text) => println!("< {text}"),
            Err(e) => println!("< <{} bytes, not valid utf-8>", e.into_bytes().len()),
        }
    }

    async fn on_disconnected(&self) {
        info!("server closed the connection");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = Client::with_handler(ClientConfig::default(), Arc::new(PrintHandler));
    client.connect(&cli.host, cli.port).await?;
    info!(host = %cli.host, port = cli.port, "connected");

    match cli.message {
        Some(message) => {
            client.send(message.as_bytes()).await?;
            // give the echo a moment to arrive before disconnecting.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                client.send(line.as_bytes()).await?;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
