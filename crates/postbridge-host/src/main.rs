//! Postbridge host - serves the chat service over TCP.
//!
//! `serve` runs the host side: every accepted connection gets its own host
//! endpoint, attached to one shared chat session. `ask` runs a view endpoint
//! that submits a single prompt and prints the finished reply.

mod ask;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use postbridge_chat::{ChatSession, EchoBackend, PromptKind, RecordingEditor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "postbridge-host")]
#[command(about = "Chat service host and client for postbridge")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chat service until interrupted
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Send one prompt to a running server and print the reply
    Ask {
        /// Port of the running server
        #[arg(short, long)]
        port: u16,

        /// Host of the running server
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Prompt kind: freeform, generate or edit
        #[arg(long, default_value = "freeform")]
        kind: PromptKind,

        /// Seconds to wait for the reply to finish
        #[arg(long, default_value = "60")]
        timeout_secs: u64,

        /// Prompt text
        #[arg(required = true)]
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for machine-readable output
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve { port, host } => {
            info!("Starting postbridge host");

            let session = Arc::new(ChatSession::new(
                Arc::new(EchoBackend::new()),
                Arc::new(RecordingEditor::new()),
            ));
            let _selection_watcher = session.spawn_selection_watcher();
            let addr = server::start_server(session, &host, port).await?;

            // Print port for the client to read (intentional stdout)
            println!("BRIDGE_PORT={}", addr.port());

            info!("Bridge host running on {}", addr);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
        }
        Command::Ask {
            port,
            host,
            kind,
            timeout_secs,
            prompt,
        } => {
            let prompt = prompt.join(" ");
            let reply =
                ask::ask(&host, port, kind, &prompt, Duration::from_secs(timeout_secs)).await?;
            println!("{}", reply);
        }
    }

    Ok(())
}
