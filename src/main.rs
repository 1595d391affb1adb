//! Entry point for `quic-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing).

use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use quic_over_udp::config::{ClientConfig, ServerConfig};
use quic_over_udp::{client, server};

/// Multiplexed byte streams over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve one dummy file per requested stream to a single client.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:12345")]
        bind: SocketAddr,
        /// Bytes served on each stream.
        #[arg(long, default_value_t = 2 * 1024 * 1024)]
        file_size: usize,
        /// Smallest frame payload in bytes.
        #[arg(long, default_value_t = 1000)]
        min_frame: usize,
        /// Largest frame payload in bytes.
        #[arg(long, default_value_t = 2000)]
        max_frame: usize,
    },
    /// Connect to a server and receive a number of streams.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = "127.0.0.1:12345")]
        server: SocketAddr,
        /// Number of streams to request.
        #[arg(short = 'n', long, default_value_t = 5)]
        streams: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            file_size,
            min_frame,
            max_frame,
        } => {
            log::info!("Starting server on {bind}");
            let report = server::run(ServerConfig {
                bind,
                file_size,
                min_frame,
                max_frame,
            })
            .await?;
            println!("{report}");
        }
        Mode::Client { server, streams } => {
            log::info!("Starting client, connecting to {server}");
            let report = client::run(ClientConfig { server, streams }).await?;
            println!("{report}");
        }
    }
    Ok(())
}
