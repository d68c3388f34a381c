//! Entry point for `ppcb`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, stdin/stdout and exit codes).

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;

use ppcb::client::{Client, Outcome};
use ppcb::error::PpcbError;
use ppcb::sender::Transfer;
use ppcb::server::{TcpServer, UdpServer};
use ppcb::state::Mode;
use ppcb::timer::{RetransmitConfig, MAX_RETRANSMITS, MAX_WAIT};
use ppcb::transport::resolve;

/// Move one byte stream from a client to a server over UDP, UDPR or TCP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Seconds a single receive may wait.
    #[arg(long, global = true, default_value_t = MAX_WAIT.as_secs())]
    wait: u64,

    /// Resends allowed per wait on UDPR before giving up.
    #[arg(long, global = true, default_value_t = MAX_RETRANSMITS)]
    retransmits: u32,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Receive transfers and write them to stdout.
    Server {
        /// udp and udpr both serve datagram clients.
        #[arg(value_enum)]
        mode: Mode,
        #[arg(value_parser = parse_port)]
        port: u16,
    },
    /// Send stdin to a server.
    Client {
        #[arg(value_enum)]
        mode: Mode,
        host: String,
        #[arg(value_parser = parse_port)]
        port: u16,
    },
}

fn parse_port(s: &str) -> Result<u16, PpcbError> {
    match s.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(PpcbError::InvalidArgument(format!(
            "{s} is not a valid port (expected 1-65535)"
        ))),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = RetransmitConfig {
        max_wait: Duration::from_secs(cli.wait),
        max_retransmits: cli.retransmits,
    };

    match cli.role {
        Role::Server { mode, port } => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let mut sink = std::io::stdout();
            log::info!("Starting {mode} server on port {port}");
            if mode.is_datagram() {
                let mut server = UdpServer::bind(addr, config)
                    .await
                    .with_context(|| format!("binding UDP port {port}"))?;
                server.run(&mut sink).await;
            } else {
                let mut server = TcpServer::bind(addr, config)
                    .await
                    .with_context(|| format!("binding TCP port {port}"))?;
                server.run(&mut sink).await;
            }
            Ok(0)
        }
        Role::Client { mode, host, port } => {
            let mut payload = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut payload)
                .await
                .context("reading stdin")?;

            let transfer = Transfer::new(payload, mode, &config)?;
            println!("{}", transfer.session_id());

            let server = resolve(&host, port).await?;
            log::info!(
                "Sending {} byte(s) to {server} over {mode}",
                transfer.total_length()
            );
            let mut client = Client::connect(server, transfer, config)
                .await
                .with_context(|| format!("connecting to {server}"))?;

            match client.run().await? {
                Outcome::Delivered => {
                    log::info!("Transfer {} delivered", client.session_id());
                    Ok(0)
                }
                Outcome::Rejected(why) => {
                    eprintln!("Server rejected transfer {}: {why:?}", client.session_id());
                    Ok(2)
                }
            }
        }
    }
}
