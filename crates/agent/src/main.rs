//! # PeerStash Agent CLI
//!
//! Command-line client for the PeerStash coordinator.
//!
//! ## Commands
//!
//! ### Owner side
//! - `register`: advertise this node's endpoint and free space
//! - `requests`: list reservations waiting for this node's decision
//! - `approve` / `reject`: decide a pending reservation
//! - `receive`: accept one pushed file on the approved port
//!
//! ### Requester side
//! - `offers`: nodes with enough free space
//! - `reserve`: reserve space on an owner node
//! - `wait`: poll until the owner approves (exponential backoff)
//! - `send`: ask the coordinator to push a file to the owner
//!
//! ### Either
//! - `status`: reservation snapshot
//!
//! ## Environment Variables
//!
//! - `PEERSTASH_COORDINATOR`: coordinator base URL (default: http://127.0.0.1:8000)
//! - `RUST_LOG`: log filter (default: warn)

mod client;
mod receive;
mod retry;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::client::{ClientError, CoordinatorClient};
use crate::retry::{poll_with_backoff, BackoffConfig, PollOutcome};

#[derive(Parser)]
#[command(author = "PeerStash", version, about = "PeerStash Agent CLI")]
struct Cli {
    /// Coordinator base URL
    #[arg(
        long,
        global = true,
        env = "PEERSTASH_COORDINATOR",
        default_value = "http://127.0.0.1:8000"
    )]
    coordinator: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or update) a node and its free space in MB
    Register {
        id: String,
        /// Address other nodes push files to, e.g. 10.0.0.5:9002
        endpoint: String,
        /// Free space in MB
        available_space: i64,
    },

    /// List nodes with at least MIN_SPACE MB free, largest first
    Offers {
        #[arg(long, default_value_t = 0)]
        min_space: i64,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Reserve AMOUNT MB on an owner node for a requester
    Reserve {
        /// Owner node holding the space
        from_id: String,
        /// Requester that will send the file
        to_id: String,
        amount: i64,
    },

    /// Show a reservation
    Status {
        reservation_id: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List pending requests addressed to NODE_ID
    Requests {
        node_id: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Approve a pending reservation; PORT is where `receive` will listen
    Approve {
        reservation_id: String,
        port: i64,
        /// Owner node id; must match the reservation's owner
        #[arg(long)]
        owner: String,
    },

    /// Reject a pending reservation
    Reject {
        reservation_id: String,
        /// Owner node id; must match the reservation's owner
        #[arg(long)]
        owner: String,
    },

    /// Poll until the reservation is approved
    Wait {
        reservation_id: String,
        /// Requester id the reservation was made for
        requester: String,
        #[arg(long, default_value_t = 60)]
        max_attempts: u32,
        #[arg(long, default_value_t = 500)]
        initial_delay_ms: u64,
        #[arg(long, default_value_t = 10_000)]
        max_delay_ms: u64,
    },

    /// Ask the coordinator to push FILE to the owner of an approved reservation
    Send {
        reservation_id: String,
        /// Requester id the reservation was made for
        client_id: String,
        /// Path relative to the coordinator's transfer root
        file: String,
        /// Local source port hint (0 = any)
        #[arg(long, default_value_t = 0)]
        port: i64,
    },

    /// Listen on ADDR and store one incoming file as <reservation_id>.bin
    Receive {
        reservation_id: String,
        /// Listen address, e.g. 0.0.0.0:9000
        addr: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = CoordinatorClient::new(&cli.coordinator)?;

    match cli.cmd {
        Commands::Register {
            id,
            endpoint,
            available_space,
        } => {
            client.register(&id, &endpoint, available_space).await?;
            println!("registered {id} at {endpoint} with {available_space} MB");
        }

        Commands::Offers { min_space, json } => {
            let offers = client.offers(min_space).await?;
            if json {
                print_json(&offers)?;
            } else if offers.is_empty() {
                println!("no offers with at least {min_space} MB free");
            } else {
                println!("{:<20} {:<24} {:>10}", "NODE", "ENDPOINT", "FREE (MB)");
                for o in offers {
                    println!("{:<20} {:<24} {:>10}", o.id, o.endpoint, o.free_space);
                }
            }
        }

        Commands::Reserve {
            from_id,
            to_id,
            amount,
        } => {
            let rid = client.reserve(&from_id, &to_id, amount).await?;
            println!("{rid}");
        }

        Commands::Status {
            reservation_id,
            json,
        } => {
            let view = client.reservation(&reservation_id).await?;
            if json {
                print_json(&view)?;
            } else {
                println!("Reservation: {}", view.reservation_id);
                println!("Owner:       {}", view.from_id);
                println!("Requester:   {}", view.to_id);
                println!("Amount:      {} MB", view.amount);
                println!("State:       {}", view.state);
                if let Some(port) = view.port {
                    println!("Port:        {port}");
                }
            }
        }

        Commands::Requests { node_id, json } => {
            let pending = client.pending(&node_id).await?;
            if json {
                print_json(&pending)?;
            } else if pending.is_empty() {
                println!("no pending requests for {node_id}");
            } else {
                for p in pending {
                    println!("{}  from {}  {} MB", p.reservation_id, p.to_id, p.amount);
                }
            }
        }

        Commands::Approve {
            reservation_id,
            port,
            owner,
        } => {
            client.approve(&reservation_id, port, &owner).await?;
            println!("approved {reservation_id} on port {port}");
        }

        Commands::Reject {
            reservation_id,
            owner,
        } => {
            client.reject(&reservation_id, &owner).await?;
            println!("rejected {reservation_id}");
        }

        Commands::Wait {
            reservation_id,
            requester,
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
        } => {
            let config = BackoffConfig {
                max_attempts,
                initial_delay_ms,
                max_delay_ms,
                ..BackoffConfig::default()
            };
            let outcome = poll_with_backoff(
                &config,
                || client.poll(&reservation_id, &requester),
                ClientError::is_retryable,
            )
            .await;
            match outcome {
                PollOutcome::Ready { value, attempts } => {
                    println!(
                        "approved after {attempts} attempt(s): send to {} port {}",
                        value.endpoint, value.port
                    );
                }
                PollOutcome::GaveUp {
                    last_error,
                    attempts,
                } => bail!("gave up after {attempts} attempt(s): {last_error}"),
            }
        }

        Commands::Send {
            reservation_id,
            client_id,
            file,
            port,
        } => {
            let status = client
                .send_file(&reservation_id, &client_id, port, &file)
                .await?;
            println!("{status}");
        }

        Commands::Receive {
            reservation_id,
            addr,
            dir,
        } => {
            let (path, bytes) = receive::receive_one(&addr, &dir, &reservation_id).await?;
            println!("received {bytes} bytes into {}", path.display());
        }
    }

    Ok(())
}
