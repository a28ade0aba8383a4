// src/cli/mod.rs — CLI definition (clap derive)

pub mod admin;
pub mod migrate;
pub mod session;
pub mod status;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::core::lifecycle::LifecycleSettings;
use crate::core::types::{Actor, Money, Role, WorkloadType};
use crate::core::RentalCore;
use crate::infra::clock::SystemClock;
use crate::infra::config::Config;
use crate::store::spawn_store_server;

/// Operator identity used when `--as` is not given.
pub const OPERATOR_ID: &str = "operator";

#[derive(Parser)]
#[command(
    name = "gpurent",
    about = "GPU rental sessions with per-minute billing",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Act as this account (defaults to the platform operator)
    #[arg(long = "as", global = true, value_name = "USER_ID")]
    pub as_user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the billing scheduler until interrupted
    Daemon,
    /// Run a single billing sweep over all active sessions
    Sweep,
    /// Show or change the database schema version
    Migrate {
        #[arg(long)]
        status: bool,
        /// Revert the most recent migration (destroys its tables)
        #[arg(long)]
        rollback: bool,
    },
    /// Manage accounts and wallets
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Manage the GPU catalog
    Gpu {
        #[command(subcommand)]
        action: GpuAction,
    },
    /// Rent a GPU: request, start, stop, cancel, inspect
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show system status, or one user's summary with --user
    Status {
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AccountAction {
    Create {
        name: String,
        #[arg(long, default_value = "consumer")]
        role: Role,
        /// Explicit account id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    Deposit {
        user: String,
        amount: Money,
    },
    /// Allow a provider's GPUs to be rented
    Approve { user: String },
    /// Stop new rentals of a provider's GPUs
    Suspend { user: String },
    Show { user: String },
}

#[derive(Subcommand, Clone)]
pub enum GpuAction {
    Register {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "0")]
        vram: u32,
        /// Hourly price, e.g. 2.50
        #[arg(long)]
        price: Money,
    },
    /// Change the hourly price for future sessions
    Price { gpu: String, price: Money },
    Deactivate { gpu: String },
    Show { gpu: String },
}

#[derive(Subcommand, Clone)]
pub enum SessionAction {
    /// Request a GPU (as the consumer given by --as)
    Request {
        gpu: String,
        #[arg(long, default_value = "other")]
        workload: WorkloadType,
    },
    Start { id: String },
    Stop { id: String },
    Cancel {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Show { id: String },
    /// List sessions for a user (defaults to --as)
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Show telemetry averages
    Metrics { id: String },
    /// Append a telemetry reading to an active session
    RecordMetrics {
        id: String,
        #[arg(long)]
        utilization: f64,
        #[arg(long)]
        temperature: f64,
        #[arg(long)]
        memory: f64,
    },
    /// Retry settlement of a session with an uncollected final charge
    Finalize { id: String },
    /// Show the ledger entries of a session
    Ledger { id: String },
}

/// Open the configured database and wire up the core around it.
pub fn open_core(config: &Config) -> anyhow::Result<RentalCore> {
    let store = crate::store::open(&config.database.resolved_path())?;
    let (handle, _join) = spawn_store_server(store);
    Ok(RentalCore::new(
        handle,
        Arc::new(SystemClock),
        LifecycleSettings::from_config(config),
    ))
}

/// The caller for lifecycle operations. Identity is trusted as given.
pub async fn resolve_actor(core: &RentalCore, as_user: Option<&str>) -> anyhow::Result<Actor> {
    match as_user {
        None => Ok(Actor::new(OPERATOR_ID, Role::Admin)),
        Some(id) => Ok(core.registry.account(id).await?.actor()),
    }
}
