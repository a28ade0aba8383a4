// src/main.rs — gpurent entry point

use std::path::Path;

use clap::Parser;

use gpurent::cli::{self, Cli, Commands};
use gpurent::infra::config::Config;
use gpurent::infra::daemon;
use gpurent::infra::errors::RentalError;
use gpurent::infra::logger;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        match e.downcast_ref::<RentalError>() {
            Some(err) => eprintln!("error [{}]: {err}", err.kind().as_str()),
            None => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    // Initialize logging (respects GPURENT_LOG / RUST_LOG)
    logger::init_logging(&config.logging.level);

    // Schema maintenance works on the raw database file.
    if let Commands::Migrate { status, rollback } = &cli.command {
        return cli::migrate::run_migrate(&config.database.resolved_path(), *status, *rollback);
    }

    let core = cli::open_core(&config)?;
    let actor = cli::resolve_actor(&core, cli.as_user.as_deref()).await?;

    match cli.command {
        Commands::Daemon => daemon::run_daemon(&core, &config).await,
        Commands::Sweep => {
            let scheduler = daemon::build_scheduler(&core, &config);
            let report = scheduler.tick().await?;
            if report.is_empty() {
                println!("No active sessions.");
            }
            for entry in &report.entries {
                let tag = if entry.recovered { " (recovered)" } else { "" };
                println!("  {}{}: {}", entry.session_id, tag, entry.outcome);
            }
            Ok(())
        }
        Commands::Account { action } => cli::admin::run_account(&core, action).await,
        Commands::Gpu { action } => cli::admin::run_gpu(&core, action).await,
        Commands::Session { action } => cli::session::run_session(&core, &actor, action).await,
        Commands::Status { user } => {
            cli::status::show_status(&core, &config, &actor, user.as_deref()).await
        }
        Commands::Migrate { .. } => Ok(()),
    }
}
