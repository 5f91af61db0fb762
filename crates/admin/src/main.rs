use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use domain::services::InvitationLifecycle;
use persistence::repositories::InvitationCodeRepository;
use sqlx::PgPool;
use tracing::info;

use register_admin::args::{Args, Command};
use register_admin::commands;
use register_admin::config::Config;
use register_admin::logging;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = Config::load().context("Failed to load configuration")?;

    logging::init_logging(&config.logging);

    info!("Starting register-admin v{}", env!("CARGO_PKG_VERSION"));

    // One pool for the whole run, closed on every exit path below
    let pool = persistence::db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    let result = run(args.cmd.unwrap_or_default(), &config, &pool).await;

    pool.close().await;
    info!("Database connections closed");

    result.map(ExitCode::from)
}

async fn run(cmd: Command, config: &Config, pool: &PgPool) -> Result<commands::RunStatus> {
    info!("Running database migrations...");
    persistence::db::run_migrations(pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Migrations completed");

    let lifecycle = InvitationLifecycle::new(InvitationCodeRepository::new(pool.clone()));
    let mut stdout = std::io::stdout().lock();
    commands::execute(cmd, config, &lifecycle, &mut stdout).await
}
