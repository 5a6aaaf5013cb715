#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod connections;
mod db;
mod env;
mod error;
mod invite_code;
mod models;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_active_clients, api_connect, api_disconnect, api_get_invite_code, api_list_connections,
    api_login, api_logout, api_me, api_pending_count, api_preview_coach, api_register_user,
    api_respond, api_update_profile, health,
};
use auth::{forbidden_api, unauthorized_api};
use connections::ConnectionService;
use db::clean_expired_sessions;
use env::{AppConfig, load_environment};
use rocket::{Build, Rocket};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use telemetry::{OtelGuard, TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Keeps the OTLP exporter alive for the lifetime of the server.
struct TelemetryState(#[allow(dead_code)] Option<OtelGuard>);

async fn connect_pool(config: &AppConfig) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[launch]
async fn rocket() -> _ {
    if let Err(err) = load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }
    let config = AppConfig::from_env();

    let telemetry_guard = init_tracing(&config.deployment_environment);

    let pool = connect_pool(&config)
        .await
        .expect("Failed to connect to SQLite database");

    info!("Running database migrations...");
    if let Err(e) = run_migrations(&pool).await {
        error!("Failed to run migrations: {}", e);
        panic!("Database migration failed: {}", e);
    }
    info!("Migrations completed successfully");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    });

    init_rocket(pool, config).manage(TelemetryState(telemetry_guard))
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting coach connect");

    let service = ConnectionService::new(pool.clone());

    rocket::build()
        .manage(pool)
        .manage(service)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_register_user,
                api_me,
                api_update_profile,
                api_get_invite_code,
                api_preview_coach,
                api_connect,
                api_respond,
                api_list_connections,
                api_disconnect,
                api_active_clients,
                api_pending_count,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
