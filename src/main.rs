#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod database;
mod env;
mod error;
mod models;
mod telemetry;
mod transfer;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_add_data, api_delete_data, api_export_csv, api_get_attendance, api_get_rehearsals,
    api_get_section_students, api_get_sections, api_get_students, api_import_csv, api_login,
    api_save_attendance, api_update_data, health, index,
};
use clap::{Parser, Subcommand};
use database::{SeedOptions, SeedSet, WhitelistRegistry, connect, db_init, list_tables};
use env::{AppConfig, load_environment};
use error::AppError;
use rocket::data::{Limits, ToByteUnit};
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use sqlx::{Pool, Sqlite};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};
use validation::{
    bad_request_api, internal_error_api, not_found_api, unprocessable_api, unsupported_media_api,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Launch(#[from] rocket::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

#[derive(Debug, Parser)]
#[command(version, about = "Orchestra roster and attendance server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Recreate every table from the seed files and exit
    InitDb,
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let env_result = load_environment().map_err(|e| e.to_string());
    let _otel_guard = init_tracing();
    if let Err(e) = env_result {
        error!("Failed to load environment files: {}", e);
    }

    let config = AppConfig::from_env();
    let seeds = SeedSet::new(&config.seed_dir);
    let options = SeedOptions::from_config(&config);
    let registry = WhitelistRegistry::new();
    let pool = connect(&config.database_path).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitDb => {
            info!("Database initialization requested.");
            db_init(&pool, &seeds, &registry, &options).await?;
            info!("Exiting after database initialization.");
            pool.close().await;
        }
        Command::Serve => {
            if list_tables(&pool).await?.is_empty() {
                info!("Database has no tables, bootstrapping from seed files");
                db_init(&pool, &seeds, &registry, &options).await?;
            } else {
                registry.refresh(&seeds)?;
            }

            init_rocket(server_figment(&config), pool, registry, seeds)
                .launch()
                .await?;
        }
    }

    Ok(())
}

/// Rocket configuration with the bind address and upload limits taken from
/// the application config.
pub fn server_figment(config: &AppConfig) -> Figment {
    let upload_limit = config.max_upload_mb.mebibytes();

    rocket::Config::figment()
        .merge(("address", config.host.clone()))
        .merge(("port", config.port))
        .merge((
            "limits",
            Limits::default()
                .limit("file", upload_limit)
                .limit("data-form", upload_limit),
        ))
}

pub fn init_rocket(
    figment: Figment,
    pool: Pool<Sqlite>,
    registry: WhitelistRegistry,
    seeds: SeedSet,
) -> Rocket<Build> {
    info!("Starting orchestra attendance server");

    rocket::custom(figment)
        .manage(pool)
        .manage(registry)
        .manage(seeds)
        .mount("/", routes![index])
        .mount(
            "/api",
            routes![
                health,
                api_login,
                api_get_students,
                api_get_sections,
                api_get_rehearsals,
                api_get_section_students,
                api_get_attendance,
                api_save_attendance,
                api_update_data,
                api_delete_data,
                api_add_data,
                api_export_csv,
                api_import_csv,
            ],
        )
        .register(
            "/api",
            catchers![
                bad_request_api,
                not_found_api,
                unsupported_media_api,
                unprocessable_api,
                internal_error_api,
            ],
        )
        .attach(TelemetryFairing)
}
