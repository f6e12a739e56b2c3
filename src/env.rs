use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAPPING_TABLES: &[&str] = &["section_students", "section_instructors"];

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("APP_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Runtime settings for the server and the seeding commands.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub seed_dir: PathBuf,
    pub mapping_tables: Vec<String>,
    pub password_hash_cost: u32,
    pub max_upload_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: PathBuf::from("data/orchestra.db"),
            seed_dir: PathBuf::from("data"),
            mapping_tables: DEFAULT_MAPPING_TABLES.iter().map(|t| t.to_string()).collect(),
            password_hash_cost: bcrypt::DEFAULT_COST,
            max_upload_mb: 32,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = match std::env::var("APP_PORT") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "APP_PORT is not a valid port, using {}", DEFAULT_PORT);
                DEFAULT_PORT
            }),
            Err(_) => defaults.port,
        };

        let mapping_tables = match std::env::var("MAPPING_TABLES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.mapping_tables,
        };

        Self {
            host: std::env::var("APP_HOST").unwrap_or(defaults.host),
            port,
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            seed_dir: std::env::var("SEED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.seed_dir),
            mapping_tables,
            password_hash_cost: parse_or("PASSWORD_HASH_COST", defaults.password_hash_cost),
            max_upload_mb: parse_or("MAX_UPLOAD_MB", defaults.max_upload_mb),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
