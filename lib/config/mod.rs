use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),

    #[error("Invalid value for PAGE_SIZE: {0}")]
    InvalidPageSize(String),
}

pub struct Config {
    pub db_url: String,
    /// Path of the decoded feed payload consumed by `update`.
    pub feed_path: String,
    /// Default: 0.0.0.0:3000
    pub listen_addr: String,
    /// Metadata page size. Default: 1000
    pub page_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let feed_path = env::var("FEED_PATH").unwrap_or_else(|_| "feed.json".to_string());

        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let page_size = match env::var("PAGE_SIZE") {
            Ok(val) => val
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidPageSize(val))?,
            Err(_) => 1000,
        };

        Ok(Self {
            db_url,
            feed_path,
            listen_addr,
            page_size,
        })
    }
}
