use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use tracing::warn;

pub struct Config {
    pub port: u16,
    pub db_file: PathBuf,
    pub basic_auth: Option<BasicCredentials>,
    pub jwt_secret: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let basic_auth = if env::var("ENABLE_BASIC_AUTH").is_ok_and(|flag| flag == "true") {
            Some(BasicCredentials {
                username: try_load("BASIC_AUTH_USERNAME", "admin")?,
                password: try_load("BASIC_AUTH_PASSWORD", "admin")?,
            })
        } else {
            None
        };

        Ok(Self {
            port: try_load("NODE_PORT", "8000")?,
            db_file: try_load("DB_FILE", "db.json")?,
            basic_auth,
            jwt_secret: env::var("JWT_SECRET_KEY")
                .ok()
                .or_else(|| read_secret("JWT_SECRET_KEY"))
                .filter(|secret| !secret.is_empty()),
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        warn!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}, tokens are disabled");
        })
        .ok()
}
