//! Process settings read from the environment.
//!
//! | Variable                  | Default          |
//! |---------------------------|------------------|
//! | `BEVERAGE_BIND_ADDR`      | `127.0.0.1:9090` |
//! | `BEVERAGE_CERT_PATH`      | `certs/cert.pem` |
//! | `BEVERAGE_KEY_PATH`       | `certs/key.pem`  |
//! | `BEVERAGE_SERVER_NAME`    | `localhost`      |
//! | `BEVERAGE_RNG_SEED`       | unset            |
//! | `BEVERAGE_SERVER_THREADS` | available CPUs   |
//!
//! The client reads the same variables; `BEVERAGE_BIND_ADDR` is then the
//! address it dials.

use crate::RpcConfig;
use std::{env, net::SocketAddr, path::PathBuf, thread};
use thiserror::Error;

pub const BIND_ADDR_ENV: &str = "BEVERAGE_BIND_ADDR";
pub const CERT_PATH_ENV: &str = "BEVERAGE_CERT_PATH";
pub const KEY_PATH_ENV: &str = "BEVERAGE_KEY_PATH";
pub const SERVER_NAME_ENV: &str = "BEVERAGE_SERVER_NAME";
pub const RNG_SEED_ENV: &str = "BEVERAGE_RNG_SEED";
pub const SERVER_THREADS_ENV: &str = "BEVERAGE_SERVER_THREADS";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9090";
pub const DEFAULT_CERT_PATH: &str = "certs/cert.pem";
pub const DEFAULT_KEY_PATH: &str = "certs/key.pem";
pub const DEFAULT_SERVER_NAME: &str = "localhost";

/// Local address the client binds before dialing out.
const CLIENT_BIND_ADDR: &str = "0.0.0.0:0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not a valid socket address: {value:?}")]
    InvalidAddress { key: &'static str, value: String },

    #[error("{key} is not a valid unsigned integer: {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be a positive integer: {value:?}")]
    NotPositive { key: &'static str, value: String },

    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub bind_address: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub server_name: String,
    /// When set, the server draws from one seeded generator instead of
    /// per-thread generators.
    pub rng_seed: Option<u64>,
    /// Tokio worker threads for the server; `None` means one per CPU.
    pub server_threads: Option<usize>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            rng_seed: None,
            server_threads: None,
        }
    }
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key/value source. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup(BIND_ADDR_ENV) {
            settings.bind_address =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress {
                        key: BIND_ADDR_ENV,
                        value: raw.clone(),
                    })?;
        }
        if let Some(raw) = lookup(CERT_PATH_ENV) {
            settings.cert_path = non_empty(CERT_PATH_ENV, raw)?.into();
        }
        if let Some(raw) = lookup(KEY_PATH_ENV) {
            settings.key_path = non_empty(KEY_PATH_ENV, raw)?.into();
        }
        if let Some(raw) = lookup(SERVER_NAME_ENV) {
            settings.server_name = non_empty(SERVER_NAME_ENV, raw)?;
        }
        if let Some(raw) = lookup(RNG_SEED_ENV) {
            let seed = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: RNG_SEED_ENV,
                    value: raw.clone(),
                })?;
            settings.rng_seed = Some(seed);
        }
        if let Some(raw) = lookup(SERVER_THREADS_ENV) {
            settings.server_threads = Some(positive(SERVER_THREADS_ENV, raw)?);
        }

        Ok(settings)
    }

    pub fn server_config(&self) -> RpcConfig {
        RpcConfig::new(self.cert_path.clone(), self.bind_address.to_string())
            .with_key_path(self.key_path.clone())
            .with_server_name(self.server_name.clone())
    }

    pub fn worker_threads(&self) -> usize {
        self.server_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn client_config(&self) -> RpcConfig {
        RpcConfig::new(self.cert_path.clone(), CLIENT_BIND_ADDR)
            .with_server_name(self.server_name.clone())
    }
}

fn positive(key: &'static str, raw: String) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::NotPositive { key, value: raw }),
        Ok(value) => Ok(value),
        Err(_) => Err(ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn non_empty(key: &'static str, raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty { key });
    }
    Ok(trimmed.to_string())
}
