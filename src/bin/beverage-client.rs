//! Asks a running beverage preference service for a beverage.
//!
//! Usage: `beverage-client [HOT|COLD|<code>] [count]`
//!
//! The category defaults to HOT. Unrecognized names are rejected locally;
//! numeric codes are sent as-is so the server's validation can be observed.

use anyhow::{bail, Context, Result};
use beverage_preference::beverage::{BeverageClientError, BeveragePreferenceClient, BeverageType};
use beverage_preference::config::ServiceSettings;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut args = env::args().skip(1);
    let code = match args.next() {
        None => BeverageType::Hot.code(),
        Some(raw) => match raw.trim().parse::<i32>() {
            Ok(code) => code,
            Err(_) => raw.parse::<BeverageType>()?.code(),
        },
    };
    let count = match args.next() {
        None => 1,
        Some(raw) => parse_count(&raw)?,
    };

    let settings = ServiceSettings::from_env().context("invalid client settings")?;
    let client = BeveragePreferenceClient::connect(settings.bind_address, settings.client_config())
        .await
        .with_context(|| format!("failed to connect to {}", settings.bind_address))?;
    info!(addr = %settings.bind_address, code, count, "connected");

    for _ in 0..count {
        match client.get_beverage_code(code).await {
            Ok(beverage) => println!("{beverage}"),
            Err(BeverageClientError::Service(exception)) => {
                warn!(code, message = %exception.message, "service rejected the request");
                bail!("ServiceException: {}", exception.message);
            }
            Err(BeverageClientError::Rpc(err)) => return Err(err).context("GetBeverage call failed"),
        }
    }

    Ok(())
}

fn parse_count(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => bail!("count must be a positive integer, got {raw:?}"),
    }
}
