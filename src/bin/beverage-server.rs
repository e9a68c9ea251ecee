//! Serves the beverage preference service over QUIC.
//!
//! Configuration comes from the environment, see `beverage_preference::config`.
//! `BEVERAGE_SERVER_THREADS` sizes the runtime and `RUST_LOG` filters logs.

use anyhow::{Context, Result};
use beverage_preference::beverage::{
    BeverageMenu, BeveragePreferenceHandler, BeveragePreferenceServer, BeverageSelector,
};
use beverage_preference::config::ServiceSettings;
use beverage_preference::random::SeededRandom;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = ServiceSettings::from_env().context("invalid service settings")?;
    let worker_threads = settings.worker_threads();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    info!(worker_threads, bind = %settings.bind_address, "starting beverage preference service");
    rt.block_on(serve(settings))
}

async fn serve(settings: ServiceSettings) -> Result<()> {
    let menu = BeverageMenu::default();
    menu.validate().context("beverage menu is misconfigured")?;

    match settings.rng_seed {
        Some(seed) => {
            info!(seed, "using a single seeded generator");
            let selector = BeverageSelector::with_source(SeededRandom::new(seed)).with_menu(menu);
            run(selector, &settings).await
        }
        None => run(BeverageSelector::new().with_menu(menu), &settings).await,
    }
}

async fn run<H: BeveragePreferenceHandler>(handler: H, settings: &ServiceSettings) -> Result<()> {
    BeveragePreferenceServer::new(handler, settings.server_config())
        .serve()
        .await
        .context("beverage preference server stopped")?;
    info!("server endpoint closed");
    Ok(())
}
