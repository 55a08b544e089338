mod auth;
mod config;
mod routes;
mod services;
mod templates;
mod views;

use crate::config::Config;
use crate::routes::AppState;
use meterbill::stat::LedgerLocation;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("ENV").ok().as_deref() != Some("prod") {
        dotenvy::dotenv().ok();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    match &config.ledger {
        Some(LedgerLocation::WebDav(dav)) => info!(url = %dav.file_url(), "ledger on WebDAV"),
        Some(LedgerLocation::Local(path)) => info!(path = %path.display(), "ledger on local disk"),
        None => warn!("no ledger location configured, submissions will fail"),
    }
    info!(
        mail = config.smtp.is_some(),
        archive = config.archive.is_some(),
        login = config.oidc.is_some(),
        "optional features"
    );

    let state = AppState::from_config(&config)?;
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
