mod app;

use std::fs::{self, OpenOptions};
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{prelude::*, EnvFilter};

use jmart_core::{
    api::ApiClient,
    config::{self, AppConfig},
    notify::BalanceNotifier,
    session::SessionStore,
};

/// How often the balance is re-checked even without an explicit hint.
const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    config::ensure_default_config()?;
    let config = AppConfig::load()?;

    let api = ApiClient::new(config.api_base_url.clone());
    let session = SessionStore::init_from_disk(config.session_root.clone());
    let notifier = BalanceNotifier::new();

    let poll_notifier = notifier.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BALANCE_POLL_INTERVAL);
        interval.tick().await; // the startup tick fires immediately
        loop {
            interval.tick().await;
            poll_notifier.notify();
        }
    });

    let mut app = app::JmartApp::new(config, api, session, notifier);
    app.run().await
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("jmart.log");

    let env_filter = EnvFilter::from_default_env();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
