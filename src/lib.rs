pub mod body;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod events;
pub mod mgmt;
pub mod monitor;
pub mod relay;
pub mod replay;
pub mod retry;
pub mod store;
pub mod token;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use reqwest::cookie::Jar;
use shared_types::join_url;
use url::Url;

pub use crate::body::{Form, RequestBody};
pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::relay::{ClientConfig, Outcome, Relay};
pub use crate::replay::{FlushReport, PassOutcome};

use crate::connectivity::ConnectivityFlag;
use crate::db::SqliteQueueStore;
use crate::events::BroadcastNotifier;
use crate::monitor::ConnectivityMonitor;
use crate::relay::Parts;
use crate::token::CookieTokenProvider;
use crate::transport::HttpTransport;

pub struct App {
    pub mgmt: Router,
    pub relay: Relay,
    pub monitor: ConnectivityMonitor,
    pub events: BroadcastNotifier,
    pub store: SqliteQueueStore,
}

pub async fn app(config: &Config) -> Result<App> {
    let store = SqliteQueueStore::open(&config.database.url)
        .await
        .with_context(|| format!("Failed to open queue database {}", &config.database.url))?;

    let base_url = Url::parse(&config.api.base_url)
        .with_context(|| format!("Invalid api base_url {}", &config.api.base_url))?;

    let jar = Arc::new(Jar::default());
    let transport = Arc::new(HttpTransport::new(jar.clone(), config.api.timeout())?);
    let tokens = CookieTokenProvider::new(jar, base_url, &config.csrf.cookie_name);
    let flag = ConnectivityFlag::default();
    let events = BroadcastNotifier::new(64);

    let client_config = ClientConfig {
        base_url: config.api.base_url.clone(),
        csrf_header: config.csrf.header_name.clone(),
        max_attempts: config.replay.max_attempts,
    };
    let relay = Relay::new(
        client_config,
        Parts {
            transport: transport.clone(),
            store: Arc::new(store.clone()),
            tokens: Arc::new(tokens),
            connectivity: Arc::new(flag.clone()),
            events: Arc::new(events.clone()),
        },
    );

    let monitor = ConnectivityMonitor::new(
        relay.clone(),
        transport,
        flag,
        join_url(&config.api.base_url, &config.api.probe_path),
        Duration::from_secs(config.replay.probe_interval_secs),
    );

    let mgmt = mgmt::router(relay.clone(), config.management.secret.clone());

    Ok(App {
        mgmt,
        relay,
        monitor,
        events,
        store,
    })
}
