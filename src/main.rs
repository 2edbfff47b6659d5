mod agents;
mod bitrix;
mod bitrix_types;
mod config;
mod dedup;
mod error;
mod handlers;
mod phone;
mod pipeline;
mod resolver;
mod types;
mod uniq_types;

use crate::agents::AgentDirectory;
use crate::bitrix::BitrixClient;
use crate::config::Config;
use crate::dedup::DedupGuard;
use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

pub mod consts {
    /// National country code prepended to every canonical number.
    pub const COUNTRY_CODE: &str = "55";
    pub const DEFAULT_RECORDINGS_BASE: &str = "https://admin.uniq.app/recordings/details";
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            (
                "uniq_bitrix_rs",
                tracing_subscriber::filter::LevelFilter::DEBUG,
            ),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Config::from_env().expect("invalid configuration");
    let agents = match &config.agents_file {
        Some(path) => AgentDirectory::from_file(path).expect("failed to load agent roster"),
        None => AgentDirectory::builtin(),
    };
    tracing::info!(agents = agents.len(), "agent roster loaded");

    // One shared client with a bounded timeout so a stuck portal cannot
    // hang an inbound webhook request indefinitely.
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .expect("failed to build http client");
    let crm = Arc::new(BitrixClient::new(
        http_client,
        config.bitrix_webhook_base.clone(),
    ));

    let bind_addr = config.bind_addr.parse().expect("invalid UNIQ_BIND_ADDR");
    let app_state = Arc::new(AppState {
        config,
        agents,
        dedup: DedupGuard::new(),
        crm,
    });

    let app = Router::new()
        .route("/webhook", post(handlers::webhook_handler))
        .route("/", get(|| async { "uniq-bitrix relay" }))
        .with_state(app_state);

    tracing::info!(%bind_addr, "starting uniq-bitrix relay");
    axum::Server::bind(&bind_addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
