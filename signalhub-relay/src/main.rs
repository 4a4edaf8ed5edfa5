use std::time::Duration;

use clap::Parser;
use signalhub_relay::config::RelayConfig;
use signalhub_relay::{serve, AppState};
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = RelayConfig::parse();
    config.validate();

    let listener = match tokio::net::TcpListener::bind(config.bind_addr()).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", config.bind_addr(), err);
            std::process::exit(1);
        }
    };

    let state = AppState::new(
        config.max_clients,
        config.max_room_clients,
        config.max_payload,
        config.message_rate_per_sec,
        config.message_burst,
        config.ws_secret.clone(),
        config.allowed_origins_list(),
    );

    let heartbeat_interval = Duration::from_millis(config.heartbeat_interval_ms);
    if let Err(err) = serve(listener, state, heartbeat_interval).await {
        error!("relay server exited: {}", err);
        std::process::exit(1);
    }
}
