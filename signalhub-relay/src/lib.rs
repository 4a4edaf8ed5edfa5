//! The WebRTC signaling broker: connection admission, room membership,
//! frame relay and fan-out, liveness, and a read-only status endpoint.

mod connection;
pub mod config;
mod dispatcher;
mod heartbeat;
mod ratelimit;
mod state;
mod status;

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{info, warn};

pub use state::{AppState, Snapshot};

/// How long shutdown waits for clients to close after receiving the
/// normal-closure frame before forcing their reader tasks down (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(connection::ws_handler))
        .route("/status", get(status::status_handler))
        .with_state(state)
}

/// Starts the heartbeat ticker and serves `router` on `listener` until a
/// shutdown signal is received, then drains connections gracefully.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    heartbeat_interval: Duration,
) -> Result<(), String> {
    heartbeat::spawn_heartbeat(state.clone(), heartbeat_interval);

    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );

    let shutdown_state = state.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await
        .map_err(|err| err.to_string())
}

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received, draining connections");
    drain_connections(&state).await;
}

/// Sends every connected client a normal-closure (`1000`) frame, waits
/// up to [`SHUTDOWN_GRACE`] for their read loops to tear themselves down
/// via the registry, then aborts whatever reader tasks are still around
/// (§5: "closes all client write paths with a normal close code, waits
/// up to a bounded grace period ... then forces termination").
async fn drain_connections(state: &AppState) {
    let connections = state.broker.read().await.all_connections();
    if connections.is_empty() {
        return;
    }

    for (_, outbox, _) in &connections {
        let _ = outbox.send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: "server-shutdown".into(),
        })));
    }

    let drained = timeout(SHUTDOWN_GRACE, async {
        loop {
            if state.broker.read().await.client_count() == 0 {
                return;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    })
    .await;

    if drained.is_err() {
        let remaining = state.broker.read().await.all_connections();
        warn!(
            "shutdown grace period elapsed with {} client(s) still connected, forcing termination",
            remaining.len()
        );
        for (_, _, reader) in remaining {
            reader.abort();
        }
    }
}
