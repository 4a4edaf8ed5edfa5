//! Liveness (4.E): a single process-wide ticker, not a per-connection
//! one — spec.md is explicit that heartbeat is "a single process-wide
//! ticker", unlike the teacher's per-connection keepalive loop.

use std::time::Duration;

use axum::extract::ws::Message;
use tracing::info;

use crate::dispatcher::announce_peer_left;
use crate::state::AppState;

pub fn spawn_heartbeat(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &AppState) {
    let outcome = state.broker.write().await.tick();

    for tx in outcome.pings {
        let _ = tx.send(Message::Ping(Vec::new().into()));
    }

    for eviction in outcome.evictions {
        eviction.reader.abort();
        info!("evicting client {} for missed heartbeat", eviction.id);
        if let Some(left) = eviction.left {
            announce_peer_left(&eviction.id, &left.remaining);
        }
    }
}
