//! Status endpoint (4.H): a read-only snapshot of the client registry
//! and room index over plain HTTP.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use signalhub_core::{ClientId, RoomName};

use crate::state::AppState;

#[derive(Serialize)]
struct StatusResponse {
    #[serde(rename = "totalClients")]
    total_clients: usize,
    clients: Vec<ClientId>,
    rooms: HashMap<RoomName, Vec<ClientId>>,
}

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.broker.read().await.snapshot();
    Json(StatusResponse {
        total_clients: snapshot.clients.len(),
        clients: snapshot.clients,
        rooms: snapshot.rooms,
    })
}
