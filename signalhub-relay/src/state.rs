//! Client registry (4.B) and room index (4.C), combined into one
//! structure under a single `RwLock` so the compound `join` (leave then
//! join) executes atomically (§5 invariants 1 and 2).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tokio::task::AbortHandle;

use signalhub_core::{validate_room_name, ClientId, RoomName};

pub type Outbox = mpsc::UnboundedSender<Message>;

#[derive(Debug)]
pub struct ClientEntry {
    send: Outbox,
    room: Option<RoomName>,
    alive: bool,
    reader: AbortHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    Overloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    InvalidRoomName,
    RoomFull,
}

/// What a successful `leave` (explicit or implicit, via eviction/close)
/// needs in order to emit `peer-left` to the remaining members.
pub struct LeftRoom {
    pub room: RoomName,
    pub remaining: Vec<(ClientId, Outbox)>,
}

/// One evicted client from a heartbeat sweep (4.E).
pub struct Eviction {
    pub id: ClientId,
    pub reader: AbortHandle,
    pub left: Option<LeftRoom>,
}

/// Result of one heartbeat tick: clients to ping, and clients to evict.
#[derive(Default)]
pub struct HeartbeatSweep {
    pub pings: Vec<Outbox>,
    pub evictions: Vec<Eviction>,
}

/// A snapshot of the broker for the status endpoint (4.H).
pub struct Snapshot {
    pub clients: Vec<ClientId>,
    pub rooms: HashMap<RoomName, Vec<ClientId>>,
}

#[derive(Debug, Default)]
struct Rooms {
    members: HashMap<RoomName, HashSet<ClientId>>,
}

impl Rooms {
    fn len_of(&self, room: &str) -> usize {
        self.members.get(room).map_or(0, HashSet::len)
    }

    fn insert(&mut self, room: RoomName, id: ClientId) {
        self.members.entry(room).or_default().insert(id);
    }

    /// Removes `id` from `room`; deletes the room entry if it becomes
    /// empty (invariant 3). Returns the remaining members, if the room
    /// still existed.
    fn remove(&mut self, room: &str, id: &ClientId) -> Option<HashSet<ClientId>> {
        let members = self.members.get_mut(room)?;
        members.remove(id);
        if members.is_empty() {
            self.members.remove(room);
            Some(HashSet::new())
        } else {
            Some(members.clone())
        }
    }
}

pub struct Broker {
    clients: HashMap<ClientId, ClientEntry>,
    rooms: Rooms,
    max_clients: usize,
    max_room_clients: usize,
}

impl Broker {
    pub fn new(max_clients: usize, max_room_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            rooms: Rooms::default(),
            max_clients,
            max_room_clients,
        }
    }

    /// 4.B `admit`: inserts a fresh client record or rejects with
    /// `overloaded` when the registry is already at `MAX_CLIENTS`.
    pub fn admit(
        &mut self,
        id: ClientId,
        send: Outbox,
        reader: AbortHandle,
    ) -> Result<(), AdmitError> {
        if self.clients.len() >= self.max_clients {
            return Err(AdmitError::Overloaded);
        }
        self.clients.insert(
            id,
            ClientEntry {
                send,
                room: None,
                alive: true,
                reader,
            },
        );
        Ok(())
    }

    pub fn sender(&self, id: &ClientId) -> Option<Outbox> {
        self.clients.get(id).map(|entry| entry.send.clone())
    }

    pub fn room_of(&self, id: &ClientId) -> Option<RoomName> {
        self.clients.get(id).and_then(|entry| entry.room.clone())
    }

    /// 4.C `join`, made atomic with the capacity check ordered before any
    /// membership mutation: a rejected join must leave the caller exactly
    /// where it was (see the rejected-joiner boundary test in §8).
    pub fn join(&mut self, id: &ClientId, room: RoomName) -> Result<Vec<(ClientId, Outbox)>, JoinError> {
        validate_room_name(&room).map_err(|_| JoinError::InvalidRoomName)?;

        let current_room = self.clients.get(id).and_then(|entry| entry.room.clone());
        let already_member = current_room.as_deref() == Some(room.as_str());
        if !already_member && self.rooms.len_of(&room) >= self.max_room_clients {
            return Err(JoinError::RoomFull);
        }

        if let Some(previous) = current_room.filter(|r| r != &room) {
            self.rooms.remove(&previous, id);
        }

        let peers: Vec<(ClientId, Outbox)> = self
            .rooms
            .members
            .get(&room)
            .into_iter()
            .flatten()
            .filter(|member| *member != id)
            .filter_map(|member| self.sender(member).map(|send| (member.clone(), send)))
            .collect();

        self.rooms.insert(room.clone(), id.clone());
        if let Some(entry) = self.clients.get_mut(id) {
            entry.room = Some(room);
        }

        Ok(peers)
    }

    /// 4.C `leave`: removes the client from its current room, if any.
    pub fn leave(&mut self, id: &ClientId) -> Option<LeftRoom> {
        let room = self.clients.get_mut(id)?.room.take()?;
        let remaining_ids = self.rooms.remove(&room, id).unwrap_or_default();
        let remaining = remaining_ids
            .into_iter()
            .filter_map(|member| self.sender(&member).map(|send| (member, send)))
            .collect();
        Some(LeftRoom { room, remaining })
    }

    /// 4.B `remove`: idempotent; detaches from the room index first.
    pub fn remove(&mut self, id: &ClientId) -> Option<LeftRoom> {
        let left = self.leave(id);
        self.clients.remove(id);
        left
    }

    /// 4.C `resolveSameRoom`: the target's outbox, only if sender and
    /// target are both in the same, non-unset room.
    pub fn resolve_same_room(&self, sender: &ClientId, target: &ClientId) -> Option<Outbox> {
        if target.is_empty() {
            return None;
        }
        let sender_room = self.clients.get(sender)?.room.as_ref()?;
        let target_entry = self.clients.get(target)?;
        if target_entry.room.as_deref() == Some(sender_room.as_str()) {
            Some(target_entry.send.clone())
        } else {
            None
        }
    }

    /// Every other member of `id`'s room, for fan-out (4.F).
    pub fn room_peers_except(&self, id: &ClientId) -> Vec<(ClientId, Outbox)> {
        let Some(room) = self.clients.get(id).and_then(|entry| entry.room.as_ref()) else {
            return Vec::new();
        };
        self.rooms
            .members
            .get(room)
            .into_iter()
            .flatten()
            .filter(|member| *member != id)
            .filter_map(|member| self.sender(member).map(|send| (member.clone(), send)))
            .collect()
    }

    pub fn set_alive(&mut self, id: &ClientId) {
        if let Some(entry) = self.clients.get_mut(id) {
            entry.alive = true;
        }
    }

    /// 4.E heartbeat tick: ping every live client, evict everyone who
    /// missed the previous tick's pong.
    pub fn tick(&mut self) -> HeartbeatSweep {
        let mut sweep = HeartbeatSweep::default();
        let ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        for id in ids {
            let Some(entry) = self.clients.get(&id) else {
                continue;
            };
            if entry.alive {
                let send = entry.send.clone();
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.alive = false;
                }
                sweep.pings.push(send);
            } else {
                let reader = entry.reader.clone();
                let left = self.remove(&id);
                sweep.evictions.push(Eviction { id, reader, left });
            }
        }
        sweep
    }

    /// Every connected client's outbox and reader task handle, for
    /// graceful-shutdown draining (§5). Read-only: draining does not
    /// mutate the registry, it relies on each reader's own teardown path
    /// to `remove` itself once its Close frame is processed.
    pub fn all_connections(&self) -> Vec<(ClientId, Outbox, AbortHandle)> {
        self.clients
            .iter()
            .map(|(id, entry)| (id.clone(), entry.send.clone(), entry.reader.clone()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            clients: self.clients.keys().cloned().collect(),
            rooms: self
                .rooms
                .members
                .iter()
                .map(|(room, members)| (room.clone(), members.iter().cloned().collect()))
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<RwLock<Broker>>,
    pub max_payload: usize,
    pub message_rate_per_sec: f64,
    pub message_burst: f64,
    pub ws_secret: Option<Arc<str>>,
    pub allowed_origins: Option<Arc<[String]>>,
}

impl AppState {
    pub fn new(
        max_clients: usize,
        max_room_clients: usize,
        max_payload: usize,
        message_rate_per_sec: f64,
        message_burst: f64,
        ws_secret: Option<String>,
        allowed_origins: Option<Vec<String>>,
    ) -> Self {
        Self {
            broker: Arc::new(RwLock::new(Broker::new(max_clients, max_room_clients))),
            max_payload,
            message_rate_per_sec,
            message_burst,
            ws_secret: ws_secret.map(|secret| secret.into()),
            allowed_origins: allowed_origins.map(|origins| origins.into()),
        }
    }
}
