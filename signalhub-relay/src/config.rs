//! Startup configuration (§6's configuration table), read once via
//! `clap::Parser` so every field accepts either a `--flag` or the spec's
//! environment variable name.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "signalhub-relay")]
pub struct RelayConfig {
    /// Listen address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Per-frame byte cap (4.A).
    #[arg(long, env = "MAX_PAYLOAD", default_value_t = 65_536)]
    pub max_payload: usize,

    /// Global admission cap (4.B).
    #[arg(long, env = "MAX_CLIENTS", default_value_t = 1_000)]
    pub max_clients: usize,

    /// Per-room cap (4.C).
    #[arg(long, env = "MAX_ROOM_CLIENTS", default_value_t = 50)]
    pub max_room_clients: usize,

    /// Token bucket refill rate, tokens/second (4.D).
    #[arg(long, env = "MESSAGE_RATE_PER_SEC", default_value_t = 10.0)]
    pub message_rate_per_sec: f64,

    /// Token bucket capacity (4.D).
    #[arg(long, env = "MESSAGE_BURST", default_value_t = 20.0)]
    pub message_burst: f64,

    /// Liveness tick interval, milliseconds (4.E).
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    /// Shared bearer token required on the connect URL, if set (4.G).
    #[arg(long, env = "WS_SECRET")]
    pub ws_secret: Option<String>,

    /// Comma-separated allow-list of acceptable `Origin` header values, if set (4.G).
    #[arg(long, env = "ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,
}

impl RelayConfig {
    /// Clamp values that would otherwise make the broker unusable or
    /// degrade into a busy-loop. Mirrors the teacher pack's
    /// `RelayConfig::validate` clamp-and-warn pattern.
    pub fn validate(&mut self) {
        if self.max_payload == 0 {
            tracing::warn!("max_payload of 0 rejects every frame, clamping to 1");
            self.max_payload = 1;
        }
        if self.max_clients == 0 {
            tracing::warn!("max_clients of 0 admits no one, clamping to 1");
            self.max_clients = 1;
        }
        if self.max_room_clients == 0 {
            tracing::warn!("max_room_clients of 0 admits no joiners, clamping to 1");
            self.max_room_clients = 1;
        }
        if self.message_burst < 1.0 {
            tracing::warn!("message_burst below 1 rejects every frame, clamping to 1");
            self.message_burst = 1.0;
        }
        if self.message_rate_per_sec < 0.0 {
            tracing::warn!("message_rate_per_sec cannot be negative, clamping to 0");
            self.message_rate_per_sec = 0.0;
        }
        const MIN_HEARTBEAT_MS: u64 = 1_000;
        if self.heartbeat_interval_ms < MIN_HEARTBEAT_MS {
            tracing::warn!(
                "heartbeat_interval below {}ms, clamping up",
                MIN_HEARTBEAT_MS
            );
            self.heartbeat_interval_ms = MIN_HEARTBEAT_MS;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `None` means no allow-list is configured (origin check passes
    /// unconditionally); `Some` holds the parsed, trimmed entries.
    pub fn allowed_origins_list(&self) -> Option<Vec<String>> {
        self.allowed_origins.as_ref().map(|raw| {
            raw.split(',')
                .map(|entry| entry.trim().to_owned())
                .filter(|entry| !entry.is_empty())
                .collect()
        })
    }
}
