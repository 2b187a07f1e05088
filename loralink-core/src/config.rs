//! Protocol timing and budget settings. Every field has a default, so a partial
//! `[protocol]` table in a config file is enough.

use serde::Deserialize;

use crate::retry::DEFAULT_MAX_RETRIES;
use crate::wire::{DEFAULT_CHUNK_SIZE, MAX_PAYLOAD};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// How long a waiting state listens for a reply (default 1000 ms).
    #[serde(default = "default_receive_window_ms")]
    pub receive_window_ms: u64,
    /// Gateway delay before replying, giving the sender time to switch to Rx (default 50 ms).
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    /// Random idle window before listening, lower bound (default 400 ms).
    #[serde(default = "default_idle_window_min_ms")]
    pub idle_window_min_ms: u64,
    /// Random idle window before listening, upper bound (default 1600 ms).
    #[serde(default = "default_idle_window_max_ms")]
    pub idle_window_max_ms: u64,
    /// Channel must stay quiet this long before a node pings (default 5000 ms).
    #[serde(default = "default_listen_for_silence_ms")]
    pub listen_for_silence_ms: u64,
    /// Failed windows per waiting state before giving up (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Gateway ignores pings from other nodes this long after serving one (default 1000 ms).
    #[serde(default = "default_ping_cooldown_ms")]
    pub ping_cooldown_ms: u64,
    /// Backoff after overhearing traffic, lower bound (default 1000 ms).
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    /// Backoff after overhearing traffic, upper bound (default 5000 ms).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Sleep after a completed upload; 0 sleeps until woken (default 0).
    #[serde(default)]
    pub sleep_after_upload_ms: u64,
    /// Data bytes per frame (default 218, capped by the frame payload).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_receive_window_ms() -> u64 {
    1000
}
fn default_reply_delay_ms() -> u64 {
    50
}
fn default_idle_window_min_ms() -> u64 {
    400
}
fn default_idle_window_max_ms() -> u64 {
    1600
}
fn default_listen_for_silence_ms() -> u64 {
    5000
}
fn default_max_retries() -> u8 {
    DEFAULT_MAX_RETRIES
}
fn default_ping_cooldown_ms() -> u64 {
    1000
}
fn default_backoff_min_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    5000
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            receive_window_ms: default_receive_window_ms(),
            reply_delay_ms: default_reply_delay_ms(),
            idle_window_min_ms: default_idle_window_min_ms(),
            idle_window_max_ms: default_idle_window_max_ms(),
            listen_for_silence_ms: default_listen_for_silence_ms(),
            max_retries: default_max_retries(),
            ping_cooldown_ms: default_ping_cooldown_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            sleep_after_upload_ms: 0,
            chunk_size: default_chunk_size(),
        }
    }
}

impl ProtocolConfig {
    /// Chunk size clamped to what fits in one frame next to the envelope.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_PAYLOAD - 24)
    }
}
