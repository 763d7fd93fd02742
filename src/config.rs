//! Session configuration.
//!
//! Loaded once at startup and shared by every session through an `Rc`.
//! Three layers, lowest priority first:
//! 1. compiled defaults ([`SessionConfig::default`])
//! 2. an optional JSON file (camelCase keys, missing fields keep defaults)
//! 3. `H2D_*` environment variables
//!
//! ```json
//! { "settingsTimeoutMs": 5000, "maxConcurrentStreams": 50 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Receive buffer capacity in bytes.
    pub recv_buffer_size: usize,
    /// Reading resumes once the receive buffer holds at most this many bytes.
    pub recv_high_watermark: usize,
    /// Send buffer capacity in bytes.
    pub send_buffer_size: usize,
    /// Writing starts once the send buffer holds more than this many bytes.
    pub send_low_watermark: usize,
    /// Time the peer has to acknowledge our SETTINGS.
    pub settings_timeout_ms: u64,
    /// Idle time allowed while a request is still being received.
    pub stream_recv_timeout_ms: u64,
    /// Time a response may stay blocked on flow control.
    pub stream_send_timeout_ms: u64,
    /// Advertised SETTINGS_MAX_CONCURRENT_STREAMS.
    pub max_concurrent_streams: u32,
    /// Advertised SETTINGS_INITIAL_WINDOW_SIZE.
    pub initial_window_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 4096,
            recv_high_watermark: 3072,
            send_buffer_size: 4096,
            send_low_watermark: 1024,
            settings_timeout_ms: 10_000,
            stream_recv_timeout_ms: 30_000,
            stream_send_timeout_ms: 30_000,
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
        }
    }
}

/// Smallest buffer that still fits a frame header plus payload.
const MIN_BUFFER_SIZE: usize = 64;

/// Largest legal flow-control window.
const MAX_WINDOW: u32 = 0x7fff_ffff;

impl SessionConfig {
    pub fn settings_timeout(&self) -> Duration {
        Duration::from_millis(self.settings_timeout_ms)
    }

    pub fn stream_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_recv_timeout_ms)
    }

    pub fn stream_send_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_send_timeout_ms)
    }

    /// Correct inconsistent values in place, warning about each change.
    pub fn validate(&mut self) {
        fn at_least(val: &mut usize, min: usize, name: &str) {
            if *val < min {
                tracing::warn!("{name} ({val}) below minimum, raised to {min}");
                *val = min;
            }
        }

        at_least(&mut self.recv_buffer_size, MIN_BUFFER_SIZE, "recv_buffer_size");
        at_least(&mut self.send_buffer_size, MIN_BUFFER_SIZE, "send_buffer_size");

        if self.recv_high_watermark >= self.recv_buffer_size {
            let clamped = self.recv_buffer_size * 3 / 4;
            tracing::warn!(
                "recv_high_watermark ({}) >= recv_buffer_size ({}), clamped to {clamped}",
                self.recv_high_watermark,
                self.recv_buffer_size
            );
            self.recv_high_watermark = clamped;
        }
        if self.send_low_watermark >= self.send_buffer_size {
            let clamped = self.send_buffer_size / 4;
            tracing::warn!(
                "send_low_watermark ({}) >= send_buffer_size ({}), clamped to {clamped}",
                self.send_low_watermark,
                self.send_buffer_size
            );
            self.send_low_watermark = clamped;
        }
        if self.max_concurrent_streams == 0 {
            tracing::warn!("max_concurrent_streams is 0, raised to 1");
            self.max_concurrent_streams = 1;
        }
        if self.initial_window_size == 0 || self.initial_window_size > MAX_WINDOW {
            let clamped = self.initial_window_size.clamp(1, MAX_WINDOW);
            tracing::warn!(
                "initial_window_size ({}) out of range, clamped to {clamped}",
                self.initial_window_size
            );
            self.initial_window_size = clamped;
        }
    }

    /// Apply `H2D_*` overrides from `lookup`. Unparseable values are ignored
    /// with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<V: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
            slot: &mut V,
        ) {
            let Some(raw) = lookup(key) else {
                return;
            };
            match raw.trim().parse() {
                Ok(value) => *slot = value,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
            }
        }

        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        set(lookup, "H2D_RECV_BUFFER_SIZE", &mut self.recv_buffer_size);
        set(lookup, "H2D_RECV_HIGH_WATERMARK", &mut self.recv_high_watermark);
        set(lookup, "H2D_SEND_BUFFER_SIZE", &mut self.send_buffer_size);
        set(lookup, "H2D_SEND_LOW_WATERMARK", &mut self.send_low_watermark);
        set(lookup, "H2D_SETTINGS_TIMEOUT_MS", &mut self.settings_timeout_ms);
        set(lookup, "H2D_STREAM_RECV_TIMEOUT_MS", &mut self.stream_recv_timeout_ms);
        set(lookup, "H2D_STREAM_SEND_TIMEOUT_MS", &mut self.stream_send_timeout_ms);
        set(lookup, "H2D_MAX_CONCURRENT_STREAMS", &mut self.max_concurrent_streams);
        set(lookup, "H2D_INITIAL_WINDOW_SIZE", &mut self.initial_window_size);
    }
}

/// Parse a config file without overrides or validation.
pub fn load_config_from_path(path: &Path) -> Result<SessionConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Build the effective configuration: defaults, then `path` if given, then
/// environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => load_config_from_path(path)?,
        None => SessionConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate();
    tracing::debug!(?config, "session config loaded");
    Ok(config)
}
