//! Session configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::buffer::MAX_DELAY_MS;
use crate::protocol::{DEFAULT_AUDIO_PORT, DEFAULT_VIDEO_PORT};

/// Upper bound for buffer capacity planning.
pub const MAX_CAPACITY_DELAY_MS: u32 = 2000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Local address both receivers bind to.
    pub bind_addr: IpAddr,
    pub video_port: u16,
    pub audio_port: u16,
    pub video_delay_ms: u32,
    pub audio_delay_ms: u32,
    /// Largest delay the buffers are sized for.
    pub max_delay_ms: u32,
    /// C64 Ultimate to send start/stop commands to.
    pub host: Option<IpAddr>,
    /// Address the device should stream to. Detected from the route to `host` when unset.
    pub client_addr: Option<IpAddr>,
    /// How often blocked receivers wake up to check for shutdown.
    pub recv_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            video_port: DEFAULT_VIDEO_PORT,
            audio_port: DEFAULT_AUDIO_PORT,
            video_delay_ms: 0,
            audio_delay_ms: 0,
            max_delay_ms: MAX_DELAY_MS,
            host: None,
            client_addr: None,
            recv_timeout_ms: 100,
        }
    }
}

impl StreamConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("Failed to parse config JSON")?;
        Ok(config.clamped())
    }

    /// Pulls every value into its supported range.
    pub fn clamped(mut self) -> Self {
        self.video_delay_ms = self.video_delay_ms.min(MAX_DELAY_MS);
        self.audio_delay_ms = self.audio_delay_ms.min(MAX_DELAY_MS);
        self.max_delay_ms = self.max_delay_ms.min(MAX_CAPACITY_DELAY_MS);
        self.recv_timeout_ms = self.recv_timeout_ms.max(1);
        self
    }

    pub fn video_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.video_port)
    }

    pub fn audio_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.audio_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.video_port, 11000);
        assert_eq!(config.audio_port, 11001);
        assert_eq!(config.max_delay_ms, 500);
        assert_eq!(config.video_bind_addr(), "0.0.0.0:11000".parse().unwrap());
        assert_eq!(config.recv_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StreamConfig::from_json(r#"{ "video_delay_ms": 80, "host": "192.168.1.64" }"#)
            .unwrap();
        assert_eq!(config.video_delay_ms, 80);
        assert_eq!(config.audio_delay_ms, 0);
        assert_eq!(config.host, Some("192.168.1.64".parse().unwrap()));
        assert_eq!(config.audio_port, 11001);
    }

    #[test]
    fn test_values_clamped() {
        let config = StreamConfig::from_json(
            r#"{ "video_delay_ms": 9000, "audio_delay_ms": 501, "max_delay_ms": 60000, "recv_timeout_ms": 0 }"#,
        )
        .unwrap();
        assert_eq!(config.video_delay_ms, 500);
        assert_eq!(config.audio_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 2000);
        assert_eq!(config.recv_timeout_ms, 1);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(StreamConfig::from_json("{ not json").is_err());
        assert!(StreamConfig::from_json(r#"{ "video_port": "eleven" }"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = StreamConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("c64-stream-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "audio_port": 12001 }"#).unwrap();
        let config = StreamConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.audio_port, 12001);
    }
}
