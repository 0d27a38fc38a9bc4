//! Session tunables. Deserializable so hosts can embed it in their own config file.

use serde::Deserialize;

use crate::alert::DEFAULT_ALERT_COOLDOWN_MS;
use crate::channel::ChannelMap;
use crate::reassembly::DEFAULT_MAX_IMAGE_BYTES;
use crate::wire::CHUNK_SIZE;

/// Defaults match the gateway firmware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Scan stops on its own after this long (default 10 s).
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// MTU requested after connecting (default 512).
    #[serde(default = "default_preferred_mtu")]
    pub preferred_mtu: u16,
    /// Global alert cooldown (default 3 s).
    #[serde(default = "default_alert_cooldown_ms")]
    pub alert_cooldown_ms: u64,
    /// Images within this many ms of an alert are deleted with it (default 5 s).
    #[serde(default = "default_image_association_ms")]
    pub image_association_ms: u64,
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Image chunk payload size agreed with the gateway (default 240).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Larger declared images are refused (default 1 MiB).
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default)]
    pub channels: ChannelMap,
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_preferred_mtu() -> u16 {
    512
}
fn default_alert_cooldown_ms() -> u64 {
    DEFAULT_ALERT_COOLDOWN_MS
}
fn default_image_association_ms() -> u64 {
    5_000
}
fn default_max_alerts() -> usize {
    100
}
fn default_max_images() -> usize {
    50
}
fn default_chunk_size() -> usize {
    CHUNK_SIZE
}
fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            preferred_mtu: default_preferred_mtu(),
            alert_cooldown_ms: default_alert_cooldown_ms(),
            image_association_ms: default_image_association_ms(),
            max_alerts: default_max_alerts(),
            max_images: default_max_images(),
            chunk_size: default_chunk_size(),
            max_image_bytes: default_max_image_bytes(),
            channels: ChannelMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SERVICE_UUID;

    #[test]
    fn empty_table_gives_defaults() {
        let cfg: SessionConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.scan_timeout_ms, 10_000);
        assert_eq!(cfg.preferred_mtu, 512);
        assert_eq!(cfg.chunk_size, 240);
        assert_eq!(cfg.channels.service, SERVICE_UUID);
    }

    #[test]
    fn partial_override() {
        let cfg: SessionConfig = toml::from_str(
            r#"
            alert_cooldown_ms = 1500
            max_images = 10

            [channels]
            command = "00000000-0000-0000-0000-0000000000aa"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.alert_cooldown_ms, 1_500);
        assert_eq!(cfg.max_images, 10);
        assert_eq!(cfg.max_alerts, 100);
        assert_eq!(
            cfg.channels.command.to_string(),
            "00000000-0000-0000-0000-0000000000aa"
        );
        assert_eq!(cfg.channels.service, SERVICE_UUID);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<SessionConfig>("scan_timeout = 5").is_err());
    }
}
