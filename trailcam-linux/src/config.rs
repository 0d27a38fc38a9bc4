//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use trailcam_core::SessionConfig;

/// Daemon configuration. File: ~/.config/trailcam/config.toml or /etc/trailcam/config.toml.
/// Env overrides: TRAILCAM_ADDRESS, TRAILCAM_IMAGE_DIR, TRAILCAM_STATUS_INTERVAL_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Gateway to connect to. Unset: scan and take the first gateway found.
    #[serde(default)]
    pub gateway_address: Option<String>,
    /// Where completed images are written (default ./trailcam-images).
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Ask the gateway for node status this often. Unset or 0: never.
    #[serde(default)]
    pub status_interval_secs: Option<u64>,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("trailcam-images")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_address: None,
            image_dir: default_image_dir(),
            status_interval_secs: None,
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (if present), then env vars.
/// A config file that exists but can't be read or parsed is an error.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("TRAILCAM_ADDRESS") {
        if !s.is_empty() {
            c.gateway_address = Some(s);
        }
    }
    if let Some(s) = var("TRAILCAM_IMAGE_DIR") {
        if !s.is_empty() {
            c.image_dir = PathBuf::from(s);
        }
    }
    if let Some(s) = var("TRAILCAM_STATUS_INTERVAL_SECS") {
        if let Ok(n) = s.parse::<u64>() {
            c.status_interval_secs = Some(n);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/trailcam/config.toml"));
    }
    out.push(PathBuf::from("/etc/trailcam/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_default() {
        let c = parse("").unwrap();
        assert!(c.gateway_address.is_none());
        assert_eq!(c.image_dir, PathBuf::from("trailcam-images"));
        assert_eq!(c.session, SessionConfig::default());
    }

    #[test]
    fn session_table() {
        let c = parse(
            r#"
gateway_address = "24:0A:C4:00:11:22"
status_interval_secs = 30

[session]
alert_cooldown_ms = 1000
"#,
        )
        .unwrap();
        assert_eq!(c.gateway_address.as_deref(), Some("24:0A:C4:00:11:22"));
        assert_eq!(c.status_interval_secs, Some(30));
        assert_eq!(c.session.alert_cooldown_ms, 1000);
        assert_eq!(c.session.max_alerts, 100);
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(parse("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("TRAILCAM_ADDRESS", "AA:BB:CC:DD:EE:FF"),
            ("TRAILCAM_IMAGE_DIR", "/var/lib/trailcam"),
            ("TRAILCAM_STATUS_INTERVAL_SECS", "not a number"),
        ]
        .into_iter()
        .collect();
        let mut c = parse("status_interval_secs = 10").unwrap();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.gateway_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(c.image_dir, PathBuf::from("/var/lib/trailcam"));
        assert_eq!(c.status_interval_secs, Some(10));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_file(Path::new("/nonexistent/trailcam.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/trailcam.toml"));
    }
}
