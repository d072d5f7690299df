use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Longest network timeout a config file may ask for: one day.
pub const MAX_NETWORK_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Settings shared by both platform backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound for any single network fetch, in seconds.
    pub network_timeout_secs: u64,
    /// Where downloads land. Falls back to the OS temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// Root of the bundled resources for the filesystem backend.
    pub bundle_dir: PathBuf,
    /// Reported by backends that cannot query the audio device.
    pub audio_sample_rate: u32,
    pub audio_buffer_size: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network_timeout_secs: 30,
            temp_dir: None,
            bundle_dir: PathBuf::from("assets"),
            audio_sample_rate: 48_000,
            audio_buffer_size: 256,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| BridgeError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|err| BridgeError::io(path, err))?;
        Self::from_json_str(&json)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    fn validate(&self) -> Result<()> {
        if self.network_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "network_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.network_timeout_secs > MAX_NETWORK_TIMEOUT_SECS {
            return Err(BridgeError::Config(format!(
                "network_timeout_secs must be at most {MAX_NETWORK_TIMEOUT_SECS}"
            )));
        }
        if self.audio_sample_rate == 0 || self.audio_buffer_size == 0 {
            return Err(BridgeError::Config(
                "audio parameters must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_use_thirty_second_timeout() {
        let config = BridgeConfig::default();
        assert_eq!(config.network_timeout(), Duration::from_secs(30));
        assert_eq!(config.temp_dir(), std::env::temp_dir());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json_str(r#"{ "bundle_dir": "res" }"#).unwrap();
        assert_eq!(config.bundle_dir, PathBuf::from("res"));
        assert_eq!(config.network_timeout_secs, 30);
        assert_eq!(config.audio_sample_rate, 48_000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = BridgeConfig::from_json_str(r#"{ "network_timeout_secs": 0 }"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn oversized_timeout_is_rejected() {
        let json = r#"{ "network_timeout_secs": 18446744073709551615 }"#;
        let err = BridgeConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, BridgeError::Config(message) if message.contains("at most")));
        let config = BridgeConfig::from_json_str(r#"{ "network_timeout_secs": 86400 }"#).unwrap();
        assert_eq!(config.network_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn loads_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "audio_buffer_size": 512, "temp_dir": "/tmp/bridge" }}"#).unwrap();
        let config = BridgeConfig::from_path(tmp.path()).unwrap();
        assert_eq!(config.audio_buffer_size, 512);
        assert_eq!(config.temp_dir(), PathBuf::from("/tmp/bridge"));
    }
}
