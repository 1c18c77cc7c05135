//! Configuration for the mock Elasticsearch server.
//!
//! Defines the listen address, fault injection rates and the identity the
//! mock reports to clients.

use crate::odds::{ActionOdds, MethodOdds, OddsError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockEsConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Fault injection rates
    #[serde(default)]
    pub faults: FaultRates,

    /// Identity reported by `/` and `/_license`
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Serve HTTPS when both files are set
    #[serde(default)]
    pub tls: TlsSettings,

    /// Fixed delay before every request is handled (0 = none)
    #[serde(default)]
    pub delay_ms: u64,

    /// Seconds between metrics snapshots on stdout (0 = never)
    #[serde(default)]
    pub metrics_interval_secs: u64,
}

impl Default for MockEsConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            faults: FaultRates::default(),
            cluster: ClusterSettings::default(),
            tls: TlsSettings::default(),
            delay_ms: 0,
            metrics_interval_secs: 0,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9200))
}

impl MockEsConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.faults
            .action_odds()
            .map_err(|e| anyhow::anyhow!("faults: {}", e))?;
        self.faults
            .method_odds()
            .map_err(|e| anyhow::anyhow!("faults: {}", e))?;
        self.tls.validate()?;
        if self.cluster.version.trim().is_empty() {
            anyhow::bail!("cluster.version cannot be empty");
        }
        Ok(())
    }

    /// The configured per-request delay, if any.
    pub fn delay(&self) -> Option<Duration> {
        (self.delay_ms > 0).then(|| Duration::from_millis(self.delay_ms))
    }

    /// The metrics reporting interval, if enabled.
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_secs > 0).then(|| Duration::from_secs(self.metrics_interval_secs))
    }
}

/// Percent chance of each simulated failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultRates {
    /// `create` answered with 409
    #[serde(default)]
    pub duplicate_percent: u32,

    /// `create` answered with 429
    #[serde(default)]
    pub too_many_percent: u32,

    /// `create` answered with 406
    #[serde(default)]
    pub non_index_percent: u32,

    /// Whole `_bulk` request answered with 413
    #[serde(default)]
    pub too_large_percent: u32,
}

impl FaultRates {
    pub fn action_odds(&self) -> Result<ActionOdds, OddsError> {
        ActionOdds::new(
            self.duplicate_percent,
            self.too_many_percent,
            self.non_index_percent,
        )
    }

    pub fn method_odds(&self) -> Result<MethodOdds, OddsError> {
        MethodOdds::new(self.too_large_percent)
    }
}

/// Cluster identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSettings {
    /// Cluster UUID of the Elasticsearch being mocked
    #[serde(default)]
    pub uuid: String,

    /// Version reported when the client's User-Agent carries none
    #[serde(default = "default_version")]
    pub version: String,

    /// Hours until the reported trial license expires
    #[serde(default = "default_license_expiry_hours")]
    pub license_expiry_hours: u32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            version: default_version(),
            license_expiry_hours: default_license_expiry_hours(),
        }
    }
}

fn default_version() -> String {
    "8.17.0".to_string()
}

fn default_license_expiry_hours() -> u32 {
    24
}

/// PEM files for HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    /// PEM certificate chain
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// PEM private key
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl TlsSettings {
    /// Certificate and key paths when TLS is enabled.
    pub fn files(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Both files or neither.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => anyhow::bail!("tls.cert_file is set but tls.key_file is not"),
            (None, Some(_)) => anyhow::bail!("tls.key_file is set but tls.cert_file is not"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: MockEsConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.listen, "0.0.0.0:9200".parse().unwrap());
        assert_eq!(config.faults, FaultRates::default());
        assert_eq!(config.cluster.version, "8.17.0");
        assert_eq!(config.cluster.license_expiry_hours, 24);
        assert!(config.delay().is_none());
        assert!(config.metrics_interval().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
listen: 127.0.0.1:9201
faults:
  duplicate_percent: 10
  too_many_percent: 5
  non_index_percent: 1
  too_large_percent: 2
cluster:
  uuid: abc123
  version: 7.17.9
  license_expiry_hours: 48
delay_ms: 250
metrics_interval_secs: 5
"#;
        let config: MockEsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen.port(), 9201);
        assert_eq!(config.faults.duplicate_percent, 10);
        assert_eq!(config.faults.too_large_percent, 2);
        assert_eq!(config.cluster.uuid, "abc123");
        assert_eq!(config.cluster.license_expiry_hours, 48);
        assert_eq!(config.delay(), Some(Duration::from_millis(250)));
        assert_eq!(config.metrics_interval(), Some(Duration::from_secs(5)));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "faults:\n  dup: 10\n";
        assert!(serde_yaml::from_str::<MockEsConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_action_total() {
        let mut config = MockEsConfig::default();
        config.faults.duplicate_percent = 60;
        config.faults.too_many_percent = 30;
        config.faults.non_index_percent = 11;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("create action percentages"));
    }

    #[test]
    fn test_validate_too_large() {
        let mut config = MockEsConfig::default();
        config.faults.too_large_percent = 101;
        assert!(config.validate().is_err());

        config.faults.too_large_percent = 100;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "faults:\n  duplicate_percent: 30").unwrap();
        let config = MockEsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.faults.duplicate_percent, 30);
    }

    #[test]
    fn test_from_file_rejects_invalid_rates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "faults:\n  too_large_percent: 250").unwrap();
        assert!(MockEsConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_parse_tls() {
        let yaml = r#"
tls:
  cert_file: /etc/mock-es/cert.pem
  key_file: /etc/mock-es/key.pem
"#;
        let config: MockEsConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let (cert, key) = config.tls.files().unwrap();
        assert_eq!(cert, Path::new("/etc/mock-es/cert.pem"));
        assert_eq!(key, Path::new("/etc/mock-es/key.pem"));
    }

    #[test]
    fn test_tls_disabled_by_default() {
        let config = MockEsConfig::default();
        assert!(config.tls.files().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_tls_requires_both_files() {
        let mut config = MockEsConfig::default();
        config.tls.cert_file = Some(PathBuf::from("cert.pem"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tls.key_file"));
        assert!(config.tls.files().is_none());

        config.tls = TlsSettings {
            cert_file: None,
            key_file: Some(PathBuf::from("key.pem")),
        };
        assert!(config.validate().is_err());
    }
}
