//! Service configuration.
//!
//! `musterd` reads a TOML file at startup. Only the collective section
//! carries required fields; everything else has defaults suitable for
//! a single-member deployment.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [collective]
//! name = "peer1"
//! bind = "0.0.0.0"
//! port = 13001
//! certificate = "/etc/muster/srvcert.pem"
//! key = "/etc/muster/privkey.pem"
//! idle_timeout_secs = 90
//!
//! [[collective.members]]
//! name = "peer2"
//! address = "10.0.0.2"
//! fingerprint = "sha256$deadbeef..."
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub collective: Option<CollectiveSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveSettings {
    /// This member's name within the collective
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM certificate presented to peers
    pub certificate: PathBuf,
    /// PEM private key matching the certificate
    pub key: PathBuf,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Peer trust registry: name, address, pinned fingerprint
    #[serde(default)]
    pub members: Vec<MemberSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSettings {
    pub name: String,
    pub address: String,
    pub fingerprint: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    crate::collective::DEFAULT_COLLECTIVE_PORT
}

fn default_idle_timeout() -> u64 {
    90
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(collective) = &self.collective {
            if collective.name.is_empty() {
                anyhow::bail!("Collective member name cannot be empty");
            }
            if collective.port == 0 {
                anyhow::bail!("Collective port must be between 1 and 65535");
            }
            for member in &collective.members {
                if member.name == collective.name {
                    anyhow::bail!(
                        "Collective member list must not include the local member: {}",
                        member.name
                    );
                }
                if !member.fingerprint.starts_with("sha256$") {
                    anyhow::bail!(
                        "Fingerprint for member {} must be of the form sha256$<hex>",
                        member.name
                    );
                }
            }
        }
        Ok(())
    }
}
