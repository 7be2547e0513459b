use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "PKI_SIGNER_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pki: PkiConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Deployment materials and signing policy.
///
/// Missing paths are not a startup error: the materials check reports them, and
/// signing refuses to run until they are set.
#[derive(Debug, Deserialize, Clone)]
pub struct PkiConfig {
    pub deployment_cert_path: Option<PathBuf>,
    pub deployment_key_path: Option<PathBuf>,
    #[serde(default)]
    pub require_permission: bool,
    /// Principals allowed to sign when `require_permission` is set.
    #[serde(default)]
    pub signers: Vec<String>,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            deployment_cert_path: None,
            deployment_key_path: None,
            require_permission: false,
            signers: Vec::new(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

impl PkiConfig {
    pub fn may_sign(&self, principal: &str) -> bool {
        !self.require_permission || self.signers.iter().any(|s| s == principal)
    }
}

fn default_health_check_interval() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/audit.sqlite3")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// HTTPS is served only when both TLS paths are set.
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).context("Failed to parse config file")
    }

    /// Load configuration from `$PKI_SIGNER_CONFIG`, falling back to config.toml
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(&path)
    }
}
