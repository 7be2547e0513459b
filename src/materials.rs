//! Material Store
//!
//! Supplies the raw bytes the chain validator works from:
//!
//! - the **root certificate**, compiled into the binary and parsed once per process;
//! - the **deployment certificate** and **deployment private key**, read from the
//!   configured locations on every call so an operator can rotate them without a
//!   restart.
//!
//! Every lookup failure here is a [`PkiError::Misconfigured`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretBox};

use crate::configs::PkiConfig;
use crate::error::{PkiError, Result};

/// PEM of the trust anchor all deployment certificates must chain to.
pub const ROOT_CERT_PEM: &[u8] = include_bytes!("../certs/root.pem");

static EMBEDDED_ROOT: OnceLock<std::result::Result<X509, String>> = OnceLock::new();

/// The embedded root certificate, parsed on first use.
pub fn embedded_root() -> Result<X509> {
    EMBEDDED_ROOT
        .get_or_init(|| X509::from_pem(ROOT_CERT_PEM).map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| PkiError::misconfigured(format!("Embedded root certificate is unreadable: {}", e)))
}

/// Deployment private key bytes, kept out of debug output and zeroized on drop.
pub struct DeploymentKeyBytes(SecretBox<Vec<u8>>);

impl DeploymentKeyBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl fmt::Debug for DeploymentKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeploymentKeyBytes")
            .field(&"<redacted>")
            .finish()
    }
}

/// Where the deployment materials live, plus the trust anchor to check them against.
#[derive(Clone)]
pub struct MaterialStore {
    root: X509,
    deployment_cert_path: Option<PathBuf>,
    deployment_key_path: Option<PathBuf>,
}

impl MaterialStore {
    /// Store anchored on an explicit root certificate.
    pub fn new(
        root: X509,
        deployment_cert_path: Option<PathBuf>,
        deployment_key_path: Option<PathBuf>,
    ) -> Self {
        Self {
            root,
            deployment_cert_path,
            deployment_key_path,
        }
    }

    /// Store anchored on the embedded root, with locations from configuration.
    pub fn from_config(config: &PkiConfig) -> Result<Self> {
        Ok(Self::new(
            embedded_root()?,
            config.deployment_cert_path.clone(),
            config.deployment_key_path.clone(),
        ))
    }

    pub fn root(&self) -> &X509 {
        &self.root
    }

    pub fn deployment_cert_path(&self) -> Option<&Path> {
        self.deployment_cert_path.as_deref()
    }

    pub fn deployment_key_path(&self) -> Option<&Path> {
        self.deployment_key_path.as_deref()
    }

    pub fn read_deployment_cert(&self) -> Result<Vec<u8>> {
        read_location("deployment_cert_path", self.deployment_cert_path.as_deref())
    }

    pub fn read_deployment_key(&self) -> Result<DeploymentKeyBytes> {
        read_location("deployment_key_path", self.deployment_key_path.as_deref())
            .map(DeploymentKeyBytes::new)
    }
}

impl fmt::Debug for MaterialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialStore")
            .field("deployment_cert_path", &self.deployment_cert_path)
            .field("deployment_key_path", &self.deployment_key_path)
            .finish_non_exhaustive()
    }
}

fn read_location(setting: &str, path: Option<&Path>) -> Result<Vec<u8>> {
    let path = path.ok_or_else(|| PkiError::misconfigured(format!("Setting '{}' is not set", setting)))?;
    std::fs::read(path).map_err(|e| {
        PkiError::misconfigured(format!(
            "Failed to read {} from {}: {}",
            setting,
            path.display(),
            e
        ))
    })
}
