//! PKI Signer - device certificate issuing service
//!
//! Signs caller-submitted certificate templates with a deployment CA that chains to
//! the root certificate compiled into this binary, and returns the
//! device → deployment → root chain as a PEM bundle.
//!
//! # Quick Start
//!
//! ```bash
//! cat > config.toml <<EOF
//! [pki]
//! deployment_cert_path = "/etc/pki-signer/deployment.pem"
//! deployment_key_path = "/etc/pki-signer/deployment.key"
//! EOF
//!
//! cargo build --release
//! RUST_LOG=info ./target/release/pki-signer
//! ```
//!
//! A misconfigured PKI does not stop the server; it is reported at startup and then
//! periodically until fixed, and signing requests get 503 in the meantime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pki_signer::configs::AppConfig;
use pki_signer::health::{log_status, spawn_periodic_check};
use pki_signer::ledger::AuditLedger;
use pki_signer::materials::MaterialStore;
use pki_signer::service::SigningService;
use pki_signer::webserver::start_webserver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    if let Some(parent) = config.ledger.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create ledger directory {}",
                parent.display()
            ))?;
        }
    }
    let ledger = Arc::new(
        AuditLedger::open(&config.ledger.database_path).context("Failed to open audit ledger")?,
    );
    info!(path = %config.ledger.database_path.display(), "Audit ledger opened");

    let store = MaterialStore::from_config(&config.pki).context("Failed to load root certificate")?;
    let service = Arc::new(SigningService::new(store, ledger));

    log_status(&service.check_materials());
    let interval = Duration::from_secs(config.pki.health_check_interval_secs.max(1));
    spawn_periodic_check(Arc::clone(&service), interval);

    start_webserver(&config, service).await
}
