//! Materials health check
//!
//! Misconfigured deployment materials are an operator problem, so instead of failing
//! startup the binary keeps reporting them: once at startup and then on a fixed
//! interval, until someone fixes the configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PkiError;
use crate::materials::MaterialStore;
use crate::service::SigningService;
use crate::validator::validate;

pub const MISCONFIGURED_HINT: &str = "Review the [pki] deployment_cert_path and deployment_key_path settings; \
     the deployment certificate must be signed by the embedded root and match the deployment key";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MaterialsStatus {
    Ready {
        deployment_common_name: String,
        deployment_sha256: String,
    },
    Misconfigured {
        reason: String,
        hint: &'static str,
    },
}

impl MaterialsStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, MaterialsStatus::Ready { .. })
    }
}

/// Validate the materials once and summarise the outcome.
pub fn materials_check(store: &MaterialStore) -> MaterialsStatus {
    match validate(store) {
        Ok(materials) => MaterialsStatus::Ready {
            deployment_common_name: materials.common_name().to_string(),
            deployment_sha256: materials.fingerprint().to_string(),
        },
        Err(PkiError::Misconfigured(reason)) => MaterialsStatus::Misconfigured {
            reason,
            hint: MISCONFIGURED_HINT,
        },
        Err(other) => MaterialsStatus::Misconfigured {
            reason: other.to_string(),
            hint: MISCONFIGURED_HINT,
        },
    }
}

/// Log a warning for as long as the materials stay misconfigured.
pub fn log_status(status: &MaterialsStatus) {
    match status {
        MaterialsStatus::Ready {
            deployment_common_name,
            deployment_sha256,
        } => debug!(
            deployment_cn = %deployment_common_name,
            deployment_sha256 = %deployment_sha256,
            "Deployment materials valid"
        ),
        MaterialsStatus::Misconfigured { reason, hint } => warn!(
            reason = %reason,
            hint = %hint,
            "Incorrectly configured PKI setup; device certificates cannot be signed"
        ),
    }
}

/// Re-run the check every `interval`. The first run is one `interval` from now;
/// callers report the startup status themselves.
pub fn spawn_periodic_check(service: Arc<SigningService>, interval: Duration) -> JoinHandle<()> {
    spawn_periodic(interval, move || service.check_materials())
}

fn spawn_periodic<F>(interval: Duration, check: F) -> JoinHandle<()>
where
    F: Fn() -> MaterialsStatus + Send + Sync + 'static,
{
    let check = Arc::new(check);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let check = Arc::clone(&check);
            match tokio::task::spawn_blocking(move || check()).await {
                Ok(status) => log_status(&status),
                Err(e) => warn!(error = %e, "Materials check task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestPki;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ready_status() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let status = materials_check(&pki.store_in(dir.path()));

        match status {
            MaterialsStatus::Ready {
                deployment_common_name,
                deployment_sha256,
            } => {
                assert_eq!(deployment_common_name, "Test Deployment CA");
                assert_eq!(deployment_sha256.len(), 64);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    fn counting_check(
        count: &Arc<AtomicUsize>,
    ) -> impl Fn() -> MaterialsStatus + Send + Sync + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            MaterialsStatus::Misconfigured {
                reason: "unset".to_string(),
                hint: MISCONFIGURED_HINT,
            }
        }
    }

    #[tokio::test]
    async fn test_periodic_check_skips_startup_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(Duration::from_secs(3600), counting_check(&count));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_periodic_check_repeats() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(Duration::from_millis(20), counting_check(&count));

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(count.load(Ordering::SeqCst) >= 2);
        handle.abort();
    }

    #[test]
    fn test_unset_paths_report_misconfigured() {
        let pki = TestPki::generate();
        let store = MaterialStore::new(pki.root_cert.clone(), None, None);
        let status = materials_check(&store);

        assert!(!status.is_ready());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "misconfigured");
        assert!(json["reason"].as_str().unwrap().contains("deployment_cert_path"));
    }
}
