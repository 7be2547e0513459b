//! Signing service: materials + ledger behind one handle.
//!
//! Every call validates the deployment materials from scratch before it signs.

use std::sync::Arc;

use crate::chain::encode_chain;
use crate::error::Result;
use crate::health::{materials_check, MaterialsStatus};
use crate::ledger::{AuditLedger, LedgerStats, Principal};
use crate::materials::MaterialStore;
use crate::signer::{sign, IssuedChain};
use crate::validator::validate;

#[derive(Debug)]
pub struct SigningService {
    store: MaterialStore,
    ledger: Arc<AuditLedger>,
}

impl SigningService {
    pub fn new(store: MaterialStore, ledger: Arc<AuditLedger>) -> Self {
        Self { store, ledger }
    }

    pub fn store(&self) -> &MaterialStore {
        &self.store
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn check_materials(&self) -> MaterialsStatus {
        materials_check(&self.store)
    }

    pub fn ledger_stats(&self) -> Result<LedgerStats> {
        Ok(self.ledger.stats()?)
    }

    pub fn sign_request(&self, request: &[u8], principal: &Principal) -> Result<IssuedChain> {
        let materials = validate(&self.store)?;
        sign(&materials, request, principal, &self.ledger)
    }

    /// Sign and return the device/deployment/root PEM bundle.
    pub fn sign_request_bundle(&self, request: &[u8], principal: &Principal) -> Result<Vec<u8>> {
        let chain = self.sign_request(request, principal)?;
        encode_chain(chain.certificates())
    }

    /// DER of the current deployment certificate, once it has passed validation.
    pub fn deployment_certificate_der(&self) -> Result<Vec<u8>> {
        let materials = validate(&self.store)?;
        Ok(materials.certificate().to_der()?)
    }
}
