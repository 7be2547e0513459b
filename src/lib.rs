//! PKI Signer - Device Certificate Issuing Library
//!
//! Issues short chain-of-trust certificates. A fixed root certificate is compiled in;
//! an externally provisioned deployment (intermediate) certificate and key sign
//! device certificates for caller-submitted templates:
//!
//! ```text
//! Root CA (embedded, trust anchor)
//!   └── Deployment CA (files on disk, re-validated on every use)
//!       └── Device Certificate (serial = audit ledger id)
//! ```
//!
//! Every issued certificate is recorded in an append-only SQLite audit ledger keyed
//! by the deployment certificate fingerprint, the requesting principal and the
//! serial number embedded in the certificate.
//!
//! # Module Overview
//!
//! - [`materials`]: embedded root plus deployment certificate/key locations
//! - [`validator`]: proves the deployment materials chain to the root and pair up
//! - [`ledger`]: two-phase audit records that allocate serial numbers
//! - [`signer`]: builds and signs the device certificate
//! - [`chain`]: PEM chain bundle encoding
//! - [`service`]: one handle over all of the above
//! - [`health`]: standing materials check for operators
//! - [`webserver`]: thin HTTP transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pki_signer::ledger::{AuditLedger, Principal};
//! use pki_signer::materials::{embedded_root, MaterialStore};
//! use pki_signer::service::SigningService;
//!
//! fn issue(template_pem: &[u8]) -> anyhow::Result<Vec<u8>> {
//!     let store = MaterialStore::new(
//!         embedded_root()?,
//!         Some("/etc/pki-signer/deployment.pem".into()),
//!         Some("/etc/pki-signer/deployment.key".into()),
//!     );
//!     let ledger = Arc::new(AuditLedger::open("data/audit.sqlite3")?);
//!     let service = SigningService::new(store, ledger);
//!
//!     Ok(service.sign_request_bundle(template_pem, &Principal::user("alice"))?)
//! }
//! ```
//!
//! # Error Handling
//!
//! Core operations return [`error::PkiError`], which keeps operator-facing
//! misconfiguration apart from caller-facing bad input. Configuration and the binary
//! use `anyhow`.

pub mod chain;
pub mod configs;
pub mod error;
pub mod health;
pub mod ledger;
pub mod materials;
pub mod service;
pub mod signer;
pub mod validator;
pub mod webserver;

#[cfg(test)]
mod test_util;
