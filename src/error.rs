//! Error Taxonomy
//!
//! Signing failures fall into two audiences:
//!
//! - **Operator-facing**: [`PkiError::Misconfigured`]. The deployment materials are
//!   missing, unparseable, or do not chain to the root. Nothing can be signed until
//!   someone fixes the configuration.
//! - **Caller-facing**: [`PkiError::Uningestible`]. The submitted template is not a
//!   certificate. The caller has to resubmit.
//!
//! Ledger and OpenSSL failures that occur after validation are internal errors.
//! A failure to *finalize* an audit record is not an error at all from the caller's
//! point of view; see [`crate::signer::IssuedChain::audit_finalized`].

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum PkiError {
    /// Deployment materials are unusable; surfaced to the operator.
    #[error("PKI misconfigured: {0}")]
    Misconfigured(String),

    /// Caller-submitted bytes are not a certificate; surfaced to the caller.
    #[error("certificate template uningestible: {0}")]
    Uningestible(String),

    #[error("audit ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("OpenSSL error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl PkiError {
    pub(crate) fn misconfigured(msg: impl Into<String>) -> Self {
        PkiError::Misconfigured(msg.into())
    }

    pub(crate) fn uningestible(msg: impl Into<String>) -> Self {
        PkiError::Uningestible(msg.into())
    }

    /// True when the condition needs operator attention rather than caller action.
    pub fn is_operator_facing(&self) -> bool {
        !matches!(self, PkiError::Uningestible(_))
    }
}

pub type Result<T> = std::result::Result<T, PkiError>;
