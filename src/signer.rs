//! Signing Engine
//!
//! Turns a caller-submitted certificate template into a device certificate issued by
//! the deployment CA.
//!
//! # Issued Certificate Properties
//! - **Subject**: copied from the template
//! - **Public key**: copied from the template
//! - **Issuer**: the deployment certificate's subject
//! - **Serial number**: the audit ledger id allocated for this signing
//! - **Validity**: 1970-01-01 to 2222-01-01, independent of the current time, so
//!   clients with unreliable clocks accept long-lived device identities
//! - **Signature**: SHA-256 with RSA (PKCS#1 v1.5) by the deployment key
//! - **Version**: X.509v3, no extensions
//!
//! The template is only required to parse; its own signature and field values are
//! not checked.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::x509::{X509Ref, X509};
use tracing::{error, info, warn};

use crate::chain::encode_chain;
use crate::error::{PkiError, Result};
use crate::ledger::{AuditLedger, Principal};
use crate::validator::{common_name, DeploymentMaterials};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Start of the fixed validity window, 1970-01-01T00:00:00Z.
pub const NOT_BEFORE_UNIX: i64 = 0;
/// End of the fixed validity window, 2222-01-01T00:00:00Z.
pub const NOT_AFTER_UNIX: i64 = 7_952_342_400;

/// A freshly signed device certificate with the chain back to the root.
#[derive(Debug)]
pub struct IssuedChain {
    pub device: X509,
    pub deployment: X509,
    pub root: X509,
    /// Serial number of `device`, equal to its audit record id.
    pub serial: u64,
    /// False when the audit record could not be completed. The certificate stands.
    pub audit_finalized: bool,
}

impl IssuedChain {
    /// Device, deployment, root.
    pub fn certificates(&self) -> [&X509; 3] {
        [&self.device, &self.deployment, &self.root]
    }

    pub fn to_pem_bundle(&self) -> Result<Vec<u8>> {
        encode_chain(self.certificates())
    }
}

/// Parse caller bytes as a PEM certificate template.
pub fn parse_template(request: &[u8]) -> Result<X509> {
    X509::from_pem(request).map_err(|_| {
        PkiError::uningestible("Passed bytes do not look like a PEM-encoded X.509 certificate")
    })
}

/// Builder for a device certificate issued by a validated deployment CA
pub struct DeviceCertificateBuilder<'a> {
    materials: &'a DeploymentMaterials,
    template: &'a X509Ref,
    serial: u64,
}

impl<'a> DeviceCertificateBuilder<'a> {
    pub fn new(materials: &'a DeploymentMaterials, template: &'a X509Ref) -> Self {
        Self {
            materials,
            template,
            serial: 0,
        }
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    pub fn build(self) -> Result<X509> {
        let public_key = self.template.public_key().map_err(|e| {
            PkiError::uningestible(format!("Template public key is unreadable: {}", e))
        })?;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial = BigNum::from_slice(&self.serial.to_be_bytes())?;
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        builder.set_subject_name(self.template.subject_name())?;
        builder.set_issuer_name(self.materials.certificate().subject_name())?;
        builder.set_pubkey(&public_key)?;

        let not_before = Asn1Time::from_unix(NOT_BEFORE_UNIX as _)?;
        let not_after = Asn1Time::from_unix(NOT_AFTER_UNIX as _)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.sign(self.materials.private_key(), MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

/// Sign `request` with the deployment CA, recording the event in `ledger`.
///
/// The only check on `request` is that it parses; that happens before the ledger is
/// touched. Once a serial is allocated it is never handed out again, even if signing
/// then fails. A failed finalize is logged and reported through
/// [`IssuedChain::audit_finalized`] but does not fail the call, since the
/// certificate has already been signed.
pub fn sign(
    materials: &DeploymentMaterials,
    request: &[u8],
    principal: &Principal,
    ledger: &AuditLedger,
) -> Result<IssuedChain> {
    let template = parse_template(request)?;
    // Reject templates we cannot take a key from before allocating a serial.
    template.public_key().map_err(|e| {
        PkiError::uningestible(format!("Template public key is unreadable: {}", e))
    })?;
    let subject_cn = common_name(template.subject_name()).unwrap_or_default();

    let record = ledger.begin_record(
        principal,
        materials.fingerprint(),
        materials.common_name(),
    )?;

    let device = DeviceCertificateBuilder::new(materials, &template)
        .serial(record.id)
        .build()
        .map_err(|e| {
            warn!(serial = record.id, error = %e, "Signing failed after serial allocation");
            e
        })?;

    let der = device.to_der()?;
    let audit_finalized = match ledger.finalize_record(record.id, &der) {
        Ok(()) => true,
        Err(e) => {
            error!(
                serial = record.id,
                error = %e,
                "Issued certificate but failed to finalize its audit record"
            );
            false
        }
    };

    info!(
        serial = record.id,
        subject_cn = %subject_cn,
        issuer_cn = %materials.common_name(),
        principal = %principal,
        "Issued device certificate"
    );

    Ok(IssuedChain {
        device,
        deployment: materials.certificate().clone(),
        root: materials.root().clone(),
        serial: record.id,
        audit_finalized,
    })
}
