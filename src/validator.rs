//! Chain Validator
//!
//! Re-reads the deployment certificate and key on every call and proves, before
//! anything gets signed, that:
//!
//! 1. the deployment certificate's signature verifies under the root's public key,
//!    using the digest the deployment certificate itself declares and PKCS#1 v1.5
//!    padding (RSA only, for old Android clients);
//! 2. the deployment private key is the other half of the deployment certificate's
//!    public key, compared on the RSA modulus and exponent rather than on encodings.
//!
//! Any failure is [`PkiError::Misconfigured`]. Validation has no side effects.

use std::fmt;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::{X509NameRef, X509Ref, X509};
use sha2::{Digest, Sha256};

use crate::error::{PkiError, Result};
use crate::materials::MaterialStore;

/// Deployment identity that passed validation. Never cached across calls.
pub struct DeploymentMaterials {
    root: X509,
    certificate: X509,
    private_key: PKey<Private>,
    common_name: String,
    fingerprint: String,
    signature_digest: Nid,
}

impl DeploymentMaterials {
    pub fn root(&self) -> &X509 {
        &self.root
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub(crate) fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// Subject CN of the deployment certificate.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Lower-case hex SHA-256 of the deployment certificate DER.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Digest the root used when signing the deployment certificate.
    pub fn signature_digest(&self) -> Nid {
        self.signature_digest
    }
}

impl fmt::Debug for DeploymentMaterials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentMaterials")
            .field("common_name", &self.common_name)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Load the deployment materials from `store` and check them against its root.
pub fn validate(store: &MaterialStore) -> Result<DeploymentMaterials> {
    let cert_pem = store.read_deployment_cert()?;
    let key_bytes = store.read_deployment_key()?;

    let certificate = X509::from_pem(&cert_pem).map_err(|e| {
        PkiError::misconfigured(format!(
            "Deployment certificate is not a PEM-encoded X.509 certificate: {}",
            e
        ))
    })?;
    let private_key = PKey::private_key_from_pem(key_bytes.expose()).map_err(|e| {
        PkiError::misconfigured(format!(
            "Deployment key is not a PEM-encoded private key: {}",
            e
        ))
    })?;

    let signature_digest = verify_issued_by(store.root(), &certificate)?;
    verify_key_pair(&private_key, &certificate)?;

    let common_name = common_name(certificate.subject_name()).ok_or_else(|| {
        PkiError::misconfigured("Deployment certificate subject has no common name")
    })?;
    let fingerprint = sha256_fingerprint(&certificate)?;

    Ok(DeploymentMaterials {
        root: store.root().clone(),
        certificate,
        private_key,
        common_name,
        fingerprint,
        signature_digest,
    })
}

/// Check `certificate` was signed by `issuer`'s RSA key. Returns the declared digest.
fn verify_issued_by(issuer: &X509Ref, certificate: &X509Ref) -> Result<Nid> {
    let algorithm = certificate.signature_algorithm().object().nid();
    let algorithms = algorithm.signature_algorithms().ok_or_else(|| {
        PkiError::misconfigured(format!(
            "Deployment certificate uses an unsupported signature algorithm ({})",
            algorithm.long_name().unwrap_or("unknown")
        ))
    })?;
    if algorithms.pkey != Nid::RSAENCRYPTION {
        return Err(PkiError::misconfigured(
            "Deployment certificate is not signed with RSA PKCS#1 v1.5",
        ));
    }
    if MessageDigest::from_nid(algorithms.digest).is_none() {
        return Err(PkiError::misconfigured(
            "Deployment certificate declares an unknown signature digest",
        ));
    }

    let issuer_key = issuer.public_key().map_err(|e| {
        PkiError::misconfigured(format!("Root certificate public key is unreadable: {}", e))
    })?;
    if issuer_key.id() != Id::RSA {
        return Err(PkiError::misconfigured("Root certificate key is not RSA"));
    }

    // X509_verify hashes the TBS part with the certificate's own declared digest.
    match certificate.verify(&issuer_key) {
        Ok(true) => Ok(algorithms.digest),
        Ok(false) => Err(PkiError::misconfigured(
            "Deployment certificate is not signed by the root CA",
        )),
        Err(e) => Err(PkiError::misconfigured(format!(
            "Deployment certificate signature could not be checked: {}",
            e
        ))),
    }
}

fn verify_key_pair(private_key: &PKey<Private>, certificate: &X509Ref) -> Result<()> {
    let key_rsa = private_key
        .rsa()
        .map_err(|_| PkiError::misconfigured("Deployment key is not an RSA key"))?;
    let cert_rsa = certificate
        .public_key()
        .and_then(|key| key.rsa())
        .map_err(|_| PkiError::misconfigured("Deployment certificate does not hold an RSA key"))?;

    if key_rsa.n() != cert_rsa.n() || key_rsa.e() != cert_rsa.e() {
        return Err(PkiError::misconfigured(
            "Deployment certificate is unrelated to declared private key",
        ));
    }
    Ok(())
}

/// First CN entry of `name`, decoded in full to UTF-8.
pub(crate) fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

pub(crate) fn sha256_fingerprint(certificate: &X509Ref) -> Result<String> {
    let der = certificate.to_der()?;
    Ok(hex::encode(Sha256::digest(&der)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{certificate as make_cert, rsa_key, write_store, TestPki};

    #[test]
    fn test_valid_materials() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let materials = validate(&pki.store_in(dir.path())).unwrap();

        assert_eq!(materials.common_name(), "Test Deployment CA");
        assert!(materials.signature_digest() == Nid::SHA256);
        assert_eq!(
            materials.certificate().to_der().unwrap(),
            pki.deployment_cert.to_der().unwrap()
        );
    }

    #[test]
    fn test_fingerprint_matches_openssl_digest() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let materials = validate(&pki.store_in(dir.path())).unwrap();

        let digest = pki.deployment_cert.digest(MessageDigest::sha256()).unwrap();
        let expected = hex::encode(&*digest);
        assert_eq!(materials.fingerprint(), expected);
        assert_eq!(materials.fingerprint().len(), 64);
    }

    #[test]
    fn test_cert_signed_by_other_root() {
        let pki = TestPki::generate();
        let impostor_key = rsa_key();
        let impostor_root = make_cert("Impostor Root", &impostor_key, None, true);
        let forged = make_cert(
            "Test Deployment CA",
            &pki.deployment_key,
            Some((&impostor_root, &impostor_key)),
            true,
        );
        let dir = tempfile::tempdir().unwrap();
        let store = write_store(dir.path(), &pki.root_cert, &forged, &pki.deployment_key);

        let err = validate(&store).unwrap_err();
        assert!(matches!(err, PkiError::Misconfigured(_)));
        assert!(err.to_string().contains("not signed by the root"));
    }

    #[test]
    fn test_unrelated_private_key() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let store = write_store(dir.path(), &pki.root_cert, &pki.deployment_cert, &rsa_key());

        let err = validate(&store).unwrap_err();
        assert!(matches!(err, PkiError::Misconfigured(_)));
        assert!(err.to_string().contains("unrelated"));
    }

    #[test]
    fn test_traditional_rsa_key_format_accepted() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let store = pki.store_in(dir.path());
        let pkcs1 = pki.deployment_key.rsa().unwrap().private_key_to_pem().unwrap();
        std::fs::write(store.deployment_key_path().unwrap(), pkcs1).unwrap();

        assert!(validate(&store).is_ok());
    }

    #[test]
    fn test_garbage_materials() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let store = pki.store_in(dir.path());
        std::fs::write(store.deployment_cert_path().unwrap(), b"not a certificate").unwrap();

        let err = validate(&store).unwrap_err();
        assert!(matches!(err, PkiError::Misconfigured(_)));

        let store = pki.store_in(dir.path());
        std::fs::write(store.deployment_key_path().unwrap(), b"not a key").unwrap();
        assert!(matches!(validate(&store), Err(PkiError::Misconfigured(_))));
    }

    #[test]
    fn test_rotation_picked_up_without_restart() {
        let pki = TestPki::generate();
        let dir = tempfile::tempdir().unwrap();
        let store = pki.store_in(dir.path());
        assert!(validate(&store).is_ok());

        std::fs::write(
            store.deployment_key_path().unwrap(),
            rsa_key().private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap();
        assert!(matches!(validate(&store), Err(PkiError::Misconfigured(_))));
    }

    #[test]
    fn test_common_name_lookup() {
        let key = rsa_key();
        let cert = make_cert("device-7", &key, None, false);
        assert_eq!(common_name(cert.subject_name()).as_deref(), Some("device-7"));
    }

    #[test]
    fn test_common_name_keeps_interior_nul() {
        let key = rsa_key();
        let cert = make_cert("device\0evil.example", &key, None, false);
        assert_eq!(
            common_name(cert.subject_name()).as_deref(),
            Some("device\0evil.example")
        );
    }
}
