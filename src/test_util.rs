//! Throwaway PKI material for unit tests.

use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Name, X509};

use crate::materials::MaterialStore;

const TEST_KEY_SIZE: u32 = 2048;

pub(crate) fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(TEST_KEY_SIZE).unwrap()).unwrap()
}

pub(crate) fn name(cn: &str) -> X509Name {
    let mut builder = X509Name::builder().unwrap();
    builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Test Org").unwrap();
    builder.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    builder.build()
}

/// Certificate for `subject_key` named `cn`, signed by `issuer` or self-signed when `None`.
pub(crate) fn certificate(
    cn: &str,
    subject_key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
) -> X509 {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    let subject = name(cn);
    builder.set_subject_name(&subject).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&subject).unwrap(),
    }
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.set_pubkey(subject_key).unwrap();
    if ca {
        let mut bc = BasicConstraints::new();
        bc.critical().ca();
        builder.append_extension(bc.build().unwrap()).unwrap();
    }
    let signing_key = issuer.map(|(_, key)| key).unwrap_or(subject_key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A root plus a deployment CA it signed.
pub(crate) struct TestPki {
    pub root_cert: X509,
    pub deployment_cert: X509,
    pub deployment_key: PKey<Private>,
}

impl TestPki {
    pub fn generate() -> Self {
        let root_key = rsa_key();
        let root_cert = certificate("Test Root CA", &root_key, None, true);
        let deployment_key = rsa_key();
        let deployment_cert = certificate(
            "Test Deployment CA",
            &deployment_key,
            Some((&root_cert, &root_key)),
            true,
        );
        Self {
            root_cert,
            deployment_cert,
            deployment_key,
        }
    }

    /// Write the deployment materials under `dir` and point a store at them.
    pub fn store_in(&self, dir: &Path) -> MaterialStore {
        write_store(
            dir,
            &self.root_cert,
            &self.deployment_cert,
            &self.deployment_key,
        )
    }
}

pub(crate) fn write_store(
    dir: &Path,
    root: &X509,
    cert: &X509,
    key: &PKey<Private>,
) -> MaterialStore {
    let cert_path = dir.join("deployment.pem");
    let key_path = dir.join("deployment.key");
    std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
    std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    MaterialStore::new(root.clone(), Some(cert_path), Some(key_path))
}

/// A self-signed certificate template for a fresh key pair, PEM-encoded.
pub(crate) fn template(cn: &str) -> (PKey<Private>, Vec<u8>) {
    let key = rsa_key();
    let pem = certificate(cn, &key, None, false).to_pem().unwrap();
    (key, pem)
}
