//! Chain Encoder
//!
//! A chain bundle is the PEM blocks of its certificates concatenated in the order
//! given, with nothing between them beyond each block's own header and footer.
//! By convention callers pass device, deployment, root.

use openssl::x509::X509;

use crate::error::Result;

/// MIME type of a chain bundle on the wire.
pub const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

pub fn encode_chain<'a, I>(certs: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a X509>,
{
    let mut bundle = Vec::new();
    for cert in certs {
        bundle.extend_from_slice(&cert.to_pem()?);
    }
    Ok(bundle)
}

/// Split a bundle back into its certificates, preserving order.
pub fn decode_chain(bundle: &[u8]) -> Result<Vec<X509>> {
    Ok(X509::stack_from_pem(bundle)?)
}
