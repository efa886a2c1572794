use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    signature::{SignatureEncoding, Signer},
};
use sha2::Sha256;
use thiserror::Error;

use crate::certificate::{SigningCertificate, signing_timestamp};
use crate::invoice::canonical::CanonicalDocument;
use crate::invoice::embed::embed_signature;
use crate::invoice::xades::{SignatureBlock, SignedProperties};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing error: {0}")]
    Signing(String),
}

/// RSA PKCS#1 v1.5 / SHA-256 signature over `data`, base64 encoded.
///
/// The padding is deterministic: the same key and bytes always give the same
/// signature.
pub fn sign_bytes(key: &RsaPrivateKey, data: &[u8]) -> Result<String, SigningError> {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| SigningError::Signing(format!("RSA signing failed: {e}")))?;
    Ok(Base64::encode_string(&signature.to_bytes()))
}

/// A signed invoice and the block that was embedded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    xml: String,
    block: SignatureBlock,
}

impl SignedDocument {
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn block(&self) -> &SignatureBlock {
        &self.block
    }

    pub fn into_string(self) -> String {
        self.xml
    }
}

/// Produces enveloped XAdES signatures with one PKCS#12 identity.
///
/// # Examples
/// ```rust,no_run
/// use myinvois_core::certificate::SigningCertificate;
/// use myinvois_core::invoice::{canonicalize, InvoiceSigner};
///
/// let certificate = SigningCertificate::from_pkcs12_file("company.pfx".as_ref(), "secret")?;
/// let signer = InvoiceSigner::new(certificate);
/// let canonical = canonicalize(std::fs::read("invoice.xml")?.as_slice())?;
/// let signed = signer.sign(&canonical)?;
/// std::fs::write("output.xml", signed.xml())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct InvoiceSigner {
    certificate: SigningCertificate,
}

impl InvoiceSigner {
    pub fn new(certificate: SigningCertificate) -> Self {
        Self { certificate }
    }

    pub fn certificate(&self) -> &SigningCertificate {
        &self.certificate
    }

    pub fn sign(&self, canonical: &CanonicalDocument) -> Result<SignedDocument, crate::Error> {
        self.sign_at(canonical, Utc::now())
    }

    /// Sign the canonical bytes and splice the signature block into them.
    ///
    /// Every step runs before anything is returned, so a failure never
    /// yields a partially signed document.
    pub fn sign_at(
        &self,
        canonical: &CanonicalDocument,
        at: DateTime<Utc>,
    ) -> Result<SignedDocument, crate::Error> {
        if canonical.has_extensions()? {
            tracing::warn!("invoice already carries a UBLExtensions block");
        }

        let signature = sign_bytes(self.certificate.private_key(), canonical.as_bytes())?;
        let properties =
            SignedProperties::for_certificate(&self.certificate, &signing_timestamp(at));
        let block = SignatureBlock::assemble(
            canonical.digest(),
            signature,
            self.certificate.certificate_base64(),
            properties,
        );
        let xml = embed_signature(canonical.as_str(), &block.to_fragment())?;

        tracing::info!(
            doc_digest = %block.document_digest(),
            props_digest = %block.properties_digest(),
            signing_time = %block.properties().signing_time(),
            "signed invoice"
        );
        Ok(SignedDocument { xml, block })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::{
        pkcs1::DecodeRsaPrivateKey,
        pkcs1v15::{Signature, VerifyingKey},
        signature::Verifier,
    };

    fn test_key() -> RsaPrivateKey {
        let der = openssl::rsa::Rsa::generate(2048)
            .expect("generate RSA key")
            .private_key_to_der()
            .expect("encode RSA key");
        RsaPrivateKey::from_pkcs1_der(&der).expect("import RSA key")
    }

    #[test]
    fn signing_is_deterministic() {
        let key = test_key();
        let first = sign_bytes(&key, b"<Invoice>1</Invoice>").expect("sign");
        let second = sign_bytes(&key, b"<Invoice>1</Invoice>").expect("sign again");
        assert_eq!(first, second);

        let other = sign_bytes(&key, b"<Invoice>2</Invoice>").expect("sign other");
        assert_ne!(first, other);
    }

    #[test]
    fn signature_verifies_with_the_public_key() {
        let key = test_key();
        let data = b"<Invoice xmlns=\"urn:x\"><cbc:ID>1</cbc:ID></Invoice>";
        let encoded = sign_bytes(&key, data).expect("sign");
        let raw = Base64::decode_vec(&encoded).expect("base64");
        assert_eq!(raw.len(), 256);

        let signature = Signature::try_from(raw.as_slice()).expect("signature bytes");
        let verifier = VerifyingKey::<Sha256>::new(key.to_public_key());
        verifier.verify(data, &signature).expect("verify");
    }
}
