//! PKCS#12 signing identities and the certificate metadata embedded in XAdES.
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use openssl::{
    pkcs12::Pkcs12,
    pkey::{Id, PKey, Private},
    symm::Cipher,
    x509::X509,
};
use rsa::{RsaPrivateKey, pkcs8::DecodePrivateKey};
use sha2::{Digest, Sha256};
use std::{fmt, path::Path};
use thiserror::Error;
use x509_cert::{Certificate, der::Decode};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid PKCS#12 credentials: {0}")]
    InvalidCredentials(String),
    #[error("unsupported private key type: {0}")]
    UnsupportedKeyType(String),
    #[error("failed to read PKCS#12 bundle {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate encoding error: {0}")]
    Encoding(String),
}

/// Signing identity loaded from a PKCS#12 bundle.
///
/// The RSA key stays in memory for the lifetime of this value. The only
/// serialized form is the PEM bundle, whose key block is encrypted under the
/// bundle passphrase.
pub struct SigningCertificate {
    private_key: RsaPrivateKey,
    certificate: Certificate,
    certificate_der: Vec<u8>,
    chain: Vec<Certificate>,
    pem_bundle: String,
    issuer_name: String,
    serial_number: String,
    fingerprint: String,
}

impl SigningCertificate {
    pub fn from_pkcs12_file(path: &Path, passphrase: &str) -> Result<Self, CertificateError> {
        let der = std::fs::read(path).map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs12_der(&der, passphrase)
    }

    /// Decrypt a PKCS#12 bundle and derive the signing metadata.
    ///
    /// # Errors
    /// [`CertificateError::InvalidCredentials`] when the bundle cannot be
    /// decrypted or carries no key/certificate, and
    /// [`CertificateError::UnsupportedKeyType`] for non-RSA keys.
    pub fn from_pkcs12_der(der: &[u8], passphrase: &str) -> Result<Self, CertificateError> {
        let bundle = Pkcs12::from_der(der).map_err(|e| {
            CertificateError::InvalidCredentials(format!("not a PKCS#12 bundle: {e}"))
        })?;
        let parsed = bundle.parse2(passphrase).map_err(|e| {
            CertificateError::InvalidCredentials(format!("failed to decrypt bundle: {e}"))
        })?;
        let pkey = parsed.pkey.ok_or_else(|| {
            CertificateError::InvalidCredentials("bundle contains no private key".into())
        })?;
        if pkey.id() != Id::RSA {
            return Err(CertificateError::UnsupportedKeyType(format!(
                "{:?}",
                pkey.id()
            )));
        }
        let cert = parsed.cert.ok_or_else(|| {
            CertificateError::InvalidCredentials("bundle contains no certificate".into())
        })?;
        let extra: Vec<X509> = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        let private_key = rsa_key(&pkey)?;
        let pem_bundle = pem_bundle(&pkey, &cert, &extra, passphrase)?;

        let certificate_der = cert
            .to_der()
            .map_err(|e| CertificateError::Encoding(format!("certificate DER: {e}")))?;
        let certificate = Certificate::from_der(&certificate_der)
            .map_err(|e| CertificateError::Encoding(format!("certificate parse: {e:?}")))?;
        let chain = extra
            .iter()
            .map(|c| {
                let der = c
                    .to_der()
                    .map_err(|e| CertificateError::Encoding(format!("chain DER: {e}")))?;
                Certificate::from_der(&der)
                    .map_err(|e| CertificateError::Encoding(format!("chain parse: {e:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let issuer_name = formatted_issuer_name(&certificate);
        let serial_number =
            serial_bytes_to_decimal_string(certificate.tbs_certificate.serial_number.as_bytes());
        let fingerprint = Base64::encode_string(&Sha256::digest(&certificate_der));

        tracing::info!(
            issuer = %issuer_name,
            serial = %serial_number,
            chain_len = chain.len(),
            "loaded signing certificate"
        );

        Ok(Self {
            private_key,
            certificate,
            certificate_der,
            chain,
            pem_bundle,
            issuer_name,
            serial_number,
            fingerprint,
        })
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Additional certificates shipped in the bundle.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn certificate_base64(&self) -> String {
        Base64::encode_string(&self.certificate_der)
    }

    /// Issuer DN in RFC 4514 order with every `,` followed by a space.
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// Serial number in decimal.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Base64 SHA-256 over the DER certificate.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypted PKCS#8 key followed by the certificate and the bundled chain.
    pub fn pem_bundle(&self) -> &str {
        &self.pem_bundle
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("issuer_name", &self.issuer_name)
            .field("serial_number", &self.serial_number)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, the signing-time format used in `SignedProperties`.
pub fn signing_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn rsa_key(pkey: &PKey<Private>) -> Result<RsaPrivateKey, CertificateError> {
    let der = pkey
        .private_key_to_pkcs8()
        .map_err(|e| CertificateError::Encoding(format!("private key export: {e}")))?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CertificateError::UnsupportedKeyType(format!("RSA key import: {e}")))
}

fn pem_bundle(
    pkey: &PKey<Private>,
    cert: &X509,
    chain: &[X509],
    passphrase: &str,
) -> Result<String, CertificateError> {
    let mut bundle = pkey
        .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
        .map_err(|e| CertificateError::Encoding(format!("encrypted key PEM: {e}")))?;
    for c in std::iter::once(cert).chain(chain) {
        let pem = c
            .to_pem()
            .map_err(|e| CertificateError::Encoding(format!("certificate PEM: {e}")))?;
        bundle.extend_from_slice(&pem);
    }
    String::from_utf8(bundle).map_err(|e| CertificateError::Encoding(e.to_string()))
}

fn formatted_issuer_name(cert: &Certificate) -> String {
    cert.tbs_certificate.issuer.to_string().replace(',', ", ")
}

fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}
