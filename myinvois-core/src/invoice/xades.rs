//! XAdES `SignedProperties` and the `UBLExtensions` signature block.
use quick_xml::escape::partial_escape;

use crate::certificate::SigningCertificate;
use crate::invoice::canonical::sha256_base64;
use crate::invoice::constants::{SIGNED_PROPERTIES_TEMPLATE, UBL_EXTENSIONS_TEMPLATE};

/// XAdES metadata bound to one signing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedProperties {
    signing_time: String,
    cert_digest: String,
    issuer_name: String,
    serial_number: String,
}

impl SignedProperties {
    pub fn new(
        signing_time: impl Into<String>,
        cert_digest: impl Into<String>,
        issuer_name: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            signing_time: signing_time.into(),
            cert_digest: cert_digest.into(),
            issuer_name: issuer_name.into(),
            serial_number: serial_number.into(),
        }
    }

    pub fn for_certificate(certificate: &SigningCertificate, signing_time: &str) -> Self {
        Self::new(
            signing_time,
            certificate.fingerprint(),
            certificate.issuer_name(),
            certificate.serial_number(),
        )
    }

    pub fn signing_time(&self) -> &str {
        &self.signing_time
    }

    pub fn cert_digest(&self) -> &str {
        &self.cert_digest
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// The single-line fragment whose bytes are hashed. Any whitespace change
    /// here changes the digest.
    pub fn to_xml_string(&self) -> String {
        let issuer_name = partial_escape(self.issuer_name.as_str());
        fill(
            SIGNED_PROPERTIES_TEMPLATE.trim(),
            &[
                ("signing_time", self.signing_time.as_str()),
                ("cert_digest", self.cert_digest.as_str()),
                ("issuer_name", &*issuer_name),
                ("serial_number", self.serial_number.as_str()),
            ],
        )
    }

    /// Base64 SHA-256 of [`SignedProperties::to_xml_string`].
    pub fn digest(&self) -> String {
        sha256_base64(self.to_xml_string().as_bytes())
    }
}

/// Everything embedded in the `ext:UBLExtensions` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    document_digest: String,
    properties_digest: String,
    signature: String,
    certificate_base64: String,
    properties: SignedProperties,
}

impl SignatureBlock {
    /// Binds the document digest, the signature over the document and the
    /// signing certificate. The properties digest is derived here.
    pub fn assemble(
        document_digest: impl Into<String>,
        signature: impl Into<String>,
        certificate_base64: impl Into<String>,
        properties: SignedProperties,
    ) -> Self {
        let properties_digest = properties.digest();
        Self {
            document_digest: document_digest.into(),
            properties_digest,
            signature: signature.into(),
            certificate_base64: certificate_base64.into(),
            properties,
        }
    }

    pub fn document_digest(&self) -> &str {
        &self.document_digest
    }

    pub fn properties_digest(&self) -> &str {
        &self.properties_digest
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn certificate_base64(&self) -> &str {
        &self.certificate_base64
    }

    pub fn properties(&self) -> &SignedProperties {
        &self.properties
    }

    /// The template collapsed onto one line and then filled, so substituted
    /// values are never touched by the whitespace collapsing.
    pub fn to_fragment(&self) -> String {
        let issuer_name = partial_escape(self.properties.issuer_name.as_str());
        fill(
            &collapse(UBL_EXTENSIONS_TEMPLATE),
            &[
                ("doc_hash", self.document_digest.as_str()),
                ("prop_cert_base64", self.properties_digest.as_str()),
                ("signature", self.signature.as_str()),
                ("certificate_base64", self.certificate_base64.as_str()),
                ("signing_time", self.properties.signing_time.as_str()),
                ("cert_digest", self.properties.cert_digest.as_str()),
                ("issuer_name", &*issuer_name),
                ("serial_number", self.properties.serial_number.as_str()),
            ],
        )
    }
}

/// Drops newlines and indentation from a template.
///
/// Assumes the template has no double spaces or `"> <"` inside text content
/// and even-width indentation.
pub(crate) fn collapse(xml: &str) -> String {
    xml.replace(['\n', '\r'], "")
        .replace("  ", "")
        .replace("> <", "><")
        .trim()
        .to_string()
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}
