//! Canonical XML serialization and document hashing.
use base64ct::{Base64, Encoding};
use libxml::{
    parser::{Parser, ParserOptions},
    tree::{Document, c14n},
    xpath,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::invoice::constants::{CBC_NS, EXT_NS, INVOICE_NS};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("failed to canonicalize XML: {0}")]
    Canonicalization(String),
    #[error("XPath error: {0}")]
    XPath(String),
    #[error("failed to format XML: {0}")]
    Format(String),
}

/// The C14N 1.1 byte form of an invoice together with its SHA-256 digest.
///
/// The digest is always computed over [`CanonicalDocument::as_bytes`]; two
/// structurally identical inputs produce the same bytes and the same digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDocument {
    xml: String,
    digest: String,
}

impl CanonicalDocument {
    pub fn as_str(&self) -> &str {
        &self.xml
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.xml.as_bytes()
    }

    /// Base64 of the SHA-256 digest of the canonical bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn into_string(self) -> String {
        self.xml
    }

    /// Value of the root `cbc:ID` element.
    pub fn invoice_id(&self) -> Result<String, XmlError> {
        let doc = parse_document(self.as_bytes())?;
        let ctx = namespaced_context(&doc)?;
        xpath_text(&ctx, "/ubl:Invoice/cbc:ID", "invoice ID")
    }

    /// Whether the document already carries a `UBLExtensions` block under its root.
    pub fn has_extensions(&self) -> Result<bool, XmlError> {
        let doc = parse_document(self.as_bytes())?;
        let ctx = namespaced_context(&doc)?;
        let nodes = ctx
            .evaluate("/*/ext:UBLExtensions")
            .map_err(|e| XmlError::XPath(format!("{e:?}")))?
            .get_nodes_as_vec();
        Ok(!nodes.is_empty())
    }
}

/// Parse `xml` and re-serialize it as C14N 1.1 without comments.
///
/// # Errors
/// Returns [`XmlError::Malformed`] if the buffer is not UTF-8 or not well-formed.
pub fn canonicalize(xml: &[u8]) -> Result<CanonicalDocument, XmlError> {
    let doc = parse_document(xml)?;
    let canon_opts = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::Canonical1_1,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    let canonical = doc
        .canonicalize(canon_opts, None)
        .map_err(|e| XmlError::Canonicalization(format!("{e:?}")))?;
    let digest = sha256_base64(canonical.as_bytes());
    tracing::debug!(bytes = canonical.len(), digest = %digest, "canonicalized invoice");
    Ok(CanonicalDocument {
        xml: canonical,
        digest,
    })
}

pub fn sha256_base64(bytes: &[u8]) -> String {
    Base64::encode_string(&Sha256::digest(bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn parse_document(xml: &[u8]) -> Result<Document, XmlError> {
    std::str::from_utf8(xml).map_err(|e| XmlError::Malformed(format!("invalid UTF-8: {e}")))?;
    let options = ParserOptions {
        recover: false,
        no_net: true,
        no_error: true,
        no_warning: true,
        ..Default::default()
    };
    Parser::default()
        .parse_string_with_options(xml, options)
        .map_err(|e| XmlError::Malformed(format!("{e:?}")))
}

fn namespaced_context(doc: &Document) -> Result<xpath::Context, XmlError> {
    let ctx = xpath::Context::new(doc).map_err(|e| XmlError::XPath(format!("{e:?}")))?;
    for (prefix, ns) in [("ubl", INVOICE_NS), ("cbc", CBC_NS), ("ext", EXT_NS)] {
        ctx.register_namespace(prefix, ns)
            .map_err(|e| XmlError::XPath(format!("{e:?}")))?;
    }
    Ok(ctx)
}

fn xpath_text(ctx: &xpath::Context, expr: &str, label: &str) -> Result<String, XmlError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| XmlError::XPath(format!("XPath error for {label}: {e:?}")))?
        .get_nodes_as_vec();
    let node = nodes
        .first()
        .ok_or_else(|| XmlError::XPath(format!("missing {label} in invoice XML")))?;
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        return Err(XmlError::XPath(format!("empty {label} in invoice XML")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2" xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2">
  <!-- generated -->
  <cbc:ID>INV-0001</cbc:ID>
  <cbc:InvoiceTypeCode listVersionID="1.0">01</cbc:InvoiceTypeCode>
  <cac:AccountingSupplierParty/>
</Invoice>"#;

    #[test]
    fn canonical_form_drops_declaration_and_comments() {
        let canonical = canonicalize(INVOICE.as_bytes()).expect("canonicalize");
        assert!(canonical.as_str().starts_with("<Invoice "));
        assert!(!canonical.as_str().contains("<?xml"));
        assert!(!canonical.as_str().contains("generated"));
        assert!(
            canonical
                .as_str()
                .contains("<cac:AccountingSupplierParty></cac:AccountingSupplierParty>")
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let first = canonicalize(INVOICE.as_bytes()).expect("first pass");
        let second = canonicalize(first.as_bytes()).expect("second pass");
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn attribute_order_does_not_change_the_digest() {
        let a = r#"<a xmlns="urn:x" one="1" two="2"><b/></a>"#;
        let b = r#"<a two="2" xmlns="urn:x" one="1"><b></b></a>"#;
        let left = canonicalize(a.as_bytes()).expect("left");
        let right = canonicalize(b.as_bytes()).expect("right");
        assert_eq!(left.as_str(), right.as_str());
        assert_eq!(left.digest(), right.digest());
    }

    #[test]
    fn digest_is_sha256_of_canonical_bytes() {
        let canonical = canonicalize(INVOICE.as_bytes()).expect("canonicalize");
        let expected = Base64::encode_string(&Sha256::digest(canonical.as_bytes()));
        assert_eq!(canonical.digest(), expected);
    }

    #[test]
    fn one_byte_change_changes_the_digest() {
        let other = INVOICE.replace("INV-0001", "INV-0002");
        let left = canonicalize(INVOICE.as_bytes()).expect("left");
        let right = canonicalize(other.as_bytes()).expect("right");
        assert_ne!(left.digest(), right.digest());
    }

    #[test]
    fn malformed_xml_is_rejected() {
        let err = canonicalize(b"<Invoice><cbc:ID>1</Invoice>").expect_err("malformed");
        assert!(matches!(err, XmlError::Malformed(_)));

        let err = canonicalize(&[0x3c, 0xff, 0xfe, 0x3e]).expect_err("not utf-8");
        assert!(matches!(err, XmlError::Malformed(_)));
    }

    #[test]
    fn invoice_id_and_extension_lookup() {
        let canonical = canonicalize(INVOICE.as_bytes()).expect("canonicalize");
        assert_eq!(canonical.invoice_id().expect("id"), "INV-0001");
        assert!(!canonical.has_extensions().expect("lookup"));
    }

    #[test]
    fn hex_digest_is_lowercase_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
