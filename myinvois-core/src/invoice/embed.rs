//! Textual splicing of the signature block into the serialized invoice.
//!
//! The unsigned bytes were hashed as-is, so the document is never re-parsed
//! or re-serialized here: fragments are inserted at byte offsets only.
use thiserror::Error;

use crate::invoice::constants::{CAC_SIGNATURE_TEMPLATE, SUPPLIER_PARTY_ANCHOR};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    #[error("the element {anchor} was not found in the document")]
    AnchorNotFound { anchor: String },
    #[error("the document has no opening tag to insert after")]
    MissingOpeningTag,
}

/// Insert `fragment` right after the first `>` of `document`.
pub fn insert_after_opening_tag(document: &str, fragment: &str) -> Result<String, EmbedError> {
    let position = document.find('>').ok_or(EmbedError::MissingOpeningTag)? + 1;
    Ok(splice(document, position, fragment))
}

/// Insert `fragment` right before the first occurrence of `anchor`.
pub fn insert_before_anchor(
    document: &str,
    anchor: &str,
    fragment: &str,
) -> Result<String, EmbedError> {
    let position = document
        .find(anchor)
        .ok_or_else(|| EmbedError::AnchorNotFound {
            anchor: anchor.to_string(),
        })?;
    Ok(splice(document, position, fragment))
}

/// Place the extension block after the root opening tag and the
/// `cac:Signature` stub before `cac:AccountingSupplierParty`.
///
/// # Errors
/// [`EmbedError::AnchorNotFound`] when the supplier party element is absent.
/// Nothing is returned in that case, so no half-signed document escapes.
pub fn embed_signature(document: &str, extension_fragment: &str) -> Result<String, EmbedError> {
    let with_extensions = insert_after_opening_tag(document, extension_fragment)?;
    insert_before_anchor(
        &with_extensions,
        SUPPLIER_PARTY_ANCHOR,
        CAC_SIGNATURE_TEMPLATE.trim(),
    )
}

fn splice(document: &str, position: usize, fragment: &str) -> String {
    let mut out = String::with_capacity(document.len() + fragment.len());
    out.push_str(&document[..position]);
    out.push_str(fragment);
    out.push_str(&document[position..]);
    out
}
