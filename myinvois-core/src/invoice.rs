//! UBL invoice processing: canonical hashing, XAdES signing and embedding.
pub mod canonical;
pub mod constants;
pub mod embed;
pub mod pretty;
pub mod sign;
pub mod validation;
pub mod xades;

pub use canonical::{CanonicalDocument, XmlError, canonicalize, sha256_base64, sha256_hex};
pub use embed::{EmbedError, embed_signature, insert_after_opening_tag, insert_before_anchor};
pub use pretty::pretty_print;
pub use sign::{InvoiceSigner, SignedDocument, SigningError, sign_bytes};
pub use validation::{
    InvoiceLine, TaxTemplateMode, ValidationError, ValidationIssue, ValidationKind,
    validate_tax_templates,
};
pub use xades::{SignatureBlock, SignedProperties};
