pub(crate) const INVOICE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub(crate) const CBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub(crate) const EXT_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";

/// Opening tag the signature stub is inserted in front of.
pub const SUPPLIER_PARTY_ANCHOR: &str = "<cac:AccountingSupplierParty>";

pub(crate) const UBL_EXTENSIONS_TEMPLATE: &str =
    include_str!("../../assets/templates/ubl_extensions.xml");
pub(crate) const SIGNED_PROPERTIES_TEMPLATE: &str =
    include_str!("../../assets/templates/signed_properties.xml");
pub(crate) const CAC_SIGNATURE_TEMPLATE: &str =
    include_str!("../../assets/templates/cac_signature.xml");
