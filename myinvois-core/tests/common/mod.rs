use httpmock::MockServer;
use myinvois_core::store::{Attachment, QrCodeGenerator, StoreError, SubmissionStatus};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509, X509NameBuilder},
};
use std::path::PathBuf;

#[allow(dead_code)]
pub const PASSWORD: &str = "test-password";

#[allow(dead_code)]
pub const SERIAL: u32 = 7_000_123;

#[allow(dead_code)]
pub fn sample_invoice_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("invoices")
        .join("sample-invoice.xml")
}

#[allow(dead_code)]
pub fn sample_invoice() -> Vec<u8> {
    std::fs::read(sample_invoice_path()).expect("read sample invoice")
}

#[allow(dead_code)]
pub fn rsa_key() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("generate RSA key");
    PKey::from_rsa(rsa).expect("wrap RSA key")
}

#[allow(dead_code)]
pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let ec = EcKey::generate(&group).expect("generate EC key");
    PKey::from_ec_key(ec).expect("wrap EC key")
}

/// Self-signed certificate issued by `C=MY, O=LHDNM, CN=Trial LHDNM Sub CA V1`.
#[allow(dead_code)]
pub fn self_signed_cert(key: &PKey<Private>) -> X509 {
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("C", "MY").expect("C");
    name.append_entry_by_text("O", "LHDNM").expect("O");
    name.append_entry_by_text("CN", "Trial LHDNM Sub CA V1")
        .expect("CN");
    let name = name.build();

    let mut builder = X509::builder().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(SERIAL)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("set not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not after"))
        .expect("set not after");
    builder.sign(key, MessageDigest::sha256()).expect("sign cert");
    builder.build()
}

#[allow(dead_code)]
pub fn pkcs12_der(key: &PKey<Private>, cert: &X509, password: &str) -> Vec<u8> {
    Pkcs12::builder()
        .name("myinvois-test")
        .pkey(key)
        .cert(cert)
        .build2(password)
        .expect("build PKCS#12")
        .to_der()
        .expect("encode PKCS#12")
}

/// An RSA identity bundled as PKCS#12, with its certificate.
#[allow(dead_code)]
pub fn rsa_bundle() -> (Vec<u8>, X509) {
    let key = rsa_key();
    let cert = self_signed_cert(&key);
    (pkcs12_der(&key, &cert, PASSWORD), cert)
}

#[allow(dead_code)]
pub fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}

/// Writes the QR payload as text so tests can inspect it.
#[allow(dead_code)]
pub struct TextQr;

impl QrCodeGenerator for TextQr {
    fn render(
        &self,
        invoice_number: &str,
        status: SubmissionStatus,
        submission_uid: Option<&str>,
    ) -> Result<Attachment, StoreError> {
        Ok(Attachment::new(
            format!("QR-{invoice_number}.png"),
            format!("{invoice_number}|{status}|{}", submission_uid.unwrap_or_default()),
        ))
    }
}
