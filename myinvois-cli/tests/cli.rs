use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use base64ct::{Base64, Encoding};
use myinvois_core::invoice::{canonicalize, sha256_hex};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkcs12::Pkcs12,
    pkey::PKey,
    rsa::Rsa,
    x509::{X509, X509NameBuilder},
};
use sha2::{Digest, Sha256};

const PASSWORD: &str = "cli-password";

fn cli_exe() -> &'static str {
    env!("CARGO_BIN_EXE_myinvois")
}

fn invoice_fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("myinvois-core")
        .join("tests")
        .join("fixtures")
        .join("invoices")
        .join("sample-invoice.xml")
}

fn run(args: &[&str]) -> Output {
    Command::new(cli_exe())
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("run cli")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("utf-8 stdout")
}

fn write_pkcs12(dir: &Path) -> PathBuf {
    let key = PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey");
    let mut name = X509NameBuilder::new().expect("name");
    name.append_entry_by_text("C", "MY").expect("C");
    name.append_entry_by_text("CN", "CLI Test Signer").expect("CN");
    let name = name.build();

    let mut builder = X509::builder().expect("builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(42)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(30).expect("time"))
        .expect("not after");
    builder.sign(&key, MessageDigest::sha256()).expect("sign");
    let cert = builder.build();

    let der = Pkcs12::builder()
        .name("cli")
        .pkey(&key)
        .cert(&cert)
        .build2(PASSWORD)
        .expect("pkcs12")
        .to_der()
        .expect("der");
    let path = dir.join("signer.p12");
    std::fs::write(&path, der).expect("write p12");
    path
}

fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("myinvois.toml");
    let work = dir.join("work");
    let contents = format!(
        "integration = \"sandbox\"\nbase_url = \"http://127.0.0.1:9\"\nwork_dir = \"{}\"\n{extra}",
        work.display()
    );
    std::fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn hash_command_prints_hex_and_base64_digests() {
    let invoice = invoice_fixture();
    let canonical = canonicalize(&std::fs::read(&invoice).expect("fixture")).expect("c14n");

    let hex = run(&["hash", "--invoice", invoice.to_str().expect("path")]);
    assert!(hex.status.success(), "{}", String::from_utf8_lossy(&hex.stderr));
    assert_eq!(stdout(&hex).trim(), sha256_hex(canonical.as_bytes()));

    let b64 = run(&["hash", "--invoice", invoice.to_str().expect("path"), "--base64"]);
    assert!(b64.status.success());
    assert_eq!(
        stdout(&b64).trim(),
        Base64::encode_string(&Sha256::digest(canonical.as_bytes()))
    );
}

#[test]
fn sign_command_writes_signed_invoice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let p12 = write_pkcs12(dir.path());
    let output_path = dir.path().join("signed.xml");
    let invoice = invoice_fixture();

    let output = run(&[
        "sign",
        "--invoice",
        invoice.to_str().expect("path"),
        "--certificate",
        p12.to_str().expect("path"),
        "--password",
        PASSWORD,
        "--output",
        output_path.to_str().expect("path"),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let signed = std::fs::read_to_string(&output_path).expect("signed output");
    let canonical = canonicalize(&std::fs::read(&invoice).expect("fixture")).expect("c14n");
    assert!(signed.contains("<ext:UBLExtensions>"));
    assert!(signed.contains(&format!("<ds:DigestValue>{}</ds:DigestValue>", canonical.digest())));
    assert!(signed.contains("<cac:Signature>"));
}

#[test]
fn sign_command_rejects_wrong_password() {
    let dir = tempfile::tempdir().expect("tempdir");
    let p12 = write_pkcs12(dir.path());
    let output = run(&[
        "sign",
        "--invoice",
        invoice_fixture().to_str().expect("path"),
        "--certificate",
        p12.to_str().expect("path"),
        "--password",
        "wrong",
    ]);
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn submit_requires_client_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "");
    let output = run(&[
        "--config",
        config.to_str().expect("path"),
        "submit",
        "--invoice",
        invoice_fixture().to_str().expect("path"),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("client"), "{stderr}");
}

#[test]
fn status_for_unknown_invoice_fails_without_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        dir.path(),
        "client_id = \"id\"\nclient_secret = \"secret\"\n",
    );
    let output = run(&[
        "--config",
        config.to_str().expect("path"),
        "status",
        "--invoice-number",
        "UNKNOWN-1",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("UNKNOWN-1"), "{stderr}");
}
