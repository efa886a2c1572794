use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use myinvois_core::{
    api::SubmissionClient,
    certificate::SigningCertificate,
    config::{Config, IntegrationType},
    credentials::{ClientCredentialsRefresher, CredentialManager, FileTokenStore},
    invoice::{InvoiceLine, InvoiceSigner, canonicalize, sha256_hex},
    pipeline::SubmissionService,
    store::{Attachment, DirectoryRecordStore, QrCodeGenerator, StoreError, SubmissionStatus},
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "myinvois=info,myinvois_core=info";

#[derive(Parser)]
#[command(name = "myinvois")]
#[command(about = "Sign and submit MyInvois UBL e-invoices")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 of the canonical invoice.
    Hash {
        #[arg(long)]
        invoice: PathBuf,
        /// Print the base64 digest used in signatures instead of hex.
        #[arg(long)]
        base64: bool,
    },
    /// Sign an invoice with a PKCS#12 identity.
    Sign {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        certificate: Option<PathBuf>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Submit an invoice and poll its status once.
    Submit {
        #[arg(long)]
        invoice: PathBuf,
        /// Defaults to the invoice's cbc:ID.
        #[arg(long)]
        invoice_number: Option<String>,
        /// Invoice line as `ITEM_CODE` or `ITEM_CODE=TAX_TEMPLATE`.
        #[arg(long = "item")]
        items: Vec<String>,
        #[arg(long)]
        integration: Option<String>,
    },
    /// Re-poll the stored submission of an invoice.
    Status {
        #[arg(long)]
        invoice_number: String,
    },
}

/// Stores the QR payload as plain text; hosts with an image renderer plug
/// in their own generator.
struct TextQrCode;

impl QrCodeGenerator for TextQrCode {
    fn extension(&self) -> &str {
        "txt"
    }

    fn render(
        &self,
        invoice_number: &str,
        status: SubmissionStatus,
        submission_uid: Option<&str>,
    ) -> Result<Attachment, StoreError> {
        let payload = format!(
            "invoice={invoice_number}\nstatus={status}\nsubmission_uid={}\n",
            submission_uid.unwrap_or_default()
        );
        Ok(Attachment::new(format!("QR-{invoice_number}.txt"), payload))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Hash { invoice, base64 } => {
            let canonical = read_canonical(&invoice)?;
            if base64 {
                println!("{}", canonical.digest());
            } else {
                println!("{}", sha256_hex(canonical.as_bytes()));
            }
        }
        Commands::Sign {
            invoice,
            certificate,
            password,
            output,
        } => {
            let signer = signer_from(&config, certificate, password)?;
            let canonical = read_canonical(&invoice)?;
            let signed = signer.sign(&canonical)?;
            match output {
                Some(path) => std::fs::write(&path, signed.xml())
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{}", signed.xml()),
            }
        }
        Commands::Submit {
            invoice,
            invoice_number,
            items,
            integration,
        } => {
            let config = match integration {
                Some(value) => config.with_integration(IntegrationType::from_str(&value)?),
                None => config,
            };
            let xml = std::fs::read(&invoice)
                .with_context(|| format!("failed to read {}", invoice.display()))?;
            let invoice_number = match invoice_number {
                Some(number) => number,
                None => canonicalize(&xml)?.invoice_id()?,
            };
            let lines: Vec<InvoiceLine> = items.iter().map(String::as_str).map(parse_line).collect();

            let service = build_service(config)?.load_signer()?;
            let outcome = runtime()?.block_on(service.submit_document(&invoice_number, &xml, &lines))?;
            let record = outcome.record();
            println!(
                "{} {} {}",
                record.invoice_number,
                record.status,
                record.submission_uid.as_deref().unwrap_or("-")
            );
            if let Some(log) = outcome.status_log() {
                println!("status: {}", log.status);
            }
        }
        Commands::Status { invoice_number } => {
            let service = build_service(config)?;
            let log = runtime()?.block_on(service.refresh_status_log(&invoice_number))?;
            println!("{} {} {}", log.invoice_number, log.submission_uid, log.status);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_toml_file(path)?),
        None => Ok(Config::default()),
    }
}

fn read_canonical(path: &Path) -> Result<myinvois_core::invoice::CanonicalDocument> {
    let xml =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(canonicalize(&xml)?)
}

fn signer_from(
    config: &Config,
    certificate: Option<PathBuf>,
    password: Option<String>,
) -> Result<InvoiceSigner> {
    let path = match certificate.as_deref().or(config.certificate_path()) {
        Some(path) => path.to_path_buf(),
        None => bail!("no certificate given; pass --certificate or set certificate_path"),
    };
    let password = match password.as_deref().or(config.certificate_password()) {
        Some(password) => password.to_string(),
        None => bail!("no certificate password given; pass --password or set certificate_password"),
    };
    let certificate = SigningCertificate::from_pkcs12_file(&path, &password)?;
    Ok(InvoiceSigner::new(certificate))
}

fn parse_line(item: &str) -> InvoiceLine {
    match item.split_once('=') {
        Some((code, template)) => InvoiceLine {
            item_code: code.to_string(),
            item_tax_template: Some(template.to_string()),
        },
        None => InvoiceLine {
            item_code: item.to_string(),
            item_tax_template: None,
        },
    }
}

fn build_service(config: Config) -> Result<SubmissionService> {
    let work_dir = config.work_dir().to_path_buf();
    let tokens = Arc::new(FileTokenStore::new(work_dir.join("access_token")));
    let refresher = Arc::new(ClientCredentialsRefresher::from_config(&config)?);
    let credentials = Arc::new(CredentialManager::new(tokens, refresher));
    let client = SubmissionClient::new(&config, credentials)?;
    let store = Arc::new(DirectoryRecordStore::new(work_dir.join("records")));
    Ok(SubmissionService::new(
        config,
        client,
        store,
        Arc::new(TextQrCode),
    ))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
