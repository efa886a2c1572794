//! End-to-end submission of one invoice: validate, hash, sign, submit, poll.
use chrono::Utc;
use std::sync::Arc;

use crate::{
    Error,
    api::{SubmissionClient, SubmissionError, SubmissionRequest},
    artifacts::{PEM_ARTIFACT, RunArtifacts, SIGNED_ARTIFACT, UNSIGNED_ARTIFACT},
    certificate::SigningCertificate,
    config::{Config, ConfigError},
    invoice::{
        InvoiceLine, InvoiceSigner, TaxTemplateMode, canonicalize, pretty_print,
        validate_tax_templates,
    },
    store::{
        Attachment, ErrorLogEntry, QrCodeGenerator, RecordStore, StatusLogRecord, StoreError,
        SubmissionRecord,
    },
};

/// Title of error-log entries written when status polling fails.
pub const STATUS_ERROR_TITLE: &str = "MyInvois status polling failed";

/// Result of [`SubmissionService::submit_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    record: SubmissionRecord,
    tax_mode: TaxTemplateMode,
    signed: bool,
    status_log: Option<StatusLogRecord>,
}

impl SubmissionOutcome {
    pub fn record(&self) -> &SubmissionRecord {
        &self.record
    }

    pub fn tax_mode(&self) -> TaxTemplateMode {
        self.tax_mode
    }

    /// Whether the transmitted document carried a XAdES signature.
    pub fn signed(&self) -> bool {
        self.signed
    }

    /// The polled status, `None` when polling was skipped or failed.
    pub fn status_log(&self) -> Option<&StatusLogRecord> {
        self.status_log.as_ref()
    }
}

/// Runs the submission pipeline against one record store.
///
/// The signer and the credential state behind the client are shared by all
/// invoices; everything written to disk is scoped to the invoice.
pub struct SubmissionService {
    config: Config,
    client: SubmissionClient,
    store: Arc<dyn RecordStore>,
    qr: Arc<dyn QrCodeGenerator>,
    signer: Option<Arc<InvoiceSigner>>,
}

impl SubmissionService {
    pub fn new(
        config: Config,
        client: SubmissionClient,
        store: Arc<dyn RecordStore>,
        qr: Arc<dyn QrCodeGenerator>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            qr,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<InvoiceSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Load the configured PKCS#12 identity when the integration signs.
    ///
    /// # Errors
    /// [`ConfigError::Missing`] when production has no certificate configured.
    pub fn load_signer(mut self) -> Result<Self, Error> {
        if !self.config.integration().is_production() {
            return Ok(self);
        }
        let path = self
            .config
            .certificate_path()
            .ok_or(ConfigError::Missing("certificate_path"))?;
        let password = self
            .config
            .certificate_password()
            .ok_or(ConfigError::Missing("certificate_password"))?;
        let certificate = SigningCertificate::from_pkcs12_file(path, password)?;
        self.signer = Some(Arc::new(InvoiceSigner::new(certificate)));
        Ok(self)
    }

    pub fn client(&self) -> &SubmissionClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Submit an assembled UBL document and poll its status once.
    ///
    /// Validation, canonicalization and signing all complete before anything
    /// is sent. Polling failures are written to the error log and leave the
    /// submission record in place.
    pub async fn submit_document(
        &self,
        invoice_number: &str,
        xml: &[u8],
        lines: &[InvoiceLine],
    ) -> Result<SubmissionOutcome, Error> {
        let tax_mode = validate_tax_templates(lines)?;
        tracing::debug!(invoice_number, ?tax_mode, "invoice passed pre-flight validation");

        let canonical = canonicalize(xml)?;
        let artifacts = RunArtifacts::for_invoice(self.config.work_dir(), invoice_number)?;
        artifacts.write(UNSIGNED_ARTIFACT, canonical.as_bytes())?;

        let signed = self.config.integration().is_production();
        let document = if signed {
            let signer = self
                .signer
                .as_ref()
                .ok_or(ConfigError::Missing("certificate_path"))?;
            let _pem =
                artifacts.write_scoped(PEM_ARTIFACT, signer.certificate().pem_bundle().as_bytes())?;
            let signed_document = signer.sign(&canonical)?;
            artifacts.write(SIGNED_ARTIFACT, signed_document.xml().as_bytes())?;
            signed_document.into_string()
        } else {
            canonical.into_string()
        };

        let record = self
            .submit_prepared(invoice_number, document.as_bytes())
            .await?;

        let status_log = match record.submission_uid.as_deref() {
            Some(uid) => match self.poll_status(invoice_number, uid).await {
                Ok(log) => Some(log),
                Err(err) => {
                    self.record_poll_failure(invoice_number, &err);
                    None
                }
            },
            None => {
                tracing::warn!(invoice_number, "submission rejected; skipping status poll");
                None
            }
        };

        Ok(SubmissionOutcome {
            record,
            tax_mode,
            signed,
            status_log,
        })
    }

    /// Transmit `document` as-is and persist the outcome.
    ///
    /// Persisting overwrites the stored response, replaces the XML and QR
    /// attachments, and upserts the submission record for the invoice.
    pub async fn submit_prepared(
        &self,
        invoice_number: &str,
        document: &[u8],
    ) -> Result<SubmissionRecord, Error> {
        let code_number = self.store.next_code_number(invoice_number)?;
        let request = SubmissionRequest::new(document, code_number);
        let response = self.client.submit(&request).await?;

        self.store
            .set_submit_response(invoice_number, response.raw())?;
        let removed = self
            .store
            .remove_attachments(invoice_number, &["xml", self.qr.extension()])?;
        if removed > 0 {
            tracing::debug!(invoice_number, removed, "removed stale attachments");
        }

        let xml = String::from_utf8_lossy(document);
        let pretty = pretty_print(&xml).unwrap_or_else(|err| {
            tracing::warn!(invoice_number, error = %err, "attaching document without formatting");
            xml.to_string()
        });
        self.store.attach(
            invoice_number,
            Attachment::new(self.attachment_name(invoice_number), pretty),
        )?;
        let qr = self
            .qr
            .render(invoice_number, response.status(), response.submission_uid())?;
        self.store.attach(invoice_number, qr)?;

        let record = SubmissionRecord {
            invoice_number: invoice_number.to_string(),
            submission_uid: response.submission_uid().map(str::to_string),
            status: response.status(),
            code_number,
            raw_response: response.raw().to_string(),
            submitted_at: Utc::now(),
        };
        self.store.upsert_submission(record.clone())?;
        Ok(record)
    }

    /// Fetch the current status and upsert the invoice's status log.
    ///
    /// # Errors
    /// [`SubmissionError::MissingSummary`] when the response lists no
    /// documents.
    pub async fn poll_status(
        &self,
        invoice_number: &str,
        submission_uid: &str,
    ) -> Result<StatusLogRecord, Error> {
        let response = self.client.fetch_status(submission_uid).await?;
        let status = response.require_status()?.to_string();
        let record = StatusLogRecord {
            invoice_number: invoice_number.to_string(),
            submission_uid: submission_uid.to_string(),
            status,
            raw_response: response.raw().to_string(),
            updated_at: Utc::now(),
        };
        self.store.upsert_status_log(record.clone())?;
        tracing::info!(
            invoice_number,
            submission_uid,
            status = %record.status,
            "recorded submission status"
        );
        Ok(record)
    }

    /// Re-poll the submission behind an existing status log.
    ///
    /// A 200 updates the response and time, and the status when a summary is
    /// present. Any other HTTP status only replaces the stored response.
    /// Transport, authentication and parse failures go to the error log and
    /// leave the stored status log unchanged.
    pub async fn refresh_status_log(&self, invoice_number: &str) -> Result<StatusLogRecord, Error> {
        let mut record =
            self.store
                .status_log(invoice_number)?
                .ok_or_else(|| StoreError::NotFound {
                    invoice_number: invoice_number.to_string(),
                })?;

        match self.client.fetch_status(&record.submission_uid).await {
            Ok(response) => {
                if let Some(status) = response.current_status() {
                    record.status = status.to_string();
                }
                record.raw_response = response.raw().to_string();
                record.updated_at = Utc::now();
            }
            Err(SubmissionError::UnexpectedStatus { status, body }) => {
                tracing::warn!(invoice_number, status, "status refresh returned an error response");
                record.raw_response = body;
            }
            Err(err) => {
                let err = Error::from(err);
                self.record_poll_failure(invoice_number, &err);
                return Err(err);
            }
        }

        self.store.upsert_status_log(record.clone())?;
        Ok(record)
    }

    fn attachment_name(&self, invoice_number: &str) -> String {
        if self.config.integration().is_production() {
            format!("Submitted-{invoice_number}.xml")
        } else {
            format!("E-invoice-{invoice_number}.xml")
        }
    }

    fn record_poll_failure(&self, invoice_number: &str, err: &Error) {
        tracing::error!(invoice_number, error = %err, "status polling failed");
        let entry = ErrorLogEntry::new(STATUS_ERROR_TITLE, err.to_string(), Some(invoice_number));
        if let Err(log_err) = self.store.log_error(entry) {
            tracing::error!(invoice_number, error = %log_err, "failed to write error log");
        }
    }
}

impl std::fmt::Debug for SubmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionService")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}
