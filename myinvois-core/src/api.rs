//! MyInvois document-submission API client and response types.
use base64ct::{Base64, Encoding};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    config::Config,
    credentials::{BearerToken, CredentialError, CredentialManager},
    invoice::canonical::sha256_hex,
    store::SubmissionStatus,
};

const SUBMISSIONS_PATH: &str = "api/v1.0/documentsubmissions";

/// Errors returned by the submission client.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("unauthorized after token refresh (token {token}): {body}")]
    Authentication {
        /// Fingerprint of the refreshed token that was rejected.
        token: String,
        body: String,
    },
    #[error("status of submission {submission_uid} has no document summary")]
    MissingSummary { submission_uid: String },
    #[error("invalid response (status {status}): {body}")]
    InvalidResponse { status: u16, body: String },
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("HTTP client error: {0}")]
    Client(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl SubmissionError {
    /// Timeouts may be retried by the caller; nothing is retried here.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SubmissionError::Timeout { .. })
    }
}

/// One document entry of a submission POST.
///
/// The hash is taken over exactly the bytes that are transmitted, which is
/// independent of the XAdES document digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    format: &'static str,
    document_hash: String,
    code_number: String,
    document: String,
}

impl SubmissionRequest {
    pub fn new(document: &[u8], code_number: u64) -> Self {
        Self {
            format: "XML",
            document_hash: sha256_hex(document),
            code_number: code_number.to_string(),
            document: Base64::encode_string(document),
        }
    }

    pub fn document_hash(&self) -> &str {
        &self.document_hash
    }

    pub fn code_number(&self) -> &str {
        &self.code_number
    }

    pub fn document_base64(&self) -> &str {
        &self.document
    }

    /// The JSON body posted to the API.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "documents": [self] })
    }
}

/// Classified outcome of a submission POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResponse {
    status: SubmissionStatus,
    submission_uid: Option<String>,
    http_status: u16,
    raw: String,
}

impl SubmissionResponse {
    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    pub fn submission_uid(&self) -> Option<&str> {
        self.submission_uid.as_deref()
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Classify a submission response body.
///
/// A non-empty `submissionUid` means `Approved` and its absence `Rejected`,
/// whatever the HTTP status. Bodies that are not JSON objects are rejected
/// with [`SubmissionError::InvalidResponse`].
pub fn classify_submission(
    http_status: u16,
    body: &str,
) -> Result<SubmissionResponse, SubmissionError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|_| SubmissionError::InvalidResponse {
            status: http_status,
            body: body.to_string(),
        })?;
    if !value.is_object() {
        return Err(SubmissionError::InvalidResponse {
            status: http_status,
            body: body.to_string(),
        });
    }
    let submission_uid = value
        .get("submissionUid")
        .and_then(|uid| uid.as_str())
        .filter(|uid| !uid.is_empty())
        .map(str::to_string);
    let status = if submission_uid.is_some() {
        SubmissionStatus::Approved
    } else {
        SubmissionStatus::Rejected
    };
    Ok(SubmissionResponse {
        status,
        submission_uid,
        http_status,
        raw: body.to_string(),
    })
}

/// One entry of the `documentSummary` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    uuid: Option<String>,
    internal_id: Option<String>,
    status: Option<String>,
}

impl DocumentSummary {
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn internal_id(&self) -> Option<&str> {
        self.internal_id.as_deref()
    }

    /// Reported status, `Unknown` when the entry carries none.
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    overall_status: Option<String>,
    #[serde(default)]
    document_summary: Option<Vec<DocumentSummary>>,
}

/// Body of a successful status GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    submission_uid: String,
    overall_status: Option<String>,
    document_summary: Vec<DocumentSummary>,
    raw: String,
}

impl StatusResponse {
    pub fn submission_uid(&self) -> &str {
        &self.submission_uid
    }

    pub fn overall_status(&self) -> Option<&str> {
        self.overall_status.as_deref()
    }

    pub fn document_summary(&self) -> &[DocumentSummary] {
        &self.document_summary
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Status of the first summary entry, if any.
    pub fn current_status(&self) -> Option<&str> {
        self.document_summary.first().map(DocumentSummary::status)
    }

    /// Like [`StatusResponse::current_status`] for callers that need a value.
    ///
    /// # Errors
    /// [`SubmissionError::MissingSummary`] when the summary list is empty.
    pub fn require_status(&self) -> Result<&str, SubmissionError> {
        self.current_status()
            .ok_or_else(|| SubmissionError::MissingSummary {
                submission_uid: self.submission_uid.clone(),
            })
    }
}

/// MyInvois submission client.
///
/// Every request carries the bearer token held by the shared
/// [`CredentialManager`]. A 401 triggers one refresh and one resend; a second
/// 401 is terminal.
///
/// # Examples
/// ```rust,no_run
/// use std::sync::Arc;
/// use myinvois_core::api::{SubmissionClient, SubmissionRequest};
/// use myinvois_core::config::Config;
/// use myinvois_core::credentials::{
///     ClientCredentialsRefresher, CredentialManager, FileTokenStore,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default().with_client_credentials("id", "secret");
/// let credentials = Arc::new(CredentialManager::new(
///     Arc::new(FileTokenStore::new("./work/token")),
///     Arc::new(ClientCredentialsRefresher::from_config(&config)?),
/// ));
/// let client = SubmissionClient::new(&config, credentials)?;
/// let response = client
///     .submit(&SubmissionRequest::new(b"<Invoice/>", 1))
///     .await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SubmissionClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
}

// Public API
impl SubmissionClient {
    /// # Errors
    /// Returns [`SubmissionError::Client`] if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, SubmissionError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SubmissionError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Post one document and classify the response.
    ///
    /// # Errors
    /// Transport failures, timeouts and a terminal 401 are surfaced; only
    /// the unauthorized case is retried, once.
    pub async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<SubmissionResponse, SubmissionError> {
        let url = self.build_endpoint(SUBMISSIONS_PATH);
        let payload = request.payload();
        let (status, body) = self
            .send_authorized(&url, |token| {
                self.client
                    .post(&url)
                    .header("Accept", "application/json")
                    .bearer_auth(token.as_str())
                    .json(&payload)
            })
            .await?;

        if status != StatusCode::OK {
            tracing::warn!(
                status = status.as_u16(),
                "submission returned non-200 status; classifying by body"
            );
        }
        let response = classify_submission(status.as_u16(), &body)?;
        tracing::info!(
            status = %response.status(),
            submission_uid = response.submission_uid().unwrap_or_default(),
            code_number = request.code_number(),
            document_hash = request.document_hash(),
            "document submitted"
        );
        Ok(response)
    }

    /// Fetch the status of a submission.
    ///
    /// # Errors
    /// Non-200 responses become [`SubmissionError::UnexpectedStatus`] carrying
    /// the body.
    pub async fn fetch_status(
        &self,
        submission_uid: &str,
    ) -> Result<StatusResponse, SubmissionError> {
        let url = self.build_endpoint(&format!("{SUBMISSIONS_PATH}/{submission_uid}"));
        let (status, body) = self
            .send_authorized(&url, |token| {
                self.client
                    .get(&url)
                    .header("Accept", "application/json")
                    .bearer_auth(token.as_str())
            })
            .await?;

        if status != StatusCode::OK {
            tracing::error!(
                submission_uid,
                status = status.as_u16(),
                body = %body,
                "status request failed"
            );
            return Err(SubmissionError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: StatusBody =
            serde_json::from_str(&body).map_err(|_| SubmissionError::InvalidResponse {
                status: status.as_u16(),
                body: body.clone(),
            })?;
        Ok(StatusResponse {
            submission_uid: submission_uid.to_string(),
            overall_status: parsed.overall_status,
            document_summary: parsed.document_summary.unwrap_or_default(),
            raw: body,
        })
    }
}

// Private API
impl SubmissionClient {
    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_authorized<F>(
        &self,
        url: &str,
        build: F,
    ) -> Result<(StatusCode, String), SubmissionError>
    where
        F: Fn(&BearerToken) -> RequestBuilder,
    {
        let token = self.credentials.current().await?;
        let (status, body) = send(url, build(&token)).await?;
        if status != StatusCode::UNAUTHORIZED {
            return Ok((status, body));
        }

        tracing::warn!(url, token = %token.fingerprint(), "unauthorized; refreshing token");
        let refreshed = self.credentials.refresh_after_unauthorized(&token).await?;
        let (status, body) = send(url, build(&refreshed)).await?;
        if status == StatusCode::UNAUTHORIZED {
            tracing::error!(
                url,
                stale = %token.fingerprint(),
                token = %refreshed.fingerprint(),
                body = %body,
                "unauthorized after token refresh"
            );
            return Err(SubmissionError::Authentication {
                token: refreshed.fingerprint(),
                body,
            });
        }
        Ok((status, body))
    }
}

async fn send(url: &str, request: RequestBuilder) -> Result<(StatusCode, String), SubmissionError> {
    let response = request.send().await.map_err(|e| transport_error(url, e))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(url, e))?;
    Ok((status, body))
}

fn transport_error(url: &str, err: reqwest::Error) -> SubmissionError {
    if err.is_timeout() {
        tracing::error!(url, "request timed out");
        SubmissionError::Timeout {
            url: url.to_string(),
        }
    } else {
        tracing::error!(url, error = %err, "request failed");
        SubmissionError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
