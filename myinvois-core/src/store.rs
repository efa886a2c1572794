//! Record-keeping contract for submissions, status logs and attachments.
//!
//! The host system owns invoices and their files. The pipeline only talks to
//! it through [`RecordStore`]; two implementations ship here, an in-memory
//! one and one that keeps JSON documents and attachment files in a directory.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store lock poisoned")]
    Poisoned,
    #[error("record store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record at {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt record at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("no record for invoice {invoice_number}")]
    NotFound { invoice_number: String },
    #[error("failed to render verification code: {0}")]
    Render(String),
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Approved,
    Rejected,
    Unknown,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Approved => "Approved",
            SubmissionStatus::Rejected => "Rejected",
            SubmissionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live submission record of an invoice. At most one per invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub invoice_number: String,
    pub submission_uid: Option<String>,
    pub status: SubmissionStatus,
    pub code_number: u64,
    pub raw_response: String,
    pub submitted_at: DateTime<Utc>,
}

/// Latest polled status of an invoice, keyed by invoice number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogRecord {
    pub invoice_number: String,
    pub submission_uid: String,
    /// Status string reported by the remote summary, e.g. `Valid`.
    pub status: String,
    pub raw_response: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub title: String,
    pub message: String,
    pub invoice_number: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        invoice_number: Option<&str>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            invoice_number: invoice_number.map(str::to_string),
            logged_at: Utc::now(),
        }
    }
}

/// A file handed to the host for storage against an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

pub trait RecordStore: Send + Sync {
    /// Next sequential code number (ICV) for `invoice_number`, starting at 1.
    fn next_code_number(&self, invoice_number: &str) -> Result<u64, StoreError>;

    /// Overwrite the raw submission response stored on the invoice.
    fn set_submit_response(&self, invoice_number: &str, raw: &str) -> Result<(), StoreError>;

    /// Raw submission response stored on the invoice, if any.
    fn submit_response(&self, invoice_number: &str) -> Result<Option<String>, StoreError>;

    /// Remove attachments whose extension is one of `extensions`.
    /// Returns the number of removed files.
    fn remove_attachments(
        &self,
        invoice_number: &str,
        extensions: &[&str],
    ) -> Result<usize, StoreError>;

    fn attach(&self, invoice_number: &str, attachment: Attachment) -> Result<(), StoreError>;

    fn attachments(&self, invoice_number: &str) -> Result<Vec<Attachment>, StoreError>;

    /// Insert or replace the submission record keyed by its invoice number.
    fn upsert_submission(&self, record: SubmissionRecord) -> Result<(), StoreError>;

    fn submission(&self, invoice_number: &str) -> Result<Option<SubmissionRecord>, StoreError>;

    /// Insert or replace the status log keyed by its invoice number.
    fn upsert_status_log(&self, record: StatusLogRecord) -> Result<(), StoreError>;

    fn status_log(&self, invoice_number: &str) -> Result<Option<StatusLogRecord>, StoreError>;

    fn status_logs(&self) -> Result<Vec<StatusLogRecord>, StoreError>;

    fn log_error(&self, entry: ErrorLogEntry) -> Result<(), StoreError>;

    fn errors(&self) -> Result<Vec<ErrorLogEntry>, StoreError>;
}

/// Renders the verification QR artifact attached after each submission.
pub trait QrCodeGenerator: Send + Sync {
    /// Extension of the rendered files, used to clear stale ones.
    fn extension(&self) -> &str {
        "png"
    }

    fn render(
        &self,
        invoice_number: &str,
        status: SubmissionStatus,
        submission_uid: Option<&str>,
    ) -> Result<Attachment, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    code_numbers: HashMap<String, u64>,
    responses: HashMap<String, String>,
    attachments: HashMap<String, Vec<Attachment>>,
    submissions: HashMap<String, SubmissionRecord>,
    status_logs: HashMap<String, StatusLogRecord>,
    errors: Vec<ErrorLogEntry>,
}

/// Process-local store, used by tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut state)
    }
}

impl RecordStore for MemoryRecordStore {
    fn next_code_number(&self, invoice_number: &str) -> Result<u64, StoreError> {
        self.with_state(|state| {
            let counter = state
                .code_numbers
                .entry(invoice_number.to_string())
                .or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
    }

    fn set_submit_response(&self, invoice_number: &str, raw: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .responses
                .insert(invoice_number.to_string(), raw.to_string());
            Ok(())
        })
    }

    fn submit_response(&self, invoice_number: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state| Ok(state.responses.get(invoice_number).cloned()))
    }

    fn remove_attachments(
        &self,
        invoice_number: &str,
        extensions: &[&str],
    ) -> Result<usize, StoreError> {
        self.with_state(|state| {
            let Some(files) = state.attachments.get_mut(invoice_number) else {
                return Ok(0);
            };
            let before = files.len();
            files.retain(|file| !has_extension(&file.file_name, extensions));
            Ok(before - files.len())
        })
    }

    fn attach(&self, invoice_number: &str, attachment: Attachment) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .attachments
                .entry(invoice_number.to_string())
                .or_default()
                .push(attachment);
            Ok(())
        })
    }

    fn attachments(&self, invoice_number: &str) -> Result<Vec<Attachment>, StoreError> {
        self.with_state(|state| {
            Ok(state
                .attachments
                .get(invoice_number)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn upsert_submission(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .submissions
                .insert(record.invoice_number.clone(), record);
            Ok(())
        })
    }

    fn submission(&self, invoice_number: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        self.with_state(|state| Ok(state.submissions.get(invoice_number).cloned()))
    }

    fn upsert_status_log(&self, record: StatusLogRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .status_logs
                .insert(record.invoice_number.clone(), record);
            Ok(())
        })
    }

    fn status_log(&self, invoice_number: &str) -> Result<Option<StatusLogRecord>, StoreError> {
        self.with_state(|state| Ok(state.status_logs.get(invoice_number).cloned()))
    }

    fn status_logs(&self) -> Result<Vec<StatusLogRecord>, StoreError> {
        self.with_state(|state| {
            let mut logs: Vec<_> = state.status_logs.values().cloned().collect();
            logs.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
            Ok(logs)
        })
    }

    fn log_error(&self, entry: ErrorLogEntry) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.errors.push(entry);
            Ok(())
        })
    }

    fn errors(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        self.with_state(|state| Ok(state.errors.clone()))
    }
}

/// Directory-backed store.
///
/// Layout under the root, where `<invoice>` is [`record_key`] of the invoice
/// number:
/// - `<invoice>/record.json`, `<invoice>/status.json`, `<invoice>/response.json`
/// - `<invoice>/code_number`
/// - `<invoice>/attachments/<file>`
/// - `errors.jsonl`
#[derive(Debug)]
pub struct DirectoryRecordStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn invoice_dir(&self, invoice_number: &str) -> PathBuf {
        self.root.join(record_key(invoice_number))
    }

    fn attachment_dir(&self, invoice_number: &str) -> PathBuf {
        self.invoice_dir(invoice_number).join("attachments")
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for DirectoryRecordStore {
    fn next_code_number(&self, invoice_number: &str) -> Result<u64, StoreError> {
        let _guard = self.guard()?;
        let path = self.invoice_dir(invoice_number).join("code_number");
        let current = match read_optional(&path)? {
            Some(raw) => String::from_utf8_lossy(&raw)
                .trim()
                .parse::<u64>()
                .map_err(|e| StoreError::Corrupt {
                    path: path.clone(),
                    message: format!("invalid code number: {e}"),
                })?,
            None => 0,
        };
        let next = current + 1;
        write_file(&path, next.to_string().as_bytes())?;
        Ok(next)
    }

    fn set_submit_response(&self, invoice_number: &str, raw: &str) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = self.invoice_dir(invoice_number).join("response.json");
        write_file(&path, raw.as_bytes())
    }

    fn submit_response(&self, invoice_number: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.guard()?;
        let path = self.invoice_dir(invoice_number).join("response.json");
        Ok(read_optional(&path)?.map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    fn remove_attachments(
        &self,
        invoice_number: &str,
        extensions: &[&str],
    ) -> Result<usize, StoreError> {
        let _guard = self.guard()?;
        let dir = self.attachment_dir(invoice_number);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if has_extension(&name, extensions) {
                std::fs::remove_file(&path).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn attach(&self, invoice_number: &str, attachment: Attachment) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = self
            .attachment_dir(invoice_number)
            .join(safe_component(&attachment.file_name));
        write_file(&path, &attachment.content)
    }

    fn attachments(&self, invoice_number: &str) -> Result<Vec<Attachment>, StoreError> {
        let _guard = self.guard()?;
        let dir = self.attachment_dir(invoice_number);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            let content = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            files.push(Attachment { file_name, content });
        }
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    fn upsert_submission(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = self.invoice_dir(&record.invoice_number).join("record.json");
        write_json(&path, &record)
    }

    fn submission(&self, invoice_number: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        let _guard = self.guard()?;
        read_json(&self.invoice_dir(invoice_number).join("record.json"))
    }

    fn upsert_status_log(&self, record: StatusLogRecord) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let path = self.invoice_dir(&record.invoice_number).join("status.json");
        write_json(&path, &record)
    }

    fn status_log(&self, invoice_number: &str) -> Result<Option<StatusLogRecord>, StoreError> {
        let _guard = self.guard()?;
        read_json(&self.invoice_dir(invoice_number).join("status.json"))
    }

    fn status_logs(&self) -> Result<Vec<StatusLogRecord>, StoreError> {
        let _guard = self.guard()?;
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut logs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let is_dir = entry
                .file_type()
                .map_err(|source| StoreError::Io {
                    path: entry.path(),
                    source,
                })?
                .is_dir();
            if !is_dir {
                continue;
            }
            let dir = entry.path();
            if let Some(record) = read_json::<StatusLogRecord>(&dir.join("status.json"))? {
                logs.push(record);
            }
        }
        logs.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        Ok(logs)
    }

    fn log_error(&self, entry: ErrorLogEntry) -> Result<(), StoreError> {
        use std::io::Write;

        let _guard = self.guard()?;
        let path = self.root.join("errors.jsonl");
        let mut line = serde_json::to_vec(&entry).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        line.push(b'\n');
        ensure_parent(&path)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(&line)
            .map_err(|source| StoreError::Io { path, source })
    }

    fn errors(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let _guard = self.guard()?;
        let path = self.root.join("errors.jsonl");
        let Some(raw) = read_optional(&path)? else {
            return Ok(Vec::new());
        };
        String::from_utf8_lossy(&raw)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StoreError::Serde {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// Replace path separators and other unsafe characters so a value can be
/// used as a single path component.
pub(crate) fn safe_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    }
}

/// Directory name for an invoice's records and artifacts.
///
/// Names that are already path-safe are used verbatim. Anything else is
/// sanitized and suffixed with `~` and a SHA-256 prefix of the original, so
/// two invoice numbers never share a directory. `~` never survives
/// [`safe_component`], which keeps the two forms apart.
pub(crate) fn record_key(invoice_number: &str) -> String {
    let cleaned = safe_component(invoice_number);
    if cleaned == invoice_number {
        return cleaned;
    }
    let digest = hex::encode(Sha256::digest(invoice_number.as_bytes()));
    format!("{cleaned}~{}", &digest[..16])
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    std::fs::write(path, contents).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, &raw)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StoreError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })
}
