//! Rust toolkit for MyInvois e-invoicing: canonical hashing, XAdES signing,
//! document submission and status polling.
//!
//! # Examples
//! ```rust
//! use myinvois_core::config::{Config, IntegrationType};
//!
//! let config = Config::new(IntegrationType::Sandbox, "./work");
//! # let _ = config;
//! ```
pub mod api;
pub mod artifacts;
pub mod certificate;
pub mod config;
pub mod credentials;
pub mod invoice;
pub mod pipeline;
pub mod store;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] invoice::XmlError),
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Signing(#[from] invoice::SigningError),
    #[error(transparent)]
    Embed(#[from] invoice::EmbedError),
    #[error(transparent)]
    Validation(#[from] invoice::ValidationError),
    #[error(transparent)]
    Submission(#[from] api::SubmissionError),
    #[error(transparent)]
    Credential(#[from] credentials::CredentialError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Artifact(#[from] artifacts::ArtifactError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
