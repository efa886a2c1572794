//! Configuration and integration selection.
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Environment variable that overrides the submission API base URL.
pub const BASE_URL_ENV: &str = "MYINVOIS_BASE_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// MyInvois integration selection.
///
/// - Sandbox: the pre-production API. Documents are submitted unsigned.
/// - Production: the live API. Documents are signed with the configured
///   PKCS#12 identity before submission.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use myinvois_core::config::IntegrationType;
///
/// let integration = IntegrationType::from_str("production")?;
/// assert_eq!(integration, IntegrationType::Production);
/// # Ok::<(), myinvois_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    #[default]
    Sandbox,
    Production,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integration type: {input}")]
    InvalidIntegration { input: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
}

impl FromStr for IntegrationType {
    type Err = ConfigError;
    fn from_str(value: &str) -> Result<IntegrationType, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "sandbox" | "preprod" => Ok(IntegrationType::Sandbox),
            "production" => Ok(IntegrationType::Production),
            _ => Err(ConfigError::InvalidIntegration {
                input: value.to_string(),
            }),
        }
    }
}

impl IntegrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Sandbox => "sandbox",
            IntegrationType::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, IntegrationType::Production)
    }

    pub fn endpoint_url(&self) -> &'static str {
        match self {
            IntegrationType::Sandbox => "https://preprod-api.myinvois.hasil.gov.my/",
            IntegrationType::Production => "https://api.myinvois.hasil.gov.my/",
        }
    }

    pub fn identity_url(&self) -> &'static str {
        match self {
            IntegrationType::Sandbox => "https://preprod-api.myinvois.hasil.gov.my/",
            IntegrationType::Production => "https://api.myinvois.hasil.gov.my/",
        }
    }
}

/// Explicit configuration handed to every component.
///
/// # Examples
/// ```rust
/// use myinvois_core::config::{Config, IntegrationType};
///
/// let config = Config::new(IntegrationType::Sandbox, "./work")
///     .with_certificate("./certs/company.pfx", "secret");
/// assert!(config.certificate_path().is_some());
/// ```
#[derive(Clone)]
pub struct Config {
    integration: IntegrationType,
    base_url: Option<String>,
    identity_url: Option<String>,
    certificate_path: Option<PathBuf>,
    certificate_password: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    integration: IntegrationType,
    base_url: Option<String>,
    identity_url: Option<String>,
    certificate_path: Option<PathBuf>,
    certificate_password: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    work_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

impl Config {
    pub fn new(integration: IntegrationType, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            integration,
            base_url: None,
            identity_url: None,
            certificate_path: None,
            certificate_password: None,
            client_id: None,
            client_secret: None,
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load configuration from a TOML file. Relative paths are kept as written.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut config = Config::new(
            file.integration,
            file.work_dir.unwrap_or_else(|| PathBuf::from("./work")),
        );
        config.base_url = file.base_url;
        config.identity_url = file.identity_url;
        config.certificate_path = file.certificate_path;
        config.certificate_password = file.certificate_password;
        config.client_id = file.client_id;
        config.client_secret = file.client_secret;
        if let Some(secs) = file.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_identity_url(mut self, url: impl Into<String>) -> Self {
        self.identity_url = Some(url.into());
        self
    }

    pub fn with_certificate(
        mut self,
        path: impl Into<PathBuf>,
        password: impl Into<String>,
    ) -> Self {
        self.certificate_path = Some(path.into());
        self.certificate_password = Some(password.into());
        self
    }

    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_integration(mut self, integration: IntegrationType) -> Self {
        self.integration = integration;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn integration(&self) -> IntegrationType {
        self.integration
    }

    /// API base URL: explicit override, then `MYINVOIS_BASE_URL`, then the
    /// integration default. Always ends with `/`.
    pub fn base_url(&self) -> String {
        let value = self
            .base_url
            .clone()
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| self.integration.endpoint_url().to_string());
        with_trailing_slash(value)
    }

    pub fn identity_url(&self) -> String {
        let value = self
            .identity_url
            .clone()
            .unwrap_or_else(|| self.integration.identity_url().to_string());
        with_trailing_slash(value)
    }

    pub fn certificate_path(&self) -> Option<&Path> {
        self.certificate_path.as_deref()
    }

    pub fn certificate_password(&self) -> Option<&str> {
        self.certificate_password.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("integration", &self.integration)
            .field("base_url", &self.base_url)
            .field("identity_url", &self.identity_url)
            .field("certificate_path", &self.certificate_path)
            .field("client_id", &self.client_id)
            .field("work_dir", &self.work_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(IntegrationType::Sandbox, "./work")
    }
}

fn with_trailing_slash(value: String) -> String {
    if value.ends_with('/') {
        value
    } else {
        format!("{value}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_type_parses_case_insensitively() {
        assert_eq!(
            IntegrationType::from_str("PRODUCTION").expect("parse"),
            IntegrationType::Production
        );
        assert_eq!(
            IntegrationType::from_str("sandbox").expect("parse"),
            IntegrationType::Sandbox
        );
        assert!(matches!(
            IntegrationType::from_str("live"),
            Err(ConfigError::InvalidIntegration { .. })
        ));
    }

    #[test]
    fn explicit_base_url_gets_trailing_slash() {
        let config = Config::default().with_base_url("http://127.0.0.1:9000/api/v1.0");
        assert_eq!(config.base_url(), "http://127.0.0.1:9000/api/v1.0/");
    }

    #[test]
    fn toml_config_overrides_defaults() {
        let raw = r#"
            integration = "production"
            base_url = "https://example.test/api/v1.0"
            certificate_path = "certs/company.pfx"
            certificate_password = "secret"
            work_dir = "/tmp/myinvois"
            timeout_secs = 5
        "#;
        let config = Config::from_toml_str(raw).expect("parse config");
        assert_eq!(config.integration(), IntegrationType::Production);
        assert_eq!(config.base_url(), "https://example.test/api/v1.0/");
        assert_eq!(config.certificate_password(), Some("secret"));
        assert_eq!(config.work_dir(), Path::new("/tmp/myinvois"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn debug_output_omits_secrets() {
        let config = Config::default()
            .with_certificate("company.pfx", "pfx-password")
            .with_client_credentials("client", "client-secret");
        let debug = format!("{config:?}");
        assert!(debug.contains("company.pfx"));
        assert!(!debug.contains("pfx-password"));
        assert!(!debug.contains("client-secret"));
    }

    #[test]
    fn toml_config_defaults_to_sandbox_and_thirty_seconds() {
        let config = Config::from_toml_str("").expect("parse config");
        assert_eq!(config.integration(), IntegrationType::Sandbox);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.certificate_path().is_none());
    }
}
