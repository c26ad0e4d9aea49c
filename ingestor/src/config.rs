use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::clients::DocumentPath;
use crate::documents::{DocumentKind, render_template};
use crate::sinks::SinkTargets;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Summary collection name must be a single non-empty segment: {0:?}")]
    InvalidSummaryCollection(String),

    #[error("Request timeout cannot be 0")]
    InvalidTimeout,

    #[error("Invalid {name} endpoint: {value:?}")]
    InvalidEndpoint { name: &'static str, value: String },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Ingestor configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for the webhook
    pub listener: Listener,
    /// Project used for Firestore and as the default BigQuery project. Falls
    /// back to the `project_id` of the service account key.
    pub project_id: Option<String>,
    /// Service account key as a JSON string. Application Default Credentials
    /// are used when absent.
    pub service_account_json: Option<String>,
    /// Key file named by `GOOGLE_APPLICATION_CREDENTIALS`. Only read to find
    /// the project id; the credentials themselves are loaded by ADC.
    pub credentials_file: Option<PathBuf>,
    /// Send requests without credentials (local emulators only)
    pub disable_auth: bool,
    /// Bucket holding auxiliary assets. Informational; the CSV bucket always
    /// comes from the notification.
    pub storage_bucket: Option<String>,
    /// Collection holding one summary document per session
    pub summary_collection: String,
    pub document_paths: DocumentPaths,
    /// Sink names, case-insensitive. Each entry may itself be comma-separated.
    pub summary_targets: Vec<String>,
    pub bigquery: BigQueryConfig,
    pub endpoints: Endpoints,
    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            project_id: None,
            service_account_json: None,
            credentials_file: None,
            disable_auth: false,
            storage_bucket: None,
            summary_collection: "sessionSummaries".into(),
            document_paths: DocumentPaths::default(),
            summary_targets: vec!["firestore".into()],
            bigquery: BigQueryConfig::default(),
            endpoints: Endpoints::default(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Overrides fields from environment variables. `var` looks up a variable
    /// by name; unset and empty variables are ignored.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| var(name).filter(|value| !value.is_empty());

        if let Some(port) = lookup("PORT") {
            self.listener.port = port.parse().map_err(|_| ValidationError::InvalidEnv {
                name: "PORT",
                value: port,
            })?;
        }
        if let Some(project_id) = lookup("GOOGLE_CLOUD_PROJECT") {
            self.project_id = Some(project_id);
        }
        if let Some(json) = lookup("FIREBASE_SERVICE_ACCOUNT_JSON") {
            self.service_account_json = Some(json);
        }
        if let Some(path) = lookup("GOOGLE_APPLICATION_CREDENTIALS") {
            self.credentials_file = Some(PathBuf::from(path));
        }
        if let Some(bucket) = lookup("FIREBASE_STORAGE_BUCKET") {
            self.storage_bucket = Some(bucket);
        }
        if let Some(collection) = lookup("FS_SUMMARY_COLLECTION") {
            self.summary_collection = collection;
        }
        if let Some(path) = lookup("FS_PROFILE_PATH") {
            self.document_paths.profile = path;
        }
        if let Some(path) = lookup("FS_SURVEY_PATH") {
            self.document_paths.survey = path;
        }
        if let Some(path) = lookup("FS_CONSENT_PATH") {
            self.document_paths.consent = path;
        }
        if let Some(path) = lookup("FS_CALIBRATION_PATH") {
            self.document_paths.calibration = path;
        }
        if let Some(targets) = lookup("SUMMARY_TARGETS") {
            self.summary_targets = vec![targets];
        }
        if let Some(dataset) = lookup("BIGQUERY_DATASET") {
            self.bigquery.dataset = Some(dataset);
        }
        if let Some(table) = lookup("BIGQUERY_TABLE") {
            self.bigquery.table = table;
        }
        Ok(())
    }

    /// Validates the ingestor configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.summary_collection.is_empty() || self.summary_collection.contains('/') {
            return Err(ValidationError::InvalidSummaryCollection(
                self.summary_collection.clone(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        self.endpoints.parse()?;

        Ok(())
    }

    pub fn sink_targets(&self) -> SinkTargets {
        SinkTargets::parse(&self.summary_targets).0
    }

    /// Logs configuration that is accepted but will misbehave at runtime:
    /// unknown sink names and path templates that never resolve to a document.
    pub fn warn_suspicious(&self) {
        let (_, unknown) = SinkTargets::parse(&self.summary_targets);
        for name in unknown {
            tracing::warn!(target_name = %name, "Ignoring unknown summary target");
        }

        for (kind, template) in self.document_paths.unresolvable() {
            tracing::warn!(
                document = kind.as_str(),
                template = %template,
                "Path template does not resolve to a document, this join will always be empty"
            );
        }
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Path templates of the auxiliary documents. `{uid}` and `{sessionId}` are
/// substituted per request.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentPaths {
    pub profile: String,
    pub survey: String,
    pub consent: String,
    pub calibration: String,
}

impl Default for DocumentPaths {
    fn default() -> Self {
        DocumentPaths {
            profile: "users/{uid}".into(),
            survey: "sessions/{sessionId}/survey".into(),
            consent: "sessions/{sessionId}/consent".into(),
            calibration: "sessions/{sessionId}/calibration".into(),
        }
    }
}

impl DocumentPaths {
    pub fn template(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Profile => &self.profile,
            DocumentKind::Survey => &self.survey,
            DocumentKind::Consent => &self.consent,
            DocumentKind::Calibration => &self.calibration,
        }
    }

    /// Templates that cannot form a document path whatever the identifiers are.
    pub fn unresolvable(&self) -> Vec<(DocumentKind, &str)> {
        DocumentKind::ALL
            .into_iter()
            .map(|kind| (kind, self.template(kind)))
            .filter(|(_, template)| {
                DocumentPath::parse(&render_template(template, "uid", "sessionId")).is_err()
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BigQueryConfig {
    /// `dataset` or `project.dataset`. Required when the bigquery target is enabled.
    pub dataset: Option<String>,
    pub table: String,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        BigQueryConfig {
            dataset: None,
            table: "joinedData".into(),
        }
    }
}

/// Base URLs of the Google APIs. Overridable for emulators.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub storage: String,
    pub firestore: String,
    pub bigquery: String,
    /// Compute metadata server, asked for the project id when none is configured
    pub metadata: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            storage: "https://storage.googleapis.com".into(),
            firestore: "https://firestore.googleapis.com".into(),
            bigquery: "https://bigquery.googleapis.com".into(),
            metadata: "http://metadata.google.internal".into(),
        }
    }
}

/// Endpoints parsed into URLs.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointUrls {
    pub storage: Url,
    pub firestore: Url,
    pub bigquery: Url,
    pub metadata: Url,
}

impl Endpoints {
    pub fn parse(&self) -> Result<EndpointUrls, ValidationError> {
        Ok(EndpointUrls {
            storage: parse_endpoint("storage", &self.storage)?,
            firestore: parse_endpoint("firestore", &self.firestore)?,
            bigquery: parse_endpoint("bigquery", &self.bigquery)?,
            metadata: parse_endpoint("metadata", &self.metadata)?,
        })
    }
}

fn parse_endpoint(name: &'static str, value: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(value).map_err(|_| ValidationError::InvalidEndpoint {
        name,
        value: value.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ValidationError::InvalidEndpoint {
            name,
            value: value.to_string(),
        });
    }
    Ok(url)
}
