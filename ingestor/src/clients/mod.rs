//! Contracts for the storage, document and warehouse services the pipeline
//! talks to, plus REST implementations against the Google Cloud APIs.
//!
//! The pipeline only ever sees the traits, so every collaborator can be
//! swapped for an in-memory double in tests.

pub mod auth;
pub mod bigquery;
pub mod firestore;
pub mod project;
pub mod storage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::StartupError;
use auth::{AuthError, Authenticator};

/// A JSON object as stored in, or read from, the document store.
pub type Document = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Identifies one object in a storage bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new<B, N>(bucket: B, name: N) -> Self
    where
        B: Into<String>,
        N: Into<String>,
    {
        ObjectRef {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.name)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("document path is empty")]
    Empty,

    #[error("document path must alternate collection/document segments: {0}")]
    NotADocument(String),
}

/// Path to a single document: alternating collection and document ids,
/// always ending on a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .collect();

        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.len() % 2 != 0 {
            return Err(PathError::NotADocument(path.to_string()));
        }
        Ok(DocumentPath { segments })
    }

    /// Document `id` directly under a top-level collection. The id is kept as
    /// a single segment even if it contains a slash.
    pub fn in_collection(collection: &str, id: &str) -> Self {
        DocumentPath {
            segments: vec![collection.to_string(), id.to_string()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Fully qualified analytical table. The project falls back to the client's
/// default project when not given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Accepts either `dataset` or `project.dataset` for the dataset part.
    pub fn new(dataset: &str, table: &str) -> Self {
        let (project, dataset) = match dataset.split_once('.') {
            Some((project, dataset)) => (Some(project.to_string()), dataset.to_string()),
            None => (None, dataset.to_string()),
        };
        TableRef {
            project,
            dataset,
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{}.{}.{}", project, self.dataset, self.table),
            None => write!(f, "{}.{}", self.dataset, self.table),
        }
    }
}

/// A row for a streaming insert.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    pub json: Document,
}

/// Per-row rejection reported by the table service.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RowError {
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<RowErrorDetail>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RowErrorDetail {
    pub reason: Option<String>,
    pub location: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn exists(&self, object: &ObjectRef) -> Result<bool, ClientError>;

    /// Downloads the object as UTF-8 text. Fails with `ClientError::NotFound`
    /// if the object is absent.
    async fn download_text(&self, object: &ObjectRef) -> Result<String, ClientError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when the document does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, ClientError>;

    /// Upserts `fields` into the document. Top-level fields present in `fields`
    /// overwrite the stored ones, all other stored fields are preserved.
    async fn set_merge(&self, path: &DocumentPath, fields: &Document) -> Result<(), ClientError>;
}

#[async_trait]
pub trait TableService: Send + Sync {
    /// Streams rows into the table. An empty result means every row was accepted.
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[InsertRow],
    ) -> Result<Vec<RowError>, ClientError>;
}

/// The set of service handles shared by every request.
#[derive(Clone)]
pub struct Clients {
    pub storage: Arc<dyn ObjectStorage>,
    pub documents: Arc<dyn DocumentStore>,
    pub tables: Arc<dyn TableService>,
}

impl Clients {
    /// Builds the REST clients, all sharing one connection pool and one set of
    /// credentials.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let endpoints = config.endpoints.parse()?;

        let auth = if config.disable_auth {
            tracing::warn!("Authentication disabled, requests are sent without credentials");
            Authenticator::Anonymous
        } else if let Some(json) = &config.service_account_json {
            tracing::info!("Initializing credentials from service account JSON");
            Authenticator::from_service_account_json(json)?
        } else {
            tracing::info!("Initializing credentials using Application Default Credentials");
            Authenticator::application_default()?
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let project_id = project::resolve_project_id(config, &http, &endpoints.metadata)
            .await
            .ok_or(StartupError::MissingProject)?;

        Ok(Clients {
            storage: Arc::new(storage::GcsStorage::new(
                http.clone(),
                endpoints.storage,
                auth.clone(),
            )),
            documents: Arc::new(firestore::FirestoreClient::new(
                http.clone(),
                endpoints.firestore,
                project_id.clone(),
                auth.clone(),
            )),
            tables: Arc::new(bigquery::BigQueryClient::new(
                http,
                endpoints.bigquery,
                project_id,
                auth,
            )),
        })
    }
}

/// Reads the body of a failed response into a `ClientError::Status`.
pub(crate) async fn status_error(service: &'static str, response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ClientError::Status {
        service,
        status,
        body,
    }
}
