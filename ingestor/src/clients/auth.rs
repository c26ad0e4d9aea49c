//! Credentials for outbound Google Cloud requests.

use google_cloud_auth::credentials::{self, CacheableResource, Credentials};
use http::{Extensions, HeaderMap};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("invalid service account JSON: {0}")]
    InvalidServiceAccount(#[from] serde_json::Error),

    #[error("could not build credentials: {0}")]
    Build(String),

    #[error("could not obtain request headers: {0}")]
    Headers(String),
}

/// Produces the authorization headers attached to every request.
#[derive(Clone)]
pub enum Authenticator {
    /// No credentials. Only useful against local emulators.
    Anonymous,
    Google(Arc<Credentials>),
}

impl Authenticator {
    pub fn from_service_account_json(json: &str) -> Result<Self, AuthError> {
        let key: serde_json::Value = serde_json::from_str(json)?;
        let credentials = credentials::service_account::Builder::new(key)
            .build()
            .map_err(|e| AuthError::Build(e.to_string()))?;
        Ok(Authenticator::Google(Arc::new(credentials)))
    }

    pub fn application_default() -> Result<Self, AuthError> {
        let credentials = credentials::Builder::default()
            .build()
            .map_err(|e| AuthError::Build(e.to_string()))?;
        Ok(Authenticator::Google(Arc::new(credentials)))
    }

    pub async fn headers(&self) -> Result<HeaderMap, AuthError> {
        let credentials = match self {
            Authenticator::Anonymous => return Ok(HeaderMap::new()),
            Authenticator::Google(credentials) => credentials,
        };

        // No entity tag is passed in, so the provider always returns fresh headers.
        match credentials
            .headers(Extensions::new())
            .await
            .map_err(|e| AuthError::Headers(e.to_string()))?
        {
            CacheableResource::New { data, .. } => Ok(data),
            CacheableResource::NotModified => Err(AuthError::Headers(
                "credentials provider returned no headers".to_string(),
            )),
        }
    }
}

/// Extracts `project_id` from a service account key, if present.
pub fn project_from_service_account(json: &str) -> Option<String> {
    let key: serde_json::Value = serde_json::from_str(json).ok()?;
    key.get("project_id")?.as_str().map(String::from)
}
