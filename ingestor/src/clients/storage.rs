//! Cloud Storage JSON API client.

use super::auth::Authenticator;
use super::{ClientError, ObjectRef, ObjectStorage, status_error};
use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

const SERVICE: &str = "Cloud Storage";

pub struct GcsStorage {
    client: reqwest::Client,
    endpoint: Url,
    auth: Authenticator,
}

impl GcsStorage {
    pub fn new(client: reqwest::Client, endpoint: Url, auth: Authenticator) -> Self {
        GcsStorage {
            client,
            endpoint,
            auth,
        }
    }

    // Object names are pushed as single segments so that `/` gets percent-encoded.
    fn object_url(&self, object: &ObjectRef) -> Result<Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "storage",
                "v1",
                "b",
                object.bucket.as_str(),
                "o",
                object.name.as_str(),
            ]);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ClientError> {
        let headers = self.auth.headers().await?;
        Ok(self.client.get(url).headers(headers).send().await?)
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn exists(&self, object: &ObjectRef) -> Result<bool, ClientError> {
        let response = self.get(self.object_url(object)?).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(SERVICE, response).await),
        }
    }

    async fn download_text(&self, object: &ObjectRef) -> Result<String, ClientError> {
        let mut url = self.object_url(object)?;
        url.query_pairs_mut().append_pair("alt", "media");

        tracing::info!(object = %object, "Downloading CSV");
        let response = self.get(url).await?;
        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(object.to_string())),
            _ => Err(status_error(SERVICE, response).await),
        }
    }
}
