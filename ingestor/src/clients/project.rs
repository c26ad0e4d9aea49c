//! Finds the project id when none is configured, the way the Google client
//! libraries do: explicit configuration, then credential files, then the
//! compute metadata server.

use std::time::Duration;
use url::Url;

use super::auth::project_from_service_account;
use super::{ClientError, status_error};
use crate::config::Config;

const SERVICE: &str = "Metadata server";
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn resolve_project_id(
    config: &Config,
    http: &reqwest::Client,
    metadata: &Url,
) -> Option<String> {
    if let Some(project_id) = &config.project_id {
        return Some(project_id.clone());
    }

    if let Some(project_id) = config
        .service_account_json
        .as_deref()
        .and_then(project_from_service_account)
    {
        return Some(project_id);
    }

    if let Some(path) = &config.credentials_file {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                if let Some(project_id) = project_from_service_account(&json) {
                    return Some(project_id);
                }
            }
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not read credentials file"
            ),
        }
    }

    match metadata_project_id(http, metadata).await {
        Ok(project_id) => {
            tracing::info!(project_id = %project_id, "Using project id from the metadata server");
            Some(project_id)
        }
        Err(e) => {
            tracing::debug!(error = %e, "No project id from the metadata server");
            None
        }
    }
}

async fn metadata_project_id(http: &reqwest::Client, endpoint: &Url) -> Result<String, ClientError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?
        .pop_if_empty()
        .extend(["computeMetadata", "v1", "project", "project-id"]);

    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(status_error(SERVICE, response).await);
    }

    let project_id = response.text().await?.trim().to_string();
    if project_id.is_empty() {
        return Err(ClientError::NotFound("project id".to_string()));
    }
    Ok(project_id)
}
