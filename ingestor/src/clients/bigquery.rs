//! BigQuery streaming insert (`tabledata.insertAll`) client.

use super::auth::Authenticator;
use super::{ClientError, InsertRow, RowError, TableRef, TableService, status_error};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

const SERVICE: &str = "BigQuery";

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    kind: &'static str,
    rows: &'a [InsertRow],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowError>,
}

pub struct BigQueryClient {
    client: reqwest::Client,
    endpoint: Url,
    default_project: String,
    auth: Authenticator,
}

impl BigQueryClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        default_project: String,
        auth: Authenticator,
    ) -> Self {
        BigQueryClient {
            client,
            endpoint,
            default_project,
            auth,
        }
    }

    fn insert_all_url(&self, table: &TableRef) -> Result<Url, ClientError> {
        let project = table.project.as_deref().unwrap_or(&self.default_project);
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "bigquery",
                "v2",
                "projects",
                project,
                "datasets",
                table.dataset.as_str(),
                "tables",
                table.table.as_str(),
                "insertAll",
            ]);
        Ok(url)
    }
}

#[async_trait]
impl TableService for BigQueryClient {
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[InsertRow],
    ) -> Result<Vec<RowError>, ClientError> {
        let headers = self.auth.headers().await?;
        let response = self
            .client
            .post(self.insert_all_url(table)?)
            .headers(headers)
            .json(&InsertAllRequest {
                kind: "bigquery#tableDataInsertAllRequest",
                rows,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }

        Ok(response.json::<InsertAllResponse>().await?.insert_errors)
    }
}
