//! Firestore REST (v1) client.
//!
//! Firestore encodes every value with an explicit type tag
//! (`{"stringValue": "x"}`, `{"mapValue": {"fields": {...}}}`, ...). Documents
//! are converted to and from plain JSON at this boundary so the rest of the
//! service only deals with `serde_json` values.

use super::auth::Authenticator;
use super::{ClientError, Document, DocumentPath, DocumentStore, status_error};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;

const SERVICE: &str = "Firestore";
const DEFAULT_DATABASE: &str = "(default)";

#[derive(Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Serialize)]
struct FirestoreWrite<'a> {
    fields: &'a Map<String, Value>,
}

pub struct FirestoreClient {
    client: reqwest::Client,
    endpoint: Url,
    project_id: String,
    auth: Authenticator,
}

impl FirestoreClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        project_id: String,
        auth: Authenticator,
    ) -> Self {
        FirestoreClient {
            client,
            endpoint,
            project_id,
            auth,
        }
    }

    fn document_url(&self, path: &DocumentPath) -> Result<Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                DEFAULT_DATABASE,
                "documents",
            ])
            .extend(path.segments());
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, ClientError> {
        let headers = self.auth.headers().await?;
        let response = self
            .client
            .get(self.document_url(path)?)
            .headers(headers)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let document = response.json::<FirestoreDocument>().await?;
                Ok(Some(decode_fields(&document.fields)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(SERVICE, response).await),
        }
    }

    async fn set_merge(&self, path: &DocumentPath, fields: &Document) -> Result<(), ClientError> {
        // An empty update mask would replace the whole document.
        if fields.is_empty() {
            return Ok(());
        }

        let mut url = self.document_url(path)?;
        {
            let mut query = url.query_pairs_mut();
            for key in fields.keys() {
                query.append_pair("updateMask.fieldPaths", &field_path(key));
            }
        }

        let encoded = encode_fields(fields);
        let headers = self.auth.headers().await?;
        let response = self
            .client
            .patch(url)
            .headers(headers)
            .json(&FirestoreWrite { fields: &encoded })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        tracing::debug!(path = %path, "Merged document");
        Ok(())
    }
}

/// Quotes a top-level field name for use in an update mask. Names that are not
/// plain identifiers must be wrapped in backticks.
fn field_path(key: &str) -> String {
    let mut chars = key.chars();
    let simple = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        key.to_string()
    } else {
        format!("`{}`", key.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

pub fn encode_fields(document: &Map<String, Value>) -> Map<String, Value> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore transmits 64-bit integers as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Document {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|tagged| tagged.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        // booleanValue, stringValue, doubleValue, timestampValue, bytesValue,
        // referenceValue and geoPointValue map onto their JSON payload as-is.
        _ => inner.clone(),
    }
}
