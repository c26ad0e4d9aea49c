//! Decoding of the push notification delivered to `/ingest`.
//!
//! The body is either a Pub/Sub push envelope (`{"message": {"attributes":
//! ..., "data": <base64 JSON>}}`) or the same fields inlined at the top level.
//! The object reference and the identifiers can each come from three places;
//! the decoded `data` payload wins over the attributes, which win over the
//! top-level body (for the object) or the object path (for the identifiers).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::clients::ObjectRef;
use crate::errors::{IngestError, Result};

const MISSING_OBJECT: &str = "Pub/Sub payload must include bucket and name attributes.";

#[derive(Debug, Default, Deserialize)]
struct PushMessage {
    #[serde(default)]
    attributes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    message: Option<PushMessage>,
    #[serde(flatten)]
    inline: PushMessage,
    bucket: Option<String>,
    name: Option<String>,
}

/// The user and session an upload belongs to. Either may be unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identifiers {
    pub uid: Option<String>,
    pub session_id: Option<String>,
}

impl Identifiers {
    /// Derives identifiers from an object path shaped like
    /// `.../{sessionId}/{uid}.csv`.
    pub fn from_object_path(path: &str) -> Self {
        let trimmed = path.strip_suffix(".csv").unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

        let uid = segments.last().map(|s| s.to_string());
        let session_id = match segments.len() {
            n if n >= 2 => Some(segments[n - 2].to_string()),
            _ => None,
        };
        Identifiers { uid, session_id }
    }

    /// Both identifiers, if both are known.
    pub fn both(&self) -> Option<(&str, &str)> {
        Some((self.uid.as_deref()?, self.session_id.as_deref()?))
    }
}

/// A decoded notification: which object landed, who it belongs to, and every
/// attribute that came with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub object: ObjectRef,
    pub identifiers: Identifiers,
    /// Attributes overwritten by the decoded payload, with `uid` and
    /// `sessionId` set to the resolved identifiers (null when unresolved).
    pub attributes: Map<String, Value>,
}

pub fn decode_notification(body: &[u8]) -> Result<Notification> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        IngestError::MalformedEnvelope(format!("Request body must be a JSON object: {e}"))
    })?;

    let message = envelope.message.unwrap_or(envelope.inline);
    let attributes = message.attributes.unwrap_or_default();
    let decoded = match message.data.as_deref() {
        Some(data) if !data.is_empty() => decode_data(data)?,
        _ => Map::new(),
    };

    let decoded_str = |key: &str| decoded.get(key).and_then(Value::as_str);
    let attribute = |key: &str| attributes.get(key).map(String::as_str);

    let bucket = first_present([
        decoded_str("bucket"),
        attribute("bucket"),
        envelope.bucket.as_deref(),
    ]);
    let name = first_present([
        decoded_str("name"),
        attribute("name"),
        envelope.name.as_deref(),
    ]);
    let (Some(bucket), Some(name)) = (bucket, name) else {
        return Err(IngestError::BadRequest(MISSING_OBJECT.to_string()));
    };

    let from_path = Identifiers::from_object_path(name);
    let identifiers = Identifiers {
        uid: first_present([decoded_str("uid"), attribute("uid")])
            .map(String::from)
            .or(from_path.uid),
        session_id: first_present([decoded_str("sessionId"), attribute("sessionId")])
            .map(String::from)
            .or(from_path.session_id),
    };
    let object = ObjectRef::new(bucket, name);

    let mut merged: Map<String, Value> = attributes
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    merged.extend(decoded.clone());
    merged.insert("uid".into(), identifiers.uid.clone().into());
    merged.insert("sessionId".into(), identifiers.session_id.clone().into());

    Ok(Notification {
        object,
        identifiers,
        attributes: merged,
    })
}

fn decode_data(data: &str) -> Result<Map<String, Value>> {
    let bytes = STANDARD.decode(data.as_bytes()).map_err(|e| {
        IngestError::MalformedEnvelope(format!("Message data is not valid base64: {e}"))
    })?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(IngestError::MalformedEnvelope(
            "Message data must be a JSON object".to_string(),
        )),
        Err(e) => Err(IngestError::MalformedEnvelope(format!(
            "Message data is not valid JSON: {e}"
        ))),
    }
}

/// First candidate that is present and non-empty.
fn first_present<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}
