//! The joined record persisted for every processed upload.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::analysis::{CsvAnalysis, analyze};
use crate::clients::Document;
use crate::csv_source::CsvRow;
use crate::documents::JoinedDocuments;
use crate::envelope::Notification;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRecord {
    pub ingestion_id: String,
    pub uid: Option<String>,
    pub session_id: Option<String>,
    pub source_object: String,
    pub ingested_at: String,
    pub csv_analysis: CsvAnalysis,
    pub csv_row_count: usize,
    pub attributes: Map<String, Value>,
    /// Absent when the identifiers were incomplete and nothing was joined
    #[serde(flatten)]
    pub documents: Option<JoinedDocuments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

impl JoinedRecord {
    pub fn mark_success(&mut self) {
        self.status = Some(RecordStatus::Success);
        self.processed_at = Some(utc_now());
    }

    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(document) => Ok(document),
            // A struct always serializes to an object
            _ => Ok(Document::new()),
        }
    }
}

/// Composes the record for one upload. Every call gets a fresh ingestion id.
pub fn assemble(
    notification: &Notification,
    rows: &[CsvRow],
    documents: Option<JoinedDocuments>,
) -> JoinedRecord {
    let csv_analysis = analyze(rows);
    JoinedRecord {
        ingestion_id: uuid::Uuid::new_v4().to_string(),
        uid: notification.identifiers.uid.clone(),
        session_id: notification.identifiers.session_id.clone(),
        source_object: notification.object.to_string(),
        ingested_at: utc_now(),
        csv_row_count: csv_analysis.row_count,
        csv_analysis,
        attributes: notification.attributes.clone(),
        documents,
        status: None,
        processed_at: None,
    }
}

/// Current time as RFC 3339 with microseconds and a `+00:00` offset.
pub fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_source::parse_rows;
    use crate::envelope::decode_notification;
    use crate::testutils::{doc, pubsub_body};
    use serde_json::json;

    fn notification() -> Notification {
        decode_notification(&pubsub_body(json!({"bucket": "b", "name": "sess1/user1.csv"})))
            .unwrap()
    }

    #[test]
    fn test_assemble_without_documents() {
        let rows = parse_rows("a,b\n1,2\n3,x\n").unwrap();
        let record = assemble(&notification(), &rows, None);

        assert_eq!(record.uid.as_deref(), Some("user1"));
        assert_eq!(record.session_id.as_deref(), Some("sess1"));
        assert_eq!(record.source_object, "gs://b/sess1/user1.csv");
        assert_eq!(record.csv_row_count, 2);
        assert_eq!(record.status, None);

        let document = record.to_document().unwrap();
        assert!(!document.contains_key("profile"));
        assert!(!document.contains_key("status"));
        assert!(!document.contains_key("processedAt"));
        assert_eq!(document["csvAnalysis"]["numericAverages"], json!({"a": 2.0, "b": 2.0}));
        assert_eq!(document["attributes"]["sessionId"], json!("sess1"));
    }

    #[test]
    fn test_assemble_with_documents() {
        let documents = JoinedDocuments {
            profile: doc(json!({"displayName": "Ada"})),
            ..Default::default()
        };
        let record = assemble(&notification(), &[], Some(documents));
        let document = record.to_document().unwrap();

        assert_eq!(document["profile"], json!({"displayName": "Ada"}));
        assert_eq!(document["survey"], json!({}));
        assert_eq!(document["consent"], json!({}));
        assert_eq!(document["calibration"], json!({}));
        assert_eq!(document["csvRowCount"], json!(0));
    }

    #[test]
    fn test_ingestion_ids_are_unique() {
        let first = assemble(&notification(), &[], None);
        let second = assemble(&notification(), &[], None);
        assert_ne!(first.ingestion_id, second.ingestion_id);
    }

    #[test]
    fn test_mark_success() {
        let mut record = assemble(&notification(), &[], None);
        record.mark_success();

        let document = record.to_document().unwrap();
        assert_eq!(document["status"], json!("success"));
        assert!(document["processedAt"].is_string());
        assert!(document["ingestedAt"].is_string());
    }

    #[test]
    fn test_utc_now_format() {
        let now = utc_now();
        assert!(now.ends_with("+00:00"), "{now}");
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
