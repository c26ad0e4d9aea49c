use serde::Serialize;
use std::sync::Arc;

use crate::clients::{Document, DocumentStore};
use crate::envelope::decode_notification;
use crate::errors::IngestError;
use crate::metrics_defs::FAILURE_RECORDS;
use crate::record::{RecordStatus, utc_now};
use crate::sinks::SummaryCollection;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureRecord<'a> {
    error: String,
    error_kind: &'a str,
    status: RecordStatus,
    failed_at: String,
}

/// What happened to a failed request's record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    Recorded,
    /// No session id could be recovered from the body
    Logged,
    /// The failure record itself could not be written
    WriteFailed,
}

impl FailureOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            FailureOutcome::Recorded => "recorded",
            FailureOutcome::Logged => "logged",
            FailureOutcome::WriteFailed => "write_failed",
        }
    }
}

/// Marks the session summary of a failed request with the error.
pub struct FailureRecorder {
    store: Arc<dyn DocumentStore>,
    summary: SummaryCollection,
}

impl FailureRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, summary: SummaryCollection) -> Self {
        FailureRecorder { store, summary }
    }

    /// Never fails: a write error is logged and reported in the outcome only.
    pub async fn record(&self, body: &[u8], error: &IngestError) -> FailureOutcome {
        let session_id = decode_notification(body)
            .ok()
            .and_then(|notification| notification.identifiers.session_id);

        let outcome = match session_id {
            Some(session_id) => self.write(&session_id, error).await,
            None => {
                tracing::error!(
                    error = %error,
                    error_kind = error.kind(),
                    "Ingestion failed and no session id could be resolved"
                );
                FailureOutcome::Logged
            }
        };
        shared::counter!(FAILURE_RECORDS, "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    async fn write(&self, session_id: &str, error: &IngestError) -> FailureOutcome {
        let record = FailureRecord {
            error: error.to_string(),
            error_kind: error.kind(),
            status: RecordStatus::Error,
            failed_at: utc_now(),
        };
        let fields: Document = match serde_json::to_value(&record) {
            Ok(serde_json::Value::Object(fields)) => fields,
            _ => Document::new(),
        };

        match self
            .store
            .set_merge(&self.summary.document(session_id), &fields)
            .await
        {
            Ok(()) => {
                tracing::info!(session_id, error_kind = error.kind(), "Recorded ingestion failure");
                FailureOutcome::Recorded
            }
            Err(e) => {
                tracing::error!(
                    session_id,
                    error = %error,
                    write_error = %e,
                    "Failed to record ingestion failure"
                );
                FailureOutcome::WriteFailed
            }
        }
    }
}
