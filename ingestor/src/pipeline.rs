//! One notification in, one joined record out.
//!
//! `Received -> Decoded -> Fetched -> Joined -> Assembled -> Persisted`. Any
//! error after decoding is handed to the [`FailureRecorder`] before it is
//! returned; envelopes without an object reference are returned as-is.

use std::sync::Arc;
use std::time::Instant;

use crate::clients::{Clients, ObjectStorage};
use crate::config::Config;
use crate::csv_source::fetch_rows;
use crate::documents::DocumentJoiner;
use crate::envelope::decode_notification;
use crate::errors::{IngestError, Result};
use crate::failure::FailureRecorder;
use crate::metrics_defs::{CSV_ROWS, INGEST_DURATION, INGEST_REQUESTS};
use crate::record::assemble;
use crate::sinks::{SinkWriter, SummaryCollection};

pub struct Pipeline {
    storage: Arc<dyn ObjectStorage>,
    joiner: DocumentJoiner,
    sinks: SinkWriter,
    failures: FailureRecorder,
}

impl Pipeline {
    pub fn new(config: &Config, clients: Clients) -> Self {
        Pipeline {
            storage: clients.storage,
            joiner: DocumentJoiner::new(clients.documents.clone(), config.document_paths.clone()),
            sinks: SinkWriter::new(config, clients.documents.clone(), clients.tables),
            failures: FailureRecorder::new(
                clients.documents,
                SummaryCollection::new(&config.summary_collection),
            ),
        }
    }

    /// Processes a raw `/ingest` body. Returns the session id of the stored
    /// record, which may be unknown.
    pub async fn handle(&self, body: &[u8]) -> Result<Option<String>> {
        let start = Instant::now();
        let result = self.process(body).await;

        if let Err(e) = &result {
            match e {
                IngestError::BadRequest(message) => {
                    tracing::info!(reason = %message, "Rejected notification without object reference")
                }
                _ => {
                    tracing::error!(error = %e, error_kind = e.kind(), "Ingestion failed");
                    self.failures.record(body, e).await;
                }
            }
        }

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        shared::counter!(INGEST_REQUESTS, "outcome" => outcome).increment(1);
        shared::histogram!(INGEST_DURATION, "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn process(&self, body: &[u8]) -> Result<Option<String>> {
        let notification = decode_notification(body)?;
        tracing::info!(
            object = %notification.object,
            uid = notification.identifiers.uid.as_deref(),
            session_id = notification.identifiers.session_id.as_deref(),
            "Processing notification"
        );

        let rows = fetch_rows(self.storage.as_ref(), &notification.object).await?;
        shared::histogram!(CSV_ROWS).record(rows.len() as f64);

        let documents = self.joiner.join(&notification.identifiers).await;

        let mut record = assemble(&notification, &rows, documents);
        record.mark_success();
        self.sinks.write(&record).await?;

        tracing::info!(
            ingestion_id = %record.ingestion_id,
            rows = record.csv_row_count,
            "Stored joined record"
        );
        Ok(record.session_id)
    }
}
