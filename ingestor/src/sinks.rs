//! Persistence of joined records to the configured sinks.

use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use crate::clients::{Document, DocumentPath, DocumentStore, InsertRow, TableRef, TableService};
use crate::config::Config;
use crate::errors::{IngestError, Result};
use crate::metrics_defs::SINK_WRITES;
use crate::record::{JoinedRecord, utc_now};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkTarget {
    Firestore,
    BigQuery,
}

impl SinkTarget {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SinkTarget::Firestore => "firestore",
            SinkTarget::BigQuery => "bigquery",
        }
    }
}

impl FromStr for SinkTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(SinkTarget::Firestore),
            "bigquery" => Ok(SinkTarget::BigQuery),
            other => Err(other.to_string()),
        }
    }
}

/// Which sinks are enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkTargets {
    firestore: bool,
    bigquery: bool,
}

impl SinkTargets {
    /// Parses target names, splitting each entry on commas. Returns the
    /// enabled targets and the unknown names, which are otherwise ignored.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> (Self, Vec<String>) {
        let mut targets = SinkTargets::default();
        let mut unknown = Vec::new();

        for name in names
            .iter()
            .flat_map(|entry| entry.as_ref().split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            match name.parse() {
                Ok(SinkTarget::Firestore) => targets.firestore = true,
                Ok(SinkTarget::BigQuery) => targets.bigquery = true,
                Err(unknown_name) => unknown.push(unknown_name),
            }
        }
        (targets, unknown)
    }

    pub fn firestore(&self) -> bool {
        self.firestore
    }

    pub fn bigquery(&self) -> bool {
        self.bigquery
    }
}

/// The document-store collection holding one summary per session.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryCollection(String);

impl SummaryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        SummaryCollection(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn document(&self, session_id: &str) -> DocumentPath {
        DocumentPath::in_collection(&self.0, session_id)
    }
}

pub struct SinkWriter {
    targets: SinkTargets,
    documents: Arc<dyn DocumentStore>,
    tables: Arc<dyn TableService>,
    summary: SummaryCollection,
    table: Option<TableRef>,
}

impl SinkWriter {
    pub fn new(
        config: &Config,
        documents: Arc<dyn DocumentStore>,
        tables: Arc<dyn TableService>,
    ) -> Self {
        SinkWriter {
            targets: config.sink_targets(),
            documents,
            tables,
            summary: SummaryCollection::new(&config.summary_collection),
            table: config
                .bigquery
                .dataset
                .as_deref()
                .map(|dataset| TableRef::new(dataset, &config.bigquery.table)),
        }
    }

    /// Writes the record to every enabled sink, document store first. A failure
    /// in the table sink does not undo the document store write.
    pub async fn write(&self, record: &JoinedRecord) -> Result<()> {
        let payload = record.to_document()?;

        if self.targets.firestore() {
            let result = self
                .write_summary(record.session_id.as_deref(), &payload)
                .await;
            count_write(SinkTarget::Firestore, &result);
            result?;
        }

        if self.targets.bigquery() {
            let result = self
                .write_table(payload, Some(record.ingestion_id.clone()))
                .await;
            count_write(SinkTarget::BigQuery, &result);
            result?;
        }

        Ok(())
    }

    /// Upserts the payload into the summary document of the session.
    pub async fn write_summary(&self, session_id: Option<&str>, payload: &Document) -> Result<()> {
        let Some(session_id) = session_id else {
            return Err(IngestError::Validation(
                "sessionId is required to store summary in Firestore".to_string(),
            ));
        };

        self.documents
            .set_merge(&self.summary.document(session_id), payload)
            .await?;
        tracing::info!(
            collection = self.summary.name(),
            session_id,
            "Stored session summary"
        );
        Ok(())
    }

    /// Streams the payload as a single row. `insert_id` lets the table service
    /// drop duplicates of the same row.
    pub async fn write_table(&self, mut payload: Document, insert_id: Option<String>) -> Result<()> {
        let Some(table) = &self.table else {
            return Err(IngestError::Validation(
                "A BigQuery dataset is required for BigQuery writes".to_string(),
            ));
        };

        let has_ingested_at = payload
            .get("ingestedAt")
            .is_some_and(|value| !value.is_null() && value != "");
        if !has_ingested_at {
            payload.insert("ingestedAt".into(), Value::String(utc_now()));
        }

        let rows = [InsertRow {
            insert_id,
            json: payload,
        }];
        let errors = self.tables.insert_rows(table, &rows).await?;
        if !errors.is_empty() {
            return Err(IngestError::Sink {
                table: table.to_string(),
                details: serde_json::to_string(&errors)?,
            });
        }

        tracing::info!(table = %table, "Inserted joined record");
        Ok(())
    }
}

fn count_write(target: SinkTarget, result: &Result<()>) {
    let outcome = match result {
        Ok(()) => "ok",
        Err(_) => "error",
    };
    shared::counter!(SINK_WRITES, "target" => target.as_str(), "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{RowError, RowErrorDetail};
    use crate::testutils::{MemoryDocumentStore, MemoryTable, doc};
    use serde_json::json;

    fn config(targets: &str, dataset: Option<&str>) -> Config {
        let mut config = Config::default();
        config.summary_targets = vec![targets.to_string()];
        config.bigquery.dataset = dataset.map(String::from);
        config
    }

    fn record(session_id: Option<&str>) -> JoinedRecord {
        JoinedRecord {
            ingestion_id: "ingestion-1".into(),
            uid: Some("u1".into()),
            session_id: session_id.map(String::from),
            source_object: "gs://b/s1/u1.csv".into(),
            ingested_at: "2024-05-01T10:00:00.000000+00:00".into(),
            csv_analysis: crate::analysis::analyze(&[]),
            csv_row_count: 0,
            attributes: Default::default(),
            documents: None,
            status: None,
            processed_at: None,
        }
    }

    fn writer(
        config: &Config,
    ) -> (SinkWriter, Arc<MemoryDocumentStore>, Arc<MemoryTable>) {
        let documents = Arc::new(MemoryDocumentStore::default());
        let tables = Arc::new(MemoryTable::default());
        let writer = SinkWriter::new(config, documents.clone(), tables.clone());
        (writer, documents, tables)
    }

    #[test]
    fn test_parse_targets() {
        let (targets, unknown) = SinkTargets::parse(&["Firestore, BIGQUERY ,", "kafka"]);
        assert!(targets.firestore());
        assert!(targets.bigquery());
        assert_eq!(unknown, vec!["kafka".to_string()]);

        let (targets, unknown) = SinkTargets::parse(&[""]);
        assert_eq!(targets, SinkTargets::default());
        assert!(unknown.is_empty());

        let (targets, _) = SinkTargets::parse(&["bigquery"]);
        assert!(!targets.firestore());
        assert!(targets.bigquery());
    }

    #[tokio::test]
    async fn test_write_firestore_only() {
        let (writer, documents, tables) = writer(&config("firestore", None));
        writer.write(&record(Some("s1"))).await.unwrap();

        let stored = documents.stored("sessionSummaries/s1").unwrap();
        assert_eq!(stored["ingestionId"], json!("ingestion-1"));
        assert!(tables.rows().is_empty());
    }

    #[tokio::test]
    async fn test_summary_write_merges() {
        let (writer, documents, _) = writer(&config("firestore", None));
        documents.insert(
            "sessionSummaries/s1",
            doc(json!({"status": "error", "note": "kept"})),
        );

        writer
            .write_summary(Some("s1"), &doc(json!({"status": "success"})))
            .await
            .unwrap();

        assert_eq!(
            documents.stored("sessionSummaries/s1").unwrap(),
            doc(json!({"status": "success", "note": "kept"}))
        );
    }

    #[tokio::test]
    async fn test_summary_requires_session_id() {
        let (writer, documents, _) = writer(&config("firestore", None));
        let result = writer.write(&record(None)).await;

        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert_eq!(documents.write_count(), 0);
    }

    #[tokio::test]
    async fn test_table_requires_dataset() {
        let (writer, _, tables) = writer(&config("bigquery", None));
        let result = writer.write(&record(Some("s1"))).await;

        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert!(tables.rows().is_empty());
    }

    #[tokio::test]
    async fn test_write_table() {
        let (writer, documents, tables) = writer(&config("bigquery", Some("proj.analytics")));
        writer.write(&record(Some("s1"))).await.unwrap();

        let rows = tables.rows();
        assert_eq!(rows.len(), 1);
        let (table, row) = &rows[0];
        assert_eq!(table.to_string(), "proj.analytics.joinedData");
        assert_eq!(row.insert_id.as_deref(), Some("ingestion-1"));
        assert_eq!(row.json["sessionId"], json!("s1"));
        assert_eq!(documents.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_table_sets_missing_ingested_at() {
        let (writer, _, tables) = writer(&config("bigquery", Some("analytics")));
        writer
            .write_table(doc(json!({"ingestedAt": null})), None)
            .await
            .unwrap();

        let rows = tables.rows();
        assert!(rows[0].1.json["ingestedAt"].is_string());
    }

    #[tokio::test]
    async fn test_row_errors_become_sink_error() {
        let (writer, _, tables) = writer(&config("bigquery", Some("analytics")));
        tables.reject_with(vec![RowError {
            index: 0,
            errors: vec![RowErrorDetail {
                reason: Some("invalid".into()),
                location: Some("csvAnalysis".into()),
                message: Some("no such field".into()),
            }],
        }]);

        match writer.write(&record(Some("s1"))).await {
            Err(IngestError::Sink { table, details }) => {
                assert_eq!(table, "analytics.joinedData");
                assert!(details.contains("no such field"));
            }
            other => panic!("expected SinkError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_table_failure_keeps_summary_write() {
        let (writer, documents, tables) =
            writer(&config("firestore,bigquery", Some("analytics")));
        tables.fail_inserts();

        let result = writer.write(&record(Some("s1"))).await;

        assert!(matches!(result, Err(IngestError::Client(_))));
        assert!(documents.stored("sessionSummaries/s1").is_some());
    }

    #[tokio::test]
    async fn test_no_targets_is_a_no_op() {
        let (writer, documents, tables) = writer(&config("kafka", Some("analytics")));
        writer.write(&record(None)).await.unwrap();
        assert_eq!(documents.write_count(), 0);
        assert!(tables.rows().is_empty());
    }
}
