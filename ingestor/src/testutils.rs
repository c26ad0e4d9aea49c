use async_trait::async_trait;
use axum::Router;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::net::TcpListener;
use url::Url;

use crate::clients::{
    ClientError, Document, DocumentPath, DocumentStore, InsertRow, ObjectRef, ObjectStorage,
    RowError, TableRef, TableService,
};

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_test_server(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A Pub/Sub push body whose `data` is the base64 encoded `payload`.
pub fn pubsub_body(payload: Value) -> Vec<u8> {
    serde_json::json!({
        "message": {
            "attributes": {},
            "data": STANDARD.encode(payload.to_string()),
        }
    })
    .to_string()
    .into_bytes()
}

fn unavailable(service: &'static str) -> ClientError {
    ClientError::Status {
        service,
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "backend unavailable".into(),
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStorage {
    pub fn put(&self, bucket: &str, name: &str, content: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.into(), name.into()), content.into());
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn exists(&self, object: &ObjectRef) -> Result<bool, ClientError> {
        let key = (object.bucket.clone(), object.name.clone());
        Ok(self.objects.lock().unwrap().contains_key(&key))
    }

    async fn download_text(&self, object: &ObjectRef) -> Result<String, ClientError> {
        let key = (object.bucket.clone(), object.name.clone());
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(object.to_string()))
    }
}

/// Documents keyed by their slash-joined path, with merge-on-write semantics.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    failing_reads: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
    gets: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn insert(&self, path: &str, document: Document) {
        self.documents
            .lock()
            .unwrap()
            .insert(path.to_string(), document);
    }

    pub fn stored(&self, path: &str) -> Option<Document> {
        self.documents.lock().unwrap().get(path).cloned()
    }

    pub fn fail_reads_of(&self, path: &str) {
        self.failing_reads.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, ClientError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let key = path.to_string();
        if self.failing_reads.lock().unwrap().contains(&key) {
            return Err(unavailable("firestore"));
        }
        Ok(self.documents.lock().unwrap().get(&key).cloned())
    }

    async fn set_merge(&self, path: &DocumentPath, fields: &Document) -> Result<(), ClientError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable("firestore"));
        }
        self.documents
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend(fields.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTable {
    rows: Mutex<Vec<(TableRef, InsertRow)>>,
    row_errors: Mutex<Vec<RowError>>,
    fail: AtomicBool,
}

impl MemoryTable {
    /// Accepted rows with the table they were written to
    pub fn rows(&self) -> Vec<(TableRef, InsertRow)> {
        self.rows.lock().unwrap().clone()
    }

    /// Rejects every following insert with these row errors.
    pub fn reject_with(&self, errors: Vec<RowError>) {
        *self.row_errors.lock().unwrap() = errors;
    }

    /// Fails every following insert at the transport level.
    pub fn fail_inserts(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableService for MemoryTable {
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[InsertRow],
    ) -> Result<Vec<RowError>, ClientError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("bigquery"));
        }
        let errors = self.row_errors.lock().unwrap().clone();
        if !errors.is_empty() {
            return Ok(errors);
        }
        self.rows
            .lock()
            .unwrap()
            .extend(rows.iter().map(|row| (table.clone(), row.clone())));
        Ok(Vec::new())
    }
}
