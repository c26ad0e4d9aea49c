//! Joins the per-session documents (profile, survey, consent, calibration)
//! onto an upload.
//!
//! Joins are best-effort: a document that is missing or fails to load becomes
//! an empty object and never aborts the pipeline.

use serde::Serialize;
use std::sync::Arc;

use crate::clients::{Document, DocumentPath, DocumentStore};
use crate::config::DocumentPaths;
use crate::envelope::Identifiers;
use crate::metrics_defs::DOCUMENT_JOINS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Profile,
    Survey,
    Consent,
    Calibration,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Profile,
        DocumentKind::Survey,
        DocumentKind::Consent,
        DocumentKind::Calibration,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Profile => "profile",
            DocumentKind::Survey => "survey",
            DocumentKind::Consent => "consent",
            DocumentKind::Calibration => "calibration",
        }
    }
}

pub fn render_template(template: &str, uid: &str, session_id: &str) -> String {
    template
        .replace("{uid}", uid)
        .replace("{sessionId}", session_id)
}

/// Result of one document fetch.
#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    Found(Document),
    /// The document does not exist
    Missing,
    /// Invalid path, transport or auth failure
    Failed(String),
}

impl JoinOutcome {
    fn label(&self) -> &'static str {
        match self {
            JoinOutcome::Found(_) => "found",
            JoinOutcome::Missing => "missing",
            JoinOutcome::Failed(_) => "failed",
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            JoinOutcome::Found(document) => document,
            JoinOutcome::Missing | JoinOutcome::Failed(_) => Document::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct JoinedDocuments {
    pub profile: Document,
    pub survey: Document,
    pub consent: Document,
    pub calibration: Document,
}

pub struct DocumentJoiner {
    store: Arc<dyn DocumentStore>,
    paths: DocumentPaths,
}

impl DocumentJoiner {
    pub fn new(store: Arc<dyn DocumentStore>, paths: DocumentPaths) -> Self {
        DocumentJoiner { store, paths }
    }

    /// Fetches the four documents concurrently. Returns `None` without
    /// fetching anything unless both identifiers are known.
    pub async fn join(&self, identifiers: &Identifiers) -> Option<JoinedDocuments> {
        let Some((uid, session_id)) = identifiers.both() else {
            tracing::debug!("Identifiers incomplete, skipping document joins");
            return None;
        };

        let (profile, survey, consent, calibration) = tokio::join!(
            self.fetch(DocumentKind::Profile, uid, session_id),
            self.fetch(DocumentKind::Survey, uid, session_id),
            self.fetch(DocumentKind::Consent, uid, session_id),
            self.fetch(DocumentKind::Calibration, uid, session_id),
        );

        Some(JoinedDocuments {
            profile: profile.into_document(),
            survey: survey.into_document(),
            consent: consent.into_document(),
            calibration: calibration.into_document(),
        })
    }

    pub async fn fetch(&self, kind: DocumentKind, uid: &str, session_id: &str) -> JoinOutcome {
        let template = self.paths.template(kind);
        let outcome = match DocumentPath::parse(&render_template(template, uid, session_id)) {
            Ok(path) => match self.store.get(&path).await {
                Ok(Some(document)) => JoinOutcome::Found(document),
                Ok(None) => JoinOutcome::Missing,
                Err(e) => JoinOutcome::Failed(e.to_string()),
            },
            Err(e) => JoinOutcome::Failed(e.to_string()),
        };

        match &outcome {
            JoinOutcome::Found(_) => {}
            JoinOutcome::Missing => {
                tracing::debug!(document = kind.as_str(), template, "Document does not exist")
            }
            JoinOutcome::Failed(reason) => tracing::warn!(
                document = kind.as_str(),
                template,
                reason = %reason,
                "Failed to fetch document"
            ),
        }
        shared::counter!(DOCUMENT_JOINS, "document" => kind.as_str(), "outcome" => outcome.label())
            .increment(1);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MemoryDocumentStore, doc};
    use serde_json::json;

    fn identifiers(uid: Option<&str>, session_id: Option<&str>) -> Identifiers {
        Identifiers {
            uid: uid.map(String::from),
            session_id: session_id.map(String::from),
        }
    }

    fn joinable_paths() -> DocumentPaths {
        DocumentPaths {
            profile: "users/{uid}".into(),
            survey: "sessions/{sessionId}/survey/latest".into(),
            consent: "sessions/{sessionId}/consent/{uid}".into(),
            calibration: "sessions/{sessionId}/calibration/latest".into(),
        }
    }

    fn seeded_store() -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::default());
        store.insert("users/u1", doc(json!({"displayName": "Ada"})));
        store.insert("sessions/s1/survey/latest", doc(json!({"age": 30})));
        store.insert("sessions/s1/consent/u1", doc(json!({"agreed": true})));
        store.insert("sessions/s1/calibration/latest", doc(json!({"error": 1.2})));
        store
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("sessions/{sessionId}/consent/{uid}", "u1", "s1"),
            "sessions/s1/consent/u1"
        );
        assert_eq!(render_template("static/doc", "u1", "s1"), "static/doc");
    }

    #[tokio::test]
    async fn test_join_all_found() {
        let joiner = DocumentJoiner::new(seeded_store(), joinable_paths());
        let joined = joiner
            .join(&identifiers(Some("u1"), Some("s1")))
            .await
            .unwrap();

        assert_eq!(joined.profile, doc(json!({"displayName": "Ada"})));
        assert_eq!(joined.survey, doc(json!({"age": 30})));
        assert_eq!(joined.consent, doc(json!({"agreed": true})));
        assert_eq!(joined.calibration, doc(json!({"error": 1.2})));
    }

    #[tokio::test]
    async fn test_join_skipped_without_identifiers() {
        let store = seeded_store();
        let joiner = DocumentJoiner::new(store.clone(), joinable_paths());

        assert_eq!(joiner.join(&identifiers(Some("u1"), None)).await, None);
        assert_eq!(joiner.join(&identifiers(None, Some("s1"))).await, None);
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_the_others() {
        for failing in [
            "users/u1",
            "sessions/s1/survey/latest",
            "sessions/s1/consent/u1",
            "sessions/s1/calibration/latest",
        ] {
            let store = seeded_store();
            store.fail_reads_of(failing);
            let joiner = DocumentJoiner::new(store, joinable_paths());

            let joined = joiner
                .join(&identifiers(Some("u1"), Some("s1")))
                .await
                .unwrap();
            let documents = [
                ("users/u1", &joined.profile),
                ("sessions/s1/survey/latest", &joined.survey),
                ("sessions/s1/consent/u1", &joined.consent),
                ("sessions/s1/calibration/latest", &joined.calibration),
            ];
            for (path, document) in documents {
                assert_eq!(document.is_empty(), path == failing, "path {path}");
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_outcomes() {
        let store = seeded_store();
        store.fail_reads_of("users/u1");
        let joiner = DocumentJoiner::new(store, DocumentPaths::default());

        assert!(matches!(
            joiner.fetch(DocumentKind::Profile, "u1", "s1").await,
            JoinOutcome::Failed(_)
        ));
        assert_eq!(
            joiner.fetch(DocumentKind::Profile, "u2", "s1").await,
            JoinOutcome::Missing
        );
        // The stock survey template names a collection, not a document
        assert!(matches!(
            joiner.fetch(DocumentKind::Survey, "u1", "s1").await,
            JoinOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_template_yields_empty_documents() {
        let joiner = DocumentJoiner::new(seeded_store(), DocumentPaths::default());
        let joined = joiner
            .join(&identifiers(Some("u1"), Some("s1")))
            .await
            .unwrap();

        assert_eq!(joined.profile, doc(json!({"displayName": "Ada"})));
        assert!(joined.survey.is_empty());
        assert!(joined.consent.is_empty());
        assert!(joined.calibration.is_empty());
    }
}
