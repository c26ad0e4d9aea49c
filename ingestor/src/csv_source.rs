//! Fetches the uploaded CSV and parses it into header-keyed rows.

use indexmap::IndexMap;

use crate::clients::{ClientError, ObjectRef, ObjectStorage};
use crate::errors::{IngestError, Result};

/// One CSV row, keyed by header in header order.
pub type CsvRow = IndexMap<String, String>;

pub async fn fetch_rows(storage: &dyn ObjectStorage, object: &ObjectRef) -> Result<Vec<CsvRow>> {
    if !storage.exists(object).await? {
        return Err(IngestError::NotFound(object.clone()));
    }

    let text = match storage.download_text(object).await {
        Ok(text) => text,
        // Deleted between the existence check and the download
        Err(ClientError::NotFound(_)) => return Err(IngestError::NotFound(object.clone())),
        Err(e) => return Err(e.into()),
    };

    let rows = parse_rows(&text)?;
    tracing::debug!(object = %object, rows = rows.len(), "Parsed CSV");
    Ok(rows)
}

/// Parses comma-separated text whose first record is the header. Short rows
/// are padded with empty cells and cells beyond the header are dropped.
pub fn parse_rows(text: &str) -> Result<Vec<CsvRow>, csv::Error> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: CsvRow = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                (
                    header.to_string(),
                    record.get(i).unwrap_or_default().to_string(),
                )
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
