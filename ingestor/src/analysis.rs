//! Summary statistics over parsed CSV rows.

use indexmap::IndexMap;
use serde::Serialize;

use crate::csv_source::CsvRow;

const SAMPLE_SIZE: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvAnalysis {
    pub row_count: usize,
    pub columns: Vec<String>,
    /// Mean of the numeric cells per column, in order of first numeric cell.
    /// Columns without any numeric cell are absent.
    pub numeric_averages: IndexMap<String, f64>,
    /// First rows as read, absent when there are no rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Vec<CsvRow>>,
}

pub fn analyze(rows: &[CsvRow]) -> CsvAnalysis {
    let Some(first) = rows.first() else {
        return CsvAnalysis {
            row_count: 0,
            columns: Vec::new(),
            numeric_averages: IndexMap::new(),
            sample: None,
        };
    };

    // (sum, count) of the cells that parsed
    let mut totals: IndexMap<&str, (f64, usize)> = IndexMap::new();
    for row in rows {
        for (column, value) in row {
            if let Some(number) = parse_number(value) {
                let entry = totals.entry(column.as_str()).or_insert((0.0, 0));
                entry.0 += number;
                entry.1 += 1;
            }
        }
    }

    let numeric_averages = totals
        .into_iter()
        .map(|(column, (sum, count))| (column.to_string(), sum / count as f64))
        .collect();

    CsvAnalysis {
        row_count: rows.len(),
        columns: first.keys().cloned().collect(),
        numeric_averages,
        sample: Some(rows.iter().take(SAMPLE_SIZE).cloned().collect()),
    }
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let number: f64 = if value.contains('_') {
        strip_digit_separators(value)?.parse().ok()?
    } else {
        value.parse().ok()?
    };
    number.is_finite().then_some(number)
}

/// Removes `_` grouping separators such as `1_000`. Each one must sit
/// between two digits.
fn strip_digit_separators(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut stripped = String::with_capacity(value.len());
    for (i, c) in value.char_indices() {
        if c != '_' {
            stripped.push(c);
            continue;
        }
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + 1).copied();
        match (before, after) {
            (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit() => {}
            _ => return None,
        }
    }
    Some(stripped)
}
