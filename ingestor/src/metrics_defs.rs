use shared::metrics_defs::{MetricDef, MetricType};

pub const INGEST_REQUESTS: MetricDef = MetricDef {
    name: "ingest.requests",
    metric_type: MetricType::Counter,
    description: "Ingest requests handled. Tagged with outcome (ok or the error kind).",
};

pub const INGEST_DURATION: MetricDef = MetricDef {
    name: "ingest.duration",
    metric_type: MetricType::Histogram,
    description: "Time to process one notification in seconds. Tagged with outcome.",
};

pub const CSV_ROWS: MetricDef = MetricDef {
    name: "csv.rows",
    metric_type: MetricType::Histogram,
    description: "Number of data rows in each fetched CSV",
};

pub const DOCUMENT_JOINS: MetricDef = MetricDef {
    name: "documents.joins",
    metric_type: MetricType::Counter,
    description: "Auxiliary document fetches. Tagged with document, outcome (found, missing, failed).",
};

pub const SINK_WRITES: MetricDef = MetricDef {
    name: "sinks.writes",
    metric_type: MetricType::Counter,
    description: "Writes of joined records. Tagged with target, outcome.",
};

pub const FAILURE_RECORDS: MetricDef = MetricDef {
    name: "failures.records",
    metric_type: MetricType::Counter,
    description: "Handled pipeline failures. Tagged with outcome (recorded, logged, write_failed).",
};

pub const ALL_METRICS: &[MetricDef] = &[
    INGEST_REQUESTS,
    INGEST_DURATION,
    CSV_ROWS,
    DOCUMENT_JOINS,
    SINK_WRITES,
    FAILURE_RECORDS,
];
