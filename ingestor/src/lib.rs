//! Webhook that joins uploaded session CSVs with their Firestore documents and
//! stores the result in Firestore and/or BigQuery.

pub mod analysis;
pub mod api;
pub mod clients;
pub mod config;
pub mod csv_source;
pub mod documents;
pub mod envelope;
pub mod errors;
pub mod failure;
pub mod metrics_defs;
pub mod pipeline;
pub mod record;
pub mod sinks;

#[cfg(test)]
pub mod testutils;

use std::sync::Arc;

use clients::Clients;
use config::Config;
use errors::StartupError;
use pipeline::Pipeline;

pub async fn run(config: Config) -> Result<(), StartupError> {
    config.validate()?;
    config.warn_suspicious();
    if let Some(bucket) = &config.storage_bucket {
        tracing::info!(bucket = %bucket, "Configured storage bucket");
    }

    let clients = Clients::from_config(&config).await?;
    let pipeline = Arc::new(Pipeline::new(&config, clients));
    api::serve(&config.listener, pipeline).await
}
