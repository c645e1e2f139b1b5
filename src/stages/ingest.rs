use serde_json::json;
use tracing::{info, instrument};

use crate::ingestion::{read_from_bytes, CsvOptions, IngestionFormat, ReadOptions};
use crate::job::{IngestMessage, Stage};
use crate::metadata::DatasetMetadata;

use super::{output_key, StageContext, StageError, StageResult};

/// Download a remote CSV, type it, and store it as the job's single output object.
#[instrument(skip_all, fields(job_id = %msg.job_id, url = %msg.ingestion_json.url))]
pub async fn run(ctx: &StageContext, msg: &IngestMessage) -> StageResult<serde_json::Value> {
    let request = &msg.ingestion_json;
    let body = ctx.fetcher.fetch(&request.url, request.token.as_deref()).await?;

    let mut csv = match request.separator.as_deref() {
        Some(separator) => CsvOptions::with_separator(separator)?,
        None => CsvOptions::default(),
    };
    csv.has_headers = request.first_line_labels;
    if !request.first_line_labels {
        csv.labels = request.labels.clone();
    }

    let options = ReadOptions {
        format: Some(IngestionFormat::Csv),
        csv,
        observer: ctx.observer.clone(),
        ..ReadOptions::default()
    };
    let dataset = read_from_bytes(&request.url, body, &options).map_err(|error| StageError::Read {
        source_ref: request.url.clone(),
        error,
    })?;

    let key = output_key(Stage::Ingest, &msg.job_id, 0, &msg.output);
    let ingested = ctx.write_dataset(&msg.output, &key, &dataset).await?;

    let metadata = DatasetMetadata::infer(&dataset, msg.output.to_string()).with_source(request.url.clone());
    info!(rows = dataset.row_count(), object = %ingested, "source ingested");

    Ok(json!({
        "job-id": msg.job_id,
        "ingested": ingested,
        "features": metadata.features,
        "metadata": metadata,
    }))
}
