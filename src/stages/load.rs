use serde_json::json;
use tracing::{info, instrument};

use crate::job::{LoadMessage, Stage};
use crate::metadata::DatasetMetadata;

use super::{output_key, StageContext, StageError, StageResult};

/// Re-export every dataset found directly in the input directory as a CSV object.
///
/// Unsupported and empty objects are skipped. All inputs are read before the first write, so a
/// read failure leaves the output location untouched.
#[instrument(skip_all, fields(job_id = %msg.job_id, input = %msg.input))]
pub async fn run(ctx: &StageContext, msg: &LoadMessage) -> StageResult<serde_json::Value> {
    let datasets = ctx.read_directory(&msg.input).await?;
    if datasets.is_empty() {
        return Err(StageError::NoData(msg.input.to_string()));
    }

    let mut metadata = DatasetMetadata::new(msg.output.to_string()).with_source(msg.input.to_string());
    let mut loaded = Vec::with_capacity(datasets.len());
    for (index, (source, dataset)) in datasets.iter().enumerate() {
        let key = output_key(Stage::Load, &msg.job_id, index, &msg.output);
        loaded.push(ctx.write_dataset(&msg.output, &key, dataset).await?);
        metadata.absorb(dataset);
        info!(source = %source, rows = dataset.row_count(), "dataset exported");
    }

    Ok(json!({
        "job-id": msg.job_id,
        "loaded": loaded,
        "features": metadata.features,
        "metadata": metadata,
    }))
}
