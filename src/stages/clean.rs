use serde_json::json;
use tracing::{info, instrument};

use crate::job::{CleanMessage, Stage};
use crate::metadata::DatasetMetadata;
use crate::processing::{self, clean::check_max_shrink};
use crate::types::DataSet;

use super::{output_key, StageContext, StageError, StageResult};

/// Concatenate every dataset in the input directory, clean it and write a single output.
#[instrument(skip_all, fields(job_id = %msg.job_id, input = %msg.input))]
pub async fn run(ctx: &StageContext, msg: &CleanMessage) -> StageResult<serde_json::Value> {
    let max_shrink = check_max_shrink(msg.max_shrink.unwrap_or(ctx.default_max_shrink))?;

    let parts: Vec<DataSet> = ctx
        .read_directory(&msg.input)
        .await?
        .into_iter()
        .map(|(_, ds)| ds)
        .collect();
    if parts.is_empty() {
        return Err(StageError::NoData(msg.input.to_string()));
    }

    let combined = DataSet::concat(&parts);
    let cleaned = processing::clean(&combined, max_shrink)?;
    info!(
        rows_in = combined.row_count(),
        rows_out = cleaned.row_count(),
        columns_in = combined.column_count(),
        columns_out = cleaned.column_count(),
        max_shrink,
        "dataset cleaned"
    );

    let key = output_key(Stage::Clean, &msg.job_id, 0, &msg.output);
    let output = ctx.write_dataset(&msg.output, &key, &cleaned).await?;
    let metadata = DatasetMetadata::infer(&cleaned, msg.output.to_string()).with_source(msg.input.to_string());

    Ok(json!({
        "job-id": msg.job_id,
        "output": output,
        "features": metadata.features,
        "metadata": metadata,
    }))
}
