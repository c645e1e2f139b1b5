use serde_json::json;
use tracing::{info, instrument};

use crate::job::{JoinMessage, Stage};
use crate::metadata::DatasetMetadata;
use crate::processing::{join_all, MissingColumnPolicy};
use crate::types::DataSet;

use super::{output_key, StageContext, StageError, StageResult};

/// Join the inputs, in the order given, on the message's column and write one output.
///
/// An input naming a file of a known format is read as that file; any other input is a
/// directory whose datasets are concatenated first.
#[instrument(skip_all, fields(job_id = %msg.job_id, column = %msg.column, mode = %msg.mode))]
pub async fn run(ctx: &StageContext, msg: &JoinMessage) -> StageResult<serde_json::Value> {
    let mut inputs: Vec<DataSet> = Vec::with_capacity(msg.inputs.len());
    for input in &msg.inputs {
        let dataset = ctx
            .read_input(input)
            .await?
            .ok_or_else(|| StageError::NoData(input.to_string()))?;
        inputs.push(dataset);
    }

    let joined = join_all(&inputs, &msg.column, msg.mode, MissingColumnPolicy::Fail)?;
    info!(inputs = inputs.len(), rows = joined.row_count(), "datasets joined");

    let key = output_key(Stage::Join, &msg.job_id, 0, &msg.output);
    let output = ctx.write_dataset(&msg.output, &key, &joined).await?;
    let metadata = DatasetMetadata::infer(&joined, msg.output.to_string());

    Ok(json!({
        "job-id": msg.job_id,
        "output": output,
        "features": metadata.features,
        "metadata": metadata,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::job::BlobRef;
    use crate::processing::{JoinError, JoinMode};
    use crate::stages::StaticFetcher;
    use crate::store::{BlobStore, MemoryBlobStore};

    async fn context() -> (Arc<MemoryBlobStore>, StageContext) {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put("bkt", "a.csv", b"id,x\n1,a\n2,b\n3,c\n".to_vec(), "text/csv").await.unwrap();
        blobs.put("bkt", "b/part-0.csv", b"id,y\n2,20\n".to_vec(), "text/csv").await.unwrap();
        blobs.put("bkt", "b/part-1.csv", b"id,y\n4,40\n".to_vec(), "text/csv").await.unwrap();
        blobs.put("bkt", "c.csv", b"key,z\n1,1\n".to_vec(), "text/csv").await.unwrap();
        let ctx = StageContext::new(blobs.clone(), Arc::new(StaticFetcher::new()));
        (blobs, ctx)
    }

    fn message(mode: JoinMode, inputs: &[&str]) -> JoinMessage {
        JoinMessage {
            job_id: "join-1".into(),
            column: "id".into(),
            mode,
            inputs: inputs.iter().map(|s| s.parse().unwrap()).collect(),
            output: BlobRef::new("bkt", "joined"),
        }
    }

    #[tokio::test]
    async fn file_and_directory_inputs() {
        let (blobs, ctx) = context().await;

        let result = run(&ctx, &message(JoinMode::Outer, &["bkt/a.csv", "bkt/b"])).await.unwrap();

        let key = result["output"].as_str().unwrap().strip_prefix("bkt/").unwrap().to_string();
        let written = String::from_utf8(blobs.get("bkt", &key).await.unwrap()).unwrap();
        assert_eq!(written, "id,x,y\n1,a,\n2,b,20\n3,c,\n4,,40\n");
        assert_eq!(result["metadata"]["location"], "bkt/joined");
    }

    #[tokio::test]
    async fn missing_join_column_fails_without_output() {
        let (blobs, ctx) = context().await;

        let err = run(&ctx, &message(JoinMode::Inner, &["bkt/a.csv", "bkt/c.csv"])).await.unwrap_err();

        assert!(matches!(err, StageError::Join(JoinError::MissingColumn { input: 1, .. })));
        assert!(blobs.keys("bkt").iter().all(|k| !k.starts_with("joined/")));
    }
}
