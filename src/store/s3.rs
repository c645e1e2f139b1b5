use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::config::BlobStoreConfig;

use super::{BlobStore, StoreError, StoreResult};

/// S3-compatible blob storage (MinIO in local deployments).
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore").finish_non_exhaustive()
    }
}

fn blob_error(context: &str, err: impl std::error::Error) -> StoreError {
    StoreError::Blob(format!("{context}: {}", DisplayErrorContext(err)))
}

impl S3BlobStore {
    pub fn new(config: &BlobStoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "etl-worker",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint())
            .force_path_style(true)
            .build();

        info!(endpoint = %config.endpoint(), "blob store client initialized");

        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(blob_error("get_object", err));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| blob_error("read object body", e))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "object downloaded");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| blob_error("put_object", e))?;

        info!("object uploaded to {bucket}/{key}");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| blob_error("list_objects_v2", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        debug!(count = keys.len(), "objects listed");
        Ok(keys)
    }
}
