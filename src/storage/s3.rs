use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ByteStream, ObjectStore, StorageError, StoredObject};

/// Multipart part size. S3 requires at least 5 MiB for all but the last part.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 bucket settings. Credentials fall back to the default AWS chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// For S3-compatible services (MinIO, R2, Supabase storage).
    pub endpoint_url: Option<String>,
}

impl S3Config {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.bucket_name.trim().is_empty() {
            return Err(StorageError::Config("bucket name cannot be empty".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(StorageError::Config("region cannot be empty".to_string()));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(StorageError::Config(
                "access key id and secret access key must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct S3ObjectStore {
    client: Client,
    bucket_name: String,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Result<Self, StorageError> {
        config.validate()?;

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region));
        if let (Some(key_id), Some(secret)) = (config.access_key_id, config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "drive-import-s3-config",
            ));
        }
        let custom_endpoint = config.endpoint_url.is_some();
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // S3-compatible services rarely support virtual-hosted buckets
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(custom_endpoint)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket_name: config.bucket_name,
        })
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket_name, key)
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Sdk(format!("put object failed: {e}")))?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> Result<(Vec<CompletedPart>, u64), StorageError> {
        let mut parts = Vec::new();
        let mut size = 0u64;
        let mut pending = Some(first);
        let mut buffer = BytesMut::with_capacity(PART_SIZE);
        let mut exhausted = false;

        loop {
            let part = match pending.take() {
                Some(part) => part,
                None if exhausted => break,
                None => {
                    let (next, done) = fill_part(body, &mut buffer).await?;
                    exhausted = done;
                    if next.is_empty() {
                        break;
                    }
                    next
                }
            };
            let part_number = parts.len() as i32 + 1;
            size += part.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket_name)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(S3Body::from(part))
                .send()
                .await
                .map_err(|e| StorageError::Sdk(format!("upload part {part_number} failed: {e}")))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
        }

        Ok((parts, size))
    }
}

/// Read from `body` until one part is buffered or the stream ends.
/// Returns the part and whether the stream is exhausted.
async fn fill_part(body: &mut ByteStream, buffer: &mut BytesMut) -> Result<(Bytes, bool), StorageError> {
    while buffer.len() < PART_SIZE {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk.map_err(StorageError::Upstream)?),
            None => return Ok((buffer.split().freeze(), true)),
        }
    }
    let part = buffer.split_to(PART_SIZE).freeze();
    Ok((part, false))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        mut body: ByteStream,
    ) -> Result<StoredObject, StorageError> {
        let mut buffer = BytesMut::with_capacity(PART_SIZE);
        let (first, exhausted) = fill_part(&mut body, &mut buffer).await?;

        if exhausted {
            let size = first.len() as u64;
            self.put_single(key, content_type, first).await?;
            debug!(key, size, "stored object with single put");
            return Ok(StoredObject {
                key: key.to_string(),
                size,
                location: self.location(key),
            });
        }

        // leftover bytes beyond the first part go back in front of the stream
        let leftover = buffer.split().freeze();
        let mut body: ByteStream = if leftover.is_empty() {
            body
        } else {
            futures::stream::once(async move { Ok(leftover) })
                .chain(body)
                .boxed()
        };

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Sdk(format!("create multipart upload failed: {e}")))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Sdk("multipart upload returned no upload id".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, &mut body).await {
            Ok((parts, size)) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket_name)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| StorageError::Sdk(format!("complete multipart upload failed: {e}")))?;
                debug!(key, size, "stored object with multipart upload");
                Ok(StoredObject {
                    key: key.to_string(),
                    size,
                    location: self.location(key),
                })
            }
            Err(err) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket_name)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort, "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }
}
