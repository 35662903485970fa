//! S3-compatible object store.
//!
//! Works with AWS S3 and S3-compatible services (MinIO, Backblaze B2, Tigris
//! and others). One client serves every bucket; the bucket comes from the
//! locator of each request.

use super::{ListPage, ListRequest, MAX_BATCH_DELETE, ObjectMeta, ObjectStore, UploadedPart};
use crate::backend::BoxReader;
use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier},
};
use exn::ResultExt;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent requests.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint for non-AWS services.
    pub endpoint: Option<String>,
    pub region: String,
    pub key_id: String,
    pub key_secret: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    /// Rate limiter for concurrent requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(config.key_id, config.key_secret, None, None, "duopane-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region))
            // Exponential backoff: 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services
            .force_path_style(true);
        let name = match &config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => "s3".to_string(),
        };
        if let Some(endpoint_url) = config.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        let rate_limiter = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self { name, client, rate_limiter }
    }

    /// Acquire a rate limiter permit before making an API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendUnavailable(format!("{}: request limiter closed", self.name)))
    }

    fn parse_datetime(dt: Option<&DateTime>) -> OffsetDateTime {
        dt.and_then(|dt| OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Map an SDK error onto the storage taxonomy.
fn classify<E>(err: &SdkError<E>, locator: &str) -> ErrorKind
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
        return ErrorKind::BackendUnavailable(format!("{locator}: {}", DisplayErrorContext(err)));
    }
    let status = err.raw_response().map(|response| response.status().as_u16());
    match (err.code(), status) {
        (Some("NoSuchKey" | "NoSuchBucket" | "NotFound"), _) | (_, Some(404)) => ErrorKind::NotFound(locator.to_string()),
        (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _) | (_, Some(401 | 403)) => {
            ErrorKind::PermissionDenied(locator.to_string())
        },
        (Some("NotImplemented"), _) | (_, Some(501)) => ErrorKind::Unsupported(format!("{locator}: {}", DisplayErrorContext(err))),
        (Some("SlowDown" | "ServiceUnavailable"), _) | (_, Some(500..=599)) => {
            ErrorKind::BackendUnavailable(format!("{locator}: {}", DisplayErrorContext(err)))
        },
        _ => ErrorKind::BackendError(format!("{locator}: {}", DisplayErrorContext(err))),
    }
}

/// Percent-encode a `bucket/key` copy source, keeping the separators.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = format!("{bucket}/");
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn locator(bucket: &str, key: &str) -> String {
    format!("remote://{bucket}/{key}")
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>> {
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                modified_at: Self::parse_datetime(output.last_modified()),
            })),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => match classify(&err, &locator(bucket, key)) {
                ErrorKind::NotFound(_) if !key.is_empty() => Ok(None),
                kind => Err(Error::from(kind)),
            },
        }
    }

    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage> {
        let _permit = self.acquire_permit().await?;
        let mut call = self.client.list_objects_v2().bucket(bucket).prefix(&request.prefix);
        if let Some(delimiter) = request.delimiter {
            call = call.delimiter(delimiter.to_string());
        }
        if let Some(token) = &request.continuation {
            call = call.continuation_token(token);
        }
        if let Some(max_keys) = request.max_keys {
            call = call.max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX));
        }
        let output = call.send().await.map_err(|e| classify(&e, &locator(bucket, &request.prefix)))?;
        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectMeta {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    modified_at: Self::parse_datetime(object.last_modified()),
                })
            })
            .collect();
        let common_prefixes =
            output.common_prefixes().iter().filter_map(|p| p.prefix().map(str::to_string)).collect();
        let continuation = match output.is_truncated() {
            Some(true) => output.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok(ListPage { objects, common_prefixes, continuation })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let _permit = self.acquire_permit().await?;
        let output =
            self.client.get_object().bucket(bucket).key(key).send().await.map_err(|e| classify(&e, &locator(bucket, key)))?;
        let bytes = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::BackendUnavailable(format!("{}: download interrupted", locator(bucket, key))))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn reader(&self, bucket: &str, key: &str) -> Result<BoxReader> {
        let _permit = self.acquire_permit().await?;
        let output =
            self.client.get_object().bucket(bucket).key(key).send().await.map_err(|e| classify(&e, &locator(bucket, key)))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        let size = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        tracing::debug!(bucket, key, size, "uploaded object");
        Ok(())
    }

    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        let upload_id = output.upload_id().ok_or_else(|| {
            Error::from(ErrorKind::BackendError(format!("{}: no upload id in response", locator(bucket, key))))
        })?;
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        data: Vec<u8>,
    ) -> Result<UploadedPart> {
        let _permit = self.acquire_permit().await?;
        let size = data.len();
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        tracing::trace!(bucket, key, part = number, size, "uploaded part");
        Ok(UploadedPart { number, etag: output.e_tag().map(str::to_string) })
    }

    async fn complete_upload(&self, bucket: &str, key: &str, upload_id: &str, mut parts: Vec<UploadedPart>) -> Result<()> {
        parts.sort_by_key(|part| part.number);
        let count = parts.len();
        let completed = parts
            .into_iter()
            .map(|part| CompletedPart::builder().part_number(part.number).set_e_tag(part.etag).build())
            .collect::<Vec<_>>();
        let upload = CompletedMultipartUpload::builder().set_parts(Some(completed)).build();
        let _permit = self.acquire_permit().await?;
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        tracing::debug!(bucket, key, parts = count, "completed multipart upload");
        Ok(())
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to_bucket: &str, to: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        self.client
            .copy_object()
            .copy_source(encode_copy_source(bucket, from))
            .bucket(to_bucket)
            .key(to)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, from)))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, key)))?;
        Ok(())
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> Result<Vec<(String, Error)>> {
        if keys.len() > MAX_BATCH_DELETE {
            exn::bail!(ErrorKind::InvalidLocator(format!(
                "batch delete of {} keys exceeds the limit of {MAX_BATCH_DELETE}",
                keys.len()
            )));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::BackendError("cannot build delete request".to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .or_raise(|| ErrorKind::BackendError("cannot build delete request".to_string()))?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| classify(&e, &locator(bucket, "")))?;
        let failures = output
            .errors()
            .iter()
            .map(|failure| {
                let key = failure.key().unwrap_or_default().to_string();
                let item = locator(bucket, &key);
                let kind = match failure.code() {
                    Some("AccessDenied") => ErrorKind::PermissionDenied(item),
                    Some("NoSuchKey") => ErrorKind::NotFound(item),
                    code => ErrorKind::BackendError(format!(
                        "{item}: {} {}",
                        code.unwrap_or("unknown"),
                        failure.message().unwrap_or_default()
                    )),
                };
                (key, Error::from(kind))
            })
            .collect();
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("bucket", "plain/key.txt", "bucket/plain/key.txt")]
    #[case("bucket", "with space.txt", "bucket/with%20space.txt")]
    #[case("bucket", "ünï", "bucket/%C3%BCn%C3%AF")]
    #[case("bucket", "a+b#c", "bucket/a%2Bb%23c")]
    fn test_encode_copy_source(#[case] bucket: &str, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(encode_copy_source(bucket, key), expected);
    }

    #[test]
    fn test_parse_datetime() {
        let dt = DateTime::from_secs(1_700_000_000);
        assert_eq!(S3Store::parse_datetime(Some(&dt)).unix_timestamp(), 1_700_000_000);
        assert_eq!(S3Store::parse_datetime(None), OffsetDateTime::UNIX_EPOCH);
    }
}
