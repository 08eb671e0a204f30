//! S3-backed object store
//!
//! The first path segment names the bucket and the rest is the object key,
//! so `docchat-index/indices/a.json` is key `indices/a.json` in bucket
//! `docchat-index`. Works against S3-compatible endpoints such as LocalStack
//! when `endpoint_url` is set.

use super::ObjectStore;
use crate::config::{StorageConfig, StorageEnvironment};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info};

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn with_client(client: S3Client) -> Self {
        Self { client }
    }

    /// Connect using the AWS environment plus the overrides in `config`,
    /// creating the buckets in local mode.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();
        let store = Self::with_client(S3Client::from_conf(s3_config));

        for bucket in [&config.asset_bucket, &config.index_bucket] {
            if store.bucket_exists(bucket).await? {
                continue;
            }
            match config.environment {
                StorageEnvironment::Local => {
                    info!(bucket = %bucket, "Creating missing bucket");
                    store.create_bucket(bucket).await?;
                }
                StorageEnvironment::Production => {
                    return Err(AppError::Storage {
                        message: format!("bucket {} does not exist", bucket),
                    });
                }
            }
        }
        Ok(store)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(e) => Err(s3_error("head bucket", bucket, e)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| s3_error("create bucket", bucket, e))?;
        Ok(())
    }

    /// Whether any object lives under `key/`
    async fn prefix_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(format!("{}/", key))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| s3_error("list", key, e))?;
        Ok(!output.contents().is_empty())
    }
}

/// `(bucket, key)` for an object path. The key is empty for a bare bucket.
fn split_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if bucket.is_empty() {
        return Err(AppError::InvalidFormat {
            message: format!("object path has no bucket: {}", path),
        });
    }
    Ok((bucket, key.trim_end_matches('/')))
}

fn object_path(path: &str) -> Result<(&str, &str)> {
    let (bucket, key) = split_path(path)?;
    if key.is_empty() {
        return Err(AppError::InvalidFormat {
            message: format!("object path has no key: {}", path),
        });
    }
    Ok((bucket, key))
}

fn s3_error<E>(operation: &str, target: &str, err: E) -> AppError
where
    E: std::error::Error,
{
    AppError::Storage {
        message: format!("{} {} failed: {}", operation, target, DisplayErrorContext(err)),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let (bucket, key) = split_path(path)?;
        if key.is_empty() {
            return self.bucket_exists(bucket).await;
        }

        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => {
                self.prefix_exists(bucket, key).await
            }
            Err(e) => Err(s3_error("head", path, e)),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let (bucket, key) = object_path(path)?;
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(AppError::ObjectNotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(s3_error("get", path, e)),
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("reading {} failed: {}", path, e),
            })?
            .into_bytes()
            .to_vec();
        debug!(path, bytes = bytes.len(), "Read object");
        Ok(bytes)
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let (bucket, key) = object_path(path)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| s3_error("put", path, e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (bucket, key) = split_path(prefix)?;
        let key_prefix = if key.is_empty() { String::new() } else { format!("{}/", key) };

        let mut paths = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(&key_prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| s3_error("list", prefix, e))?;

            paths.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| format!("{}/{}", bucket, key)),
            );
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Buckets are created; prefixes inside a bucket need no creation
    async fn create_dir(&self, path: &str) -> Result<()> {
        let (bucket, _) = split_path(path)?;
        if !self.bucket_exists(bucket).await? {
            self.create_bucket(bucket).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("docchat-index/indices/a.json").unwrap(),
            ("docchat-index", "indices/a.json")
        );
        assert_eq!(split_path("/docchat-assets/").unwrap(), ("docchat-assets", ""));
        assert_eq!(split_path("bucket/dir/").unwrap(), ("bucket", "dir"));
        assert!(split_path("/").is_err());
    }

    #[test]
    fn test_object_path_requires_key() {
        assert!(matches!(
            object_path("docchat-index"),
            Err(AppError::InvalidFormat { .. })
        ));
        assert_eq!(
            object_path("docchat-index/storage.json").unwrap(),
            ("docchat-index", "storage.json")
        );
    }
}
