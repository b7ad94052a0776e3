use crate::config::S3Config;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Presigned PUT issued for a single object key
#[derive(Debug, Clone)]
pub struct PresignedPut {
    /// URL the client PUTs the object bytes to
    pub url: String,
    /// When the signature stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// S3 client wrapper for poster image storage
///
/// Issues presigned PUT URLs and computes public read URLs. The service
/// itself never moves object bytes; clients upload directly.
pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl ObjectStore {
    /// Create a new object store from configuration
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Object store initialized"
        );

        Ok(Self::with_client(client, config))
    }

    /// Create an object store around an existing client
    ///
    /// Lets callers supply explicit credentials, which also makes
    /// presigning testable without a credential chain.
    pub fn with_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    /// Presign a PUT for `key`, constrained to the declared content type,
    /// a public-read ACL and a maximum object size
    ///
    /// Presigning is a local signing operation; no request is sent here.
    pub async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        max_size_bytes: i64,
        expires_in: Duration,
    ) -> Result<PresignedPut> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(max_size_bytes)
            .acl(ObjectCannedAcl::PublicRead)
            .presigned(presigning_config)
            .await
            .context("Failed to presign upload")?;

        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in.as_secs() as i64);

        debug!(key = %key, content_type = %content_type, "Presigned upload URL issued");

        Ok(PresignedPut {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    /// Public read URL for an object key
    ///
    /// Virtual-hosted style against AWS proper, path style against a
    /// custom endpoint.
    pub fn public_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, Region};

    fn test_config(endpoint_url: Option<String>) -> S3Config {
        S3Config {
            bucket: "movie-rater".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url,
            force_path_style: false,
            presign_timeout_secs: 10,
        }
    }

    fn test_store(endpoint_url: Option<String>) -> ObjectStore {
        let credentials =
            Credentials::new("test-access-key", "test-secret-key", None, None, "static");
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(credentials)
            .build();
        ObjectStore::with_client(S3Client::from_conf(s3_config), &test_config(endpoint_url))
    }

    #[test]
    fn public_url_is_virtual_hosted_by_default() {
        let store = test_store(None);
        assert_eq!(
            store.public_url("media/movies/movie-abc123.png"),
            "https://movie-rater.s3.eu-west-1.amazonaws.com/media/movies/movie-abc123.png"
        );
    }

    #[test]
    fn public_url_uses_custom_endpoint_path_style() {
        let store = test_store(Some("http://localhost:9000/".to_string()));
        assert_eq!(
            store.public_url("media/movies/movie-abc123.png"),
            "http://localhost:9000/movie-rater/media/movies/movie-abc123.png"
        );
    }

    #[tokio::test]
    async fn presigned_put_embeds_key_and_signing_constraints() {
        let store = test_store(None);

        let presigned = store
            .presign_put(
                "media/movies/movie-deadbeef.jpg",
                "image/jpeg",
                5 * 1024 * 1024,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        assert!(presigned.url.contains("movie-rater"));
        assert!(presigned.url.contains("media/movies/movie-deadbeef.jpg"));
        assert!(presigned.url.contains("X-Amz-Expires=3600"));
        // Content type, ACL and length are part of the signed header set.
        assert!(presigned.url.contains("X-Amz-SignedHeaders="));
        assert!(presigned.url.contains("content-type"));
        assert!(presigned.url.contains("content-length"));
        assert!(presigned.url.contains("x-amz-acl"));
        assert!(presigned.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn presigned_put_expiry_follows_configuration() {
        let store = test_store(None);

        let presigned = store
            .presign_put(
                "media/movies/movie-cafe0123.png",
                "image/png",
                1024,
                Duration::from_secs(600),
            )
            .await
            .unwrap();

        assert!(presigned.url.contains("X-Amz-Expires=600"));
    }
}
