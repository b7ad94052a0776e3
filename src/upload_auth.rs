use crate::config::UploadConfig;
use crate::error::ApiError;
use crate::object_store::ObjectStore;
use crate::upload_limiter::{LimitDecision, UploadRateLimiter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Image extensions accepted for poster uploads
const ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".webp", ".gif"];

/// Image content types accepted for poster uploads
const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Upload authorization failures
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file uploads are disabled")]
    Disabled,

    #[error("You need to provide a filename")]
    EmptyFilename,

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("content type {declared} does not match {expected} for this file extension")]
    MediaTypeMismatch {
        declared: String,
        expected: &'static str,
    },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("file_hash must be 16 to 64 lowercase hex characters")]
    InvalidFileHash,

    #[error("upload limit reached, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("failed to issue upload credential: {0}")]
    Presign(#[from] anyhow::Error),
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Disabled => ApiError::UploadsDisabled,
            UploadError::EmptyFilename => ApiError::validation("You need to provide a filename"),
            UploadError::UnsupportedExtension(name) => {
                ApiError::UnsupportedMediaType(format!("unsupported file extension: {}", name))
            }
            UploadError::MediaTypeMismatch { declared, expected } => ApiError::MediaTypeMismatch {
                declared,
                expected: expected.to_string(),
            },
            UploadError::UnsupportedContentType(content_type) => {
                ApiError::UnsupportedMediaType(format!("unsupported content type: {}", content_type))
            }
            UploadError::InvalidFileHash => {
                ApiError::validation("file_hash must be 16 to 64 lowercase hex characters")
            }
            UploadError::RateLimited { retry_after_secs } => {
                ApiError::RateLimitExceeded { retry_after_secs }
            }
            UploadError::Presign(err) => ApiError::CredentialIssuance(err.to_string()),
        }
    }
}

/// Proposed upload, as submitted by the client
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    /// Original filename; only its extension matters for validation
    #[serde(default)]
    pub filename: String,
    /// Content type the client intends to send
    #[serde(default)]
    pub content_type: String,
    /// Content hash for deduplicated storage keys
    #[serde(default)]
    pub file_hash: Option<String>,
}

/// Credential authorizing one direct-to-storage upload
#[derive(Debug, Serialize)]
pub struct UploadCredential {
    /// Presigned URL the file bytes go to
    pub upload_url: String,
    /// HTTP method the credential is scoped to
    pub method: String,
    /// Storage key the credential is scoped to
    pub key: String,
    /// Read URL once the upload completes
    pub public_url: String,
    /// Headers the upload request must carry
    pub headers: BTreeMap<String, String>,
    /// Seconds until the credential expires
    pub expires_in_secs: u64,
    /// Absolute expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// Maximum accepted payload size
    pub max_size_mb: u64,
    /// Authorizations left in the current rate window
    pub uploads_remaining: u32,
    /// Whether the key is content-addressed
    pub deduplicated: bool,
}

/// Authorizes direct-to-S3 poster uploads
///
/// Validates the proposed file, enforces the per-user rate limit, derives
/// the storage key and issues a presigned PUT scoped to exactly that key.
/// The rate counter increments before presigning; a slot is spent even if
/// credential issuance subsequently fails.
pub struct UploadAuthorizer {
    object_store: Arc<ObjectStore>,
    limiter: UploadRateLimiter,
    uploads: UploadConfig,
    presign_timeout: Duration,
}

impl UploadAuthorizer {
    /// Create a new upload authorizer
    pub fn new(
        object_store: Arc<ObjectStore>,
        uploads: UploadConfig,
        presign_timeout: Duration,
    ) -> Self {
        let limiter = UploadRateLimiter::new(uploads.rate_limit, uploads.rate_window());
        Self {
            object_store,
            limiter,
            uploads,
            presign_timeout,
        }
    }

    /// Authorize one upload for the user
    #[instrument(skip(self, request), fields(user_id = %user_id, filename = %request.filename))]
    pub async fn authorize(
        &self,
        user_id: Uuid,
        request: &UploadRequest,
    ) -> Result<UploadCredential, UploadError> {
        if !self.uploads.enabled {
            return Err(UploadError::Disabled);
        }

        let filename = request.filename.trim();
        if filename.is_empty() {
            return Err(UploadError::EmptyFilename);
        }

        let extension = file_extension(filename)
            .ok_or_else(|| UploadError::UnsupportedExtension(filename.to_string()))?;
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(UploadError::UnsupportedExtension(extension));
        }
        let canonical = canonical_content_type(&extension)
            .ok_or_else(|| UploadError::UnsupportedExtension(extension.clone()))?;

        if request.content_type != canonical {
            return Err(UploadError::MediaTypeMismatch {
                declared: request.content_type.clone(),
                expected: canonical,
            });
        }

        if !ALLOWED_CONTENT_TYPES.contains(&request.content_type.as_str()) {
            return Err(UploadError::UnsupportedContentType(
                request.content_type.clone(),
            ));
        }

        if let Some(hash) = request.file_hash.as_deref() {
            if !is_content_hash(hash) {
                return Err(UploadError::InvalidFileHash);
            }
        }

        let uploads_remaining = match self.limiter.try_acquire(user_id) {
            LimitDecision::Admitted { remaining } => remaining,
            LimitDecision::Rejected { retry_after_secs } => {
                warn!(
                    user_id = %user_id,
                    retry_after_secs = retry_after_secs,
                    "Upload authorization rate limited"
                );
                metrics::counter!("api.uploads.rate_limited").increment(1);
                return Err(UploadError::RateLimited { retry_after_secs });
            }
        };

        let key = self.derive_key(request.file_hash.as_deref(), &extension);
        let max_size_bytes = self.uploads.max_size_bytes();

        let presigned = tokio::time::timeout(
            self.presign_timeout,
            self.object_store.presign_put(
                &key,
                canonical,
                max_size_bytes as i64,
                self.uploads.presign_expiry(),
            ),
        )
        .await
        .map_err(|_| {
            UploadError::Presign(anyhow::anyhow!(
                "presigning timed out after {:?}",
                self.presign_timeout
            ))
        })??;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), canonical.to_string());
        headers.insert("x-amz-acl".to_string(), "public-read".to_string());
        headers.insert("Content-Length".to_string(), max_size_bytes.to_string());

        info!(key = %key, uploads_remaining = uploads_remaining, "Upload authorized");
        metrics::counter!("api.uploads.authorized").increment(1);

        Ok(UploadCredential {
            upload_url: presigned.url,
            method: "PUT".to_string(),
            public_url: self.object_store.public_url(&key),
            key,
            headers,
            expires_in_secs: self.uploads.presign_expiry_secs,
            expires_at: presigned.expires_at,
            max_size_mb: self.uploads.max_size_mb,
            uploads_remaining,
            deduplicated: request.file_hash.is_some(),
        })
    }

    /// Derive the storage key for an upload
    ///
    /// With a content hash the key is content-addressed: the same bytes
    /// map to the same key for every user, and a re-upload overwrites.
    /// Without one the key gets a random token. Hashes arrive here
    /// already validated as lowercase hex.
    fn derive_key(&self, file_hash: Option<&str>, extension: &str) -> String {
        let prefix = self.uploads.key_prefix.trim_end_matches('/');
        match file_hash {
            Some(hash) => {
                let short: String = hash.chars().take(16).collect();
                format!("{}/movie-{}{}", prefix, short, extension)
            }
            None => {
                let token = Uuid::new_v4().simple().to_string();
                format!("{}/movie-{}{}", prefix, &token[..8], extension)
            }
        }
    }
}

/// Extract the lower-cased extension, dot included
///
/// A leading-dot filename like `.png` has no extension, matching how
/// path splitting treats hidden files.
fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

/// Plausible content hash: lowercase hex, MD5 through SHA-256 sized
///
/// The derived storage key embeds the hash verbatim, so anything else
/// is rejected before key derivation.
fn is_content_hash(hash: &str) -> bool {
    (16..=64).contains(&hash.len())
        && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Canonical content type for an allowed extension
fn canonical_content_type(extension: &str) -> Option<&'static str> {
    match extension {
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".png" => Some("image/png"),
        ".webp" => Some("image/webp"),
        ".gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Config;
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::config::{Credentials, Region};
    use aws_sdk_s3::Client as S3Client;

    fn test_store() -> Arc<ObjectStore> {
        let s3_config = S3Config {
            bucket: "movie-rater".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            presign_timeout_secs: 10,
        };
        let credentials =
            Credentials::new("test-access-key", "test-secret-key", None, None, "static");
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(credentials)
            .build();
        Arc::new(ObjectStore::with_client(
            S3Client::from_conf(sdk_config),
            &s3_config,
        ))
    }

    fn test_authorizer(uploads: UploadConfig) -> UploadAuthorizer {
        UploadAuthorizer::new(test_store(), uploads, Duration::from_secs(10))
    }

    fn request(filename: &str, content_type: &str, file_hash: Option<&str>) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            file_hash: file_hash.map(String::from),
        }
    }

    #[tokio::test]
    async fn rejects_empty_filename() {
        let authorizer = test_authorizer(UploadConfig::default());
        let err = authorizer
            .authorize(Uuid::new_v4(), &request("   ", "image/png", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyFilename));
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let authorizer = test_authorizer(UploadConfig::default());
        for filename in ["notes.txt", "movie.mp4", "README", ".png", "archive."] {
            let err = authorizer
                .authorize(Uuid::new_v4(), &request(filename, "image/png", None))
                .await
                .unwrap_err();
            assert!(
                matches!(err, UploadError::UnsupportedExtension(_)),
                "{} should be unsupported, got {:?}",
                filename,
                err
            );
        }
    }

    #[tokio::test]
    async fn rejects_content_type_not_matching_extension() {
        let authorizer = test_authorizer(UploadConfig::default());
        let err = authorizer
            .authorize(Uuid::new_v4(), &request("poster.png", "image/jpeg", None))
            .await
            .unwrap_err();
        match err {
            UploadError::MediaTypeMismatch { declared, expected } => {
                assert_eq!(declared, "image/jpeg");
                assert_eq!(expected, "image/png");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn extension_matching_is_case_insensitive() {
        let authorizer = test_authorizer(UploadConfig::default());
        let credential = authorizer
            .authorize(Uuid::new_v4(), &request("POSTER.JPG", "image/jpeg", None))
            .await
            .unwrap();
        assert!(credential.key.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn hashed_uploads_share_a_key_across_users() {
        let authorizer = test_authorizer(UploadConfig::default());
        let hash = Some("0123456789abcdef0123456789abcdef");

        let first = authorizer
            .authorize(Uuid::new_v4(), &request("a.png", "image/png", hash))
            .await
            .unwrap();
        let second = authorizer
            .authorize(Uuid::new_v4(), &request("b.png", "image/png", hash))
            .await
            .unwrap();

        assert_eq!(first.key, "media/movies/movie-0123456789abcdef.png");
        assert_eq!(first.key, second.key);
        assert_eq!(first.public_url, second.public_url);
        assert!(first.deduplicated);
    }

    #[tokio::test]
    async fn rejects_file_hashes_that_are_not_lowercase_hex() {
        let authorizer = test_authorizer(UploadConfig::default());
        let user = Uuid::new_v4();
        let too_long = "a".repeat(65);
        let hashes = [
            "../../secrets/x",
            "0123456789ABCDEF0123456789ABCDEF",
            "0123456789abcde",
            "0123/456789abcdef",
            too_long.as_str(),
        ];

        for hash in hashes {
            let err = authorizer
                .authorize(user, &request("poster.png", "image/png", Some(hash)))
                .await
                .unwrap_err();
            assert!(
                matches!(err, UploadError::InvalidFileHash),
                "{} should be rejected, got {:?}",
                hash,
                err
            );
        }

        // Rejection happens before the limiter; the full quota is intact.
        let credential = authorizer
            .authorize(user, &request("poster.png", "image/png", None))
            .await
            .unwrap();
        assert_eq!(credential.uploads_remaining, 9);
    }

    #[tokio::test]
    async fn unhashed_uploads_get_unique_random_keys() {
        let authorizer = test_authorizer(UploadConfig::default());

        let first = authorizer
            .authorize(Uuid::new_v4(), &request("a.gif", "image/gif", None))
            .await
            .unwrap();
        let second = authorizer
            .authorize(Uuid::new_v4(), &request("a.gif", "image/gif", None))
            .await
            .unwrap();

        assert!(first.key.starts_with("media/movies/movie-"));
        assert!(first.key.ends_with(".gif"));
        assert_ne!(first.key, second.key);
        assert!(!first.deduplicated);
    }

    #[tokio::test]
    async fn credential_carries_the_upload_contract() {
        let authorizer = test_authorizer(UploadConfig::default());
        let credential = authorizer
            .authorize(Uuid::new_v4(), &request("poster.webp", "image/webp", None))
            .await
            .unwrap();

        assert_eq!(credential.method, "PUT");
        assert_eq!(credential.max_size_mb, 5);
        assert_eq!(credential.expires_in_secs, 3600);
        assert_eq!(credential.uploads_remaining, 9);
        assert!(credential.upload_url.contains(&credential.key));
        assert_eq!(
            credential.public_url,
            format!(
                "https://movie-rater.s3.eu-west-1.amazonaws.com/{}",
                credential.key
            )
        );
        assert_eq!(
            credential.headers.get("Content-Type").map(String::as_str),
            Some("image/webp")
        );
        assert_eq!(
            credential.headers.get("x-amz-acl").map(String::as_str),
            Some("public-read")
        );
        assert_eq!(
            credential.headers.get("Content-Length").map(String::as_str),
            Some("5242880")
        );
    }

    #[tokio::test]
    async fn quota_decrements_until_rate_limited() {
        let uploads = UploadConfig {
            rate_limit: 3,
            ..UploadConfig::default()
        };
        let authorizer = test_authorizer(uploads);
        let user = Uuid::new_v4();

        for expected_remaining in [2, 1, 0] {
            let credential = authorizer
                .authorize(user, &request("poster.png", "image/png", None))
                .await
                .unwrap();
            assert_eq!(credential.uploads_remaining, expected_remaining);
        }

        let err = authorizer
            .authorize(user, &request("poster.png", "image/png", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn rejected_validation_does_not_spend_quota() {
        let uploads = UploadConfig {
            rate_limit: 1,
            ..UploadConfig::default()
        };
        let authorizer = test_authorizer(uploads);
        let user = Uuid::new_v4();

        // Validation failures happen before the limiter is consulted.
        let _ = authorizer
            .authorize(user, &request("notes.txt", "image/png", None))
            .await
            .unwrap_err();

        let credential = authorizer
            .authorize(user, &request("poster.png", "image/png", None))
            .await
            .unwrap();
        assert_eq!(credential.uploads_remaining, 0);
    }

    #[tokio::test]
    async fn disabled_uploads_are_refused() {
        let uploads = UploadConfig {
            enabled: false,
            ..UploadConfig::default()
        };
        let authorizer = test_authorizer(uploads);

        let err = authorizer
            .authorize(Uuid::new_v4(), &request("poster.png", "image/png", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Disabled));
    }

    #[test]
    fn extension_map_covers_the_allowed_set() {
        for extension in ALLOWED_EXTENSIONS {
            let content_type = canonical_content_type(extension).unwrap();
            assert!(ALLOWED_CONTENT_TYPES.contains(&content_type));
        }
        assert!(canonical_content_type(".bmp").is_none());
    }

    #[test]
    fn content_hash_accepts_digest_sized_lowercase_hex_only() {
        assert!(is_content_hash(&"0".repeat(16)));
        assert!(is_content_hash(&"f".repeat(64)));
        assert!(!is_content_hash(&"f".repeat(15)));
        assert!(!is_content_hash(&"f".repeat(65)));
        assert!(!is_content_hash("0123456789ABCDEF"));
        assert!(!is_content_hash("../../0123456789"));
    }

    #[test]
    fn error_mapping_preserves_status_semantics() {
        assert!(matches!(
            ApiError::from(UploadError::Disabled),
            ApiError::UploadsDisabled
        ));
        assert!(matches!(
            ApiError::from(UploadError::EmptyFilename),
            ApiError::Validation(_)
        ));
        assert!(matches!(
            ApiError::from(UploadError::InvalidFileHash),
            ApiError::Validation(_)
        ));
        assert!(matches!(
            ApiError::from(UploadError::UnsupportedExtension(".txt".into())),
            ApiError::UnsupportedMediaType(_)
        ));
        assert!(matches!(
            ApiError::from(UploadError::RateLimited {
                retry_after_secs: 60
            }),
            ApiError::RateLimitExceeded {
                retry_after_secs: 60
            }
        ));
    }
}
