//! Artifact store client
//!
//! Best-effort upload of local captures to a remote bucket. The client is
//! resolved once per process into either an enabled store or a disabled one
//! carrying the reason; a disabled client never performs I/O.
//!
//! ```text
//! StoreClient::connect(config)
//!     ├── no bucket configured      -> Disabled(NotConfigured)
//!     ├── credentials rejected      -> Disabled(Credentials)
//!     ├── bucket missing            -> Disabled(BucketNotFound)
//!     ├── transport failure         -> Disabled(Unreachable)
//!     └── bucket verified           -> Enabled(EnabledStore)
//! ```

mod gcs;
mod memory;

pub use gcs::GcsStore;
pub use memory::{MemoryFailure, MemoryStore, StoredObject};

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use keepframe_common::{ArtifactKind, StoreConfig};
use tracing::{debug, info, warn};

use crate::error::UploadError;

/// Remote object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this backend writes to
    fn bucket(&self) -> &str;

    /// Confirm the bucket exists and is reachable with current credentials
    async fn verify(&self) -> Result<(), UploadError>;

    /// Store `data` under `key`
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), UploadError>;

    /// Grant public read on `key` and return its public URL
    async fn make_public(&self, key: &str) -> Result<String, UploadError>;

    /// Deterministic URL for `key`, reachable by anyone with bucket access
    fn object_url(&self, key: &str) -> String;
}

/// Why uploads are off for this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    NotConfigured,
    Credentials(String),
    BucketNotFound(String),
    Unreachable(String),
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisabledReason::NotConfigured => write!(f, "GCS_BUCKET_NAME not set"),
            DisabledReason::Credentials(msg) => write!(f, "authentication failed: {}", msg),
            DisabledReason::BucketNotFound(bucket) => write!(f, "bucket '{}' not found", bucket),
            DisabledReason::Unreachable(msg) => write!(f, "store unreachable: {}", msg),
        }
    }
}

/// URLs produced for a failed test's screenshot and video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestArtifactUrls {
    pub screenshot_url: Option<String>,
    pub video_url: Option<String>,
}

/// Process-wide store handle. Immutable once constructed.
pub enum StoreClient {
    Enabled(EnabledStore),
    Disabled(DisabledReason),
}

impl StoreClient {
    /// Build a GCS-backed client and verify the bucket.
    ///
    /// Never fails: every problem resolves to `Disabled`.
    pub async fn connect(config: &StoreConfig) -> Self {
        if !config.enabled() {
            warn!("GCS upload disabled: GCS_BUCKET_NAME not set");
            return StoreClient::Disabled(DisabledReason::NotConfigured);
        }

        match GcsStore::new(config) {
            Ok(backend) => Self::with_backend(Arc::new(backend), config).await,
            Err(e) => {
                warn!("GCS upload disabled: {}", e);
                StoreClient::Disabled(DisabledReason::Unreachable(e.to_string()))
            }
        }
    }

    /// Verify an arbitrary backend and wrap it.
    ///
    /// Verification is bounded by the upload timeout; a backend that does not
    /// answer in time is treated as unreachable.
    pub async fn with_backend(backend: Arc<dyn ObjectStore>, config: &StoreConfig) -> Self {
        let timeout = Duration::from_secs(config.upload_timeout_secs.max(1));
        let verified = match tokio::time::timeout(timeout, backend.verify()).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout {
                seconds: timeout.as_secs(),
            }),
        };

        match verified {
            Ok(()) => {
                info!("GCS upload enabled: bucket={}", backend.bucket());
                if let Some(project) = &config.project_id {
                    info!("  Project: {}", project);
                }
                StoreClient::Enabled(EnabledStore {
                    backend,
                    folder: config.folder.clone(),
                    timeout,
                    make_public: config.make_public,
                })
            }
            Err(e) => {
                let reason = classify(&e, backend.bucket());
                warn!("GCS upload disabled: {}", reason);
                StoreClient::Disabled(reason)
            }
        }
    }

    /// A client that never uploads
    pub fn disabled(reason: DisabledReason) -> Self {
        StoreClient::Disabled(reason)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, StoreClient::Enabled(_))
    }

    pub fn disabled_reason(&self) -> Option<&DisabledReason> {
        match self {
            StoreClient::Enabled(_) => None,
            StoreClient::Disabled(reason) => Some(reason),
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            StoreClient::Enabled(store) => Some(store.backend.bucket()),
            StoreClient::Disabled(_) => None,
        }
    }

    /// Upload `local_path` under `{folder}/{blob_name}`
    pub async fn upload(
        &self,
        local_path: &Path,
        blob_name: Option<&str>,
        folder: &str,
        make_public: bool,
    ) -> Result<String, UploadError> {
        match self {
            StoreClient::Enabled(store) => {
                store.upload(local_path, blob_name, folder, make_public).await
            }
            StoreClient::Disabled(reason) => Err(UploadError::Disabled(reason.to_string())),
        }
    }

    /// Upload a capture as `{kind folder}/{test_id}.{ext}` under the configured folder
    pub async fn upload_named(
        &self,
        local_path: &Path,
        test_id: &str,
        kind: ArtifactKind,
    ) -> Result<String, UploadError> {
        match self {
            StoreClient::Enabled(store) => {
                let blob = format!("{}/{}.{}", kind.remote_folder(), test_id, kind.extension());
                store
                    .upload(local_path, Some(&blob), &store.folder, store.make_public)
                    .await
            }
            StoreClient::Disabled(reason) => Err(UploadError::Disabled(reason.to_string())),
        }
    }

    /// Upload whichever of a failed test's screenshot and video exist
    pub async fn upload_test_artifacts(
        &self,
        test_id: &str,
        screenshot: Option<&Path>,
        video: Option<&Path>,
    ) -> TestArtifactUrls {
        let mut urls = TestArtifactUrls::default();

        if let Some(path) = screenshot {
            urls.screenshot_url = self
                .upload_named(path, test_id, ArtifactKind::Screenshot)
                .await
                .ok();
        }
        if let Some(path) = video {
            urls.video_url = self
                .upload_named(path, test_id, ArtifactKind::Video)
                .await
                .ok();
        }

        urls
    }

    /// Cloud Console link for a prefix inside the bucket
    pub fn console_url(&self, prefix: &str) -> Option<String> {
        self.bucket().map(|bucket| {
            let prefix = prefix.trim_matches('/');
            if prefix.is_empty() {
                format!("https://console.cloud.google.com/storage/browser/{}", bucket)
            } else {
                format!("https://console.cloud.google.com/storage/browser/{}/{}", bucket, prefix)
            }
        })
    }
}

/// A verified backend plus per-run upload settings
pub struct EnabledStore {
    backend: Arc<dyn ObjectStore>,
    folder: String,
    timeout: Duration,
    make_public: bool,
}

impl EnabledStore {
    pub fn folder(&self) -> &str {
        &self.folder
    }

    async fn upload(
        &self,
        local_path: &Path,
        blob_name: Option<&str>,
        folder: &str,
        make_public: bool,
    ) -> Result<String, UploadError> {
        let result = self.try_upload(local_path, blob_name, folder, make_public).await;
        if let Err(e) = &result {
            warn!("Failed to upload {}: {}", local_path.display(), e);
        }
        result
    }

    async fn try_upload(
        &self,
        local_path: &Path,
        blob_name: Option<&str>,
        folder: &str,
        make_public: bool,
    ) -> Result<String, UploadError> {
        match tokio::fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(UploadError::MissingFile(local_path.to_path_buf())),
        }

        let name = match blob_name {
            Some(name) => name.to_string(),
            None => timestamped_name(local_path),
        };
        let key = object_key(folder, &name);
        let content_type = content_type_for(local_path);

        let data = tokio::fs::read(local_path).await?;
        debug!("Uploading {} ({} bytes) as {}", local_path.display(), data.len(), key);
        let send = self.send(&key, Bytes::from(data), content_type, make_public);

        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Put the object and optionally publish it. Bounded as a whole by the caller.
    async fn send(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        make_public: bool,
    ) -> Result<String, UploadError> {
        self.backend.put_object(key, data, content_type).await?;

        if make_public {
            match self.backend.make_public(key).await {
                Ok(url) => {
                    info!("Uploaded to GCS (public): {}", url);
                    return Ok(url);
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => {
                    // Uniform bucket-level access rejects object ACLs
                    debug!("Could not make {} public: {}", key, e);
                }
            }
        }

        let url = self.backend.object_url(key);
        info!("Uploaded to GCS: gs://{}/{}", self.backend.bucket(), key);
        Ok(url)
    }
}

fn classify(error: &UploadError, bucket: &str) -> DisabledReason {
    match error {
        e if e.is_credentials() => DisabledReason::Credentials(e.to_string()),
        UploadError::BucketNotFound(_) => DisabledReason::BucketNotFound(bucket.to_string()),
        e => DisabledReason::Unreachable(e.to_string()),
    }
}

/// `{folder}/{name}`, or just `name` when folder is empty
pub fn object_key(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    let name = name.trim_start_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// `{YYYYmmdd_HHMMSS}_{file name}` using local time
pub fn timestamped_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    format!("{}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"), file_name)
}

/// `{base}/{bucket}/{key}`
pub fn object_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" | "log" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepframe_common::config::DEFAULT_GCS_ENDPOINT;
    use tempfile::TempDir;

    fn config(bucket: &str) -> StoreConfig {
        StoreConfig {
            bucket_name: Some(bucket.to_string()),
            ..StoreConfig::default()
        }
    }

    async fn enabled(store: &Arc<MemoryStore>) -> StoreClient {
        StoreClient::with_backend(store.clone(), &config(store.bucket())).await
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("test-artifacts", "videos/t1.webm"), "test-artifacts/videos/t1.webm");
        assert_eq!(object_key("", "report/index.html"), "report/index.html");
        assert_eq!(object_key("/test/", "/connection.txt"), "test/connection.txt");
    }

    #[test]
    fn test_timestamped_name_keeps_file_name() {
        let name = timestamped_name(Path::new("/tmp/videos/abc.webm"));
        assert!(name.ends_with("_abc.webm"));
        // YYYYmmdd_HHMMSS
        assert_eq!(name.len(), "20240101_000000_abc.webm".len());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.webm")), "video/webm");
        assert_eq!(content_type_for(Path::new("index.HTML")), "text/html");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_connect_without_bucket_is_disabled() {
        let client = StoreClient::connect(&StoreConfig::default()).await;
        assert_eq!(client.disabled_reason(), Some(&DisabledReason::NotConfigured));
        assert!(client.console_url("videos").is_none());
    }

    #[tokio::test]
    async fn test_disabled_store_never_touches_backend() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.webm");
        std::fs::write(&path, b"data").unwrap();

        let client = StoreClient::disabled(DisabledReason::NotConfigured);
        for _ in 0..3 {
            let err = client.upload(&path, None, "x", false).await.unwrap_err();
            assert!(matches!(err, UploadError::Disabled(_)));
        }
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_verify_failures_disable() {
        let store = Arc::new(MemoryStore::new("qa"));
        store.fail_verify(Some(MemoryFailure::Unauthorized));
        let client = enabled(&store).await;
        assert!(matches!(client.disabled_reason(), Some(DisabledReason::Credentials(_))));

        let store = Arc::new(MemoryStore::new("qa"));
        store.fail_verify(Some(MemoryFailure::MissingBucket));
        let client = enabled(&store).await;
        assert_eq!(
            client.disabled_reason(),
            Some(&DisabledReason::BucketNotFound("qa".to_string()))
        );

        let store = Arc::new(MemoryStore::new("qa"));
        store.fail_verify(Some(MemoryFailure::Network));
        let client = enabled(&store).await;
        assert!(matches!(client.disabled_reason(), Some(DisabledReason::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_upload_named_builds_key_and_url() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rec-1.webm");
        std::fs::write(&path, b"video bytes").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;
        let url = client
            .upload_named(&path, "test123", ArtifactKind::Video)
            .await
            .unwrap();

        assert_eq!(
            url,
            format!("{}/qa/test-artifacts/videos/test123.webm", DEFAULT_GCS_ENDPOINT)
        );
        let object = store.object("test-artifacts/videos/test123.webm").unwrap();
        assert_eq!(object.data.as_ref(), b"video bytes");
        assert_eq!(object.content_type, "video/webm");
        assert!(!object.public);
    }

    #[tokio::test]
    async fn test_upload_without_blob_name_is_timestamped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("connection.txt");
        std::fs::write(&path, b"ping").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;
        client.upload(&path, None, "adhoc", false).await.unwrap();

        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("adhoc/"));
        assert!(keys[0].ends_with("_connection.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_not_a_panic() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;

        let err = client
            .upload(&tmp.path().join("gone.webm"), None, "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingFile(_)));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_make_public_falls_back_to_object_url() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shot.png");
        std::fs::write(&path, b"png").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;

        let public = client.upload(&path, Some("a.png"), "p", true).await.unwrap();
        assert!(store.object("p/a.png").unwrap().public);
        assert!(public.ends_with("/qa/p/a.png"));

        store.deny_public(true);
        let url = client.upload(&path, Some("b.png"), "p", true).await.unwrap();
        assert!(!store.object("p/b.png").unwrap().public);
        assert!(url.ends_with("/qa/p/b.png"));
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_disable_client() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.webm");
        std::fs::write(&path, b"v").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;

        store.fail_uploads(Some(MemoryFailure::Network));
        assert!(client.upload_named(&path, "t1", ArtifactKind::Video).await.is_err());

        store.fail_uploads(None);
        assert!(client.upload_named(&path, "t2", ArtifactKind::Video).await.is_ok());
        assert!(client.is_enabled());
    }

    #[tokio::test]
    async fn test_slow_upload_times_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.webm");
        std::fs::write(&path, b"v").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        store.delay_uploads(Duration::from_secs(5));
        let mut cfg = config("qa");
        cfg.upload_timeout_secs = 1;
        let client = StoreClient::with_backend(store.clone(), &cfg).await;

        let err = client.upload(&path, None, "x", false).await.unwrap_err();
        assert!(matches!(err, UploadError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn test_verify_is_attempted_once_and_bounded() {
        let store = Arc::new(MemoryStore::new("qa"));
        store.delay_verify(Duration::from_secs(3600));
        let mut cfg = config("qa");
        cfg.upload_timeout_secs = 1;

        let client = tokio::time::timeout(
            Duration::from_secs(10),
            StoreClient::with_backend(store.clone(), &cfg),
        )
        .await
        .expect("verify should give up after the upload timeout");

        assert!(matches!(client.disabled_reason(), Some(DisabledReason::Unreachable(_))));
        assert_eq!(store.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_enabled_store_keeps_configured_folder() {
        let store = Arc::new(MemoryStore::new("qa"));
        let mut cfg = config("qa");
        cfg.folder = "nightly".to_string();
        let client = StoreClient::with_backend(store.clone(), &cfg).await;

        match &client {
            StoreClient::Enabled(enabled) => assert_eq!(enabled.folder(), "nightly"),
            StoreClient::Disabled(reason) => panic!("unexpectedly disabled: {}", reason),
        }
        assert_eq!(store.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_upload_test_artifacts_pair() {
        let tmp = TempDir::new().unwrap();
        let shot = tmp.path().join("s.png");
        std::fs::write(&shot, b"png").unwrap();

        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;
        let urls = client
            .upload_test_artifacts("login", Some(&shot), Some(&tmp.path().join("none.webm")))
            .await;

        assert!(urls.screenshot_url.unwrap().ends_with("screenshots/login.png"));
        assert!(urls.video_url.is_none());
    }

    #[tokio::test]
    async fn test_console_url() {
        let store = Arc::new(MemoryStore::new("qa"));
        let client = enabled(&store).await;
        assert_eq!(
            client.console_url("/allure-reports/1/").unwrap(),
            "https://console.cloud.google.com/storage/browser/qa/allure-reports/1"
        );
    }
}
