//! Retention policy
//!
//! Decides what happens to a finalized capture once the test outcome is
//! known, then carries the decision out.
//!
//! | outcome | capture valid | store   | action                                   |
//! |---------|---------------|---------|------------------------------------------|
//! | passed  | yes           | any     | delete local file, no upload             |
//! | passed  | no            | any     | nothing                                  |
//! | failed  | no            | any     | nothing, warn                            |
//! | failed  | yes           | enabled | upload, link, maybe delete; else inline  |
//! | failed  | yes           | off     | inline the bytes, keep local file        |

use keepframe_common::{ArtifactHandle, RetentionConfig, TestOutcome, UploadResult};
use tracing::{debug, error, info, warn};

use crate::report::{Attachment, ReportSink};
use crate::store::StoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Passing test: the capture has no diagnostic value
    Discard,
    /// Nothing usable to act on
    Skip,
    /// Failed test without a usable capture
    SkipWithWarning,
    Upload,
    InlineFallback,
}

/// Pure decision table
pub fn decide(failed: bool, valid: bool, store_enabled: bool) -> Decision {
    match (failed, valid, store_enabled) {
        (false, true, _) => Decision::Discard,
        (false, false, _) => Decision::Skip,
        (true, false, _) => Decision::SkipWithWarning,
        (true, true, true) => Decision::Upload,
        (true, true, false) => Decision::InlineFallback,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    delete_local_after_upload: bool,
}

impl RetentionPolicy {
    pub fn new(delete_local_after_upload: bool) -> Self {
        Self {
            delete_local_after_upload,
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(config.delete_local_after_upload)
    }

    pub fn delete_local_after_upload(&self) -> bool {
        self.delete_local_after_upload
    }

    /// Apply the policy to one capture. Consumes the handle.
    pub async fn apply(
        &self,
        outcome: &TestOutcome,
        artifact: ArtifactHandle,
        store: &StoreClient,
        report: &dyn ReportSink,
    ) -> UploadResult {
        let valid = is_valid(&artifact).await;
        let decision = decide(outcome.failed, valid, store.is_enabled());
        debug!(
            "Retention for '{}' {}: {:?}",
            outcome.test_id,
            artifact.path.display(),
            decision
        );

        match decision {
            Decision::Discard => discard(&artifact).await,
            Decision::Skip => UploadResult::untouched(),
            Decision::SkipWithWarning => {
                warn!(
                    "No usable {} for failed test '{}' ({}); nothing to preserve",
                    artifact.kind,
                    outcome.test_id,
                    artifact.path.display()
                );
                UploadResult::untouched()
            }
            Decision::Upload => self.upload(outcome, artifact, store, report).await,
            Decision::InlineFallback => embed(outcome, &artifact, report).await,
        }
    }

    async fn upload(
        &self,
        outcome: &TestOutcome,
        artifact: ArtifactHandle,
        store: &StoreClient,
        report: &dyn ReportSink,
    ) -> UploadResult {
        let url = match store
            .upload_named(&artifact.path, &outcome.test_id, artifact.kind)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    "Upload of {} for '{}' failed, embedding instead: {}",
                    artifact.kind, outcome.test_id, e
                );
                return embed(outcome, &artifact, report).await;
            }
        };

        if let Err(e) = report
            .attach(Attachment::link(&outcome.test_id, artifact.kind, url.clone()))
            .await
        {
            error!("Could not attach {} URL for '{}': {}", artifact.kind, outcome.test_id, e);
        } else {
            info!("{} URL attached for '{}': {}", artifact.kind, outcome.test_id, url);
        }

        // Only after the upload returned a URL
        let deleted_local = if self.delete_local_after_upload {
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => {
                    info!("Deleted local {} (uploaded): {}", artifact.kind, artifact.path.display());
                    true
                }
                Err(e) => {
                    warn!("Could not delete local {}: {}", artifact.path.display(), e);
                    false
                }
            }
        } else {
            false
        };

        UploadResult {
            url: Some(url),
            deleted_local,
            embedded: false,
        }
    }
}

async fn is_valid(artifact: &ArtifactHandle) -> bool {
    if artifact.is_empty() {
        return false;
    }
    match tokio::fs::metadata(&artifact.path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

async fn discard(artifact: &ArtifactHandle) -> UploadResult {
    match tokio::fs::remove_file(&artifact.path).await {
        Ok(()) => {
            info!("Deleted {}: {}", artifact.kind, artifact.path.display());
            UploadResult::deleted()
        }
        Err(e) => {
            error!("Failed to delete {}: {}", artifact.path.display(), e);
            UploadResult::untouched()
        }
    }
}

/// Inline fallback. The local file is always left in place.
async fn embed(outcome: &TestOutcome, artifact: &ArtifactHandle, report: &dyn ReportSink) -> UploadResult {
    let data = match tokio::fs::read(&artifact.path).await {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read {} for embedding: {}", artifact.path.display(), e);
            return UploadResult::untouched();
        }
    };
    let size = data.len();

    match report
        .attach(Attachment::inline(&outcome.test_id, artifact.kind, data))
        .await
    {
        Ok(()) => {
            info!(
                "{} embedded in report for '{}': {} ({} bytes)",
                artifact.kind,
                outcome.test_id,
                artifact.path.display(),
                size
            );
            UploadResult {
                url: None,
                deleted_local: false,
                embedded: true,
            }
        }
        Err(e) => {
            error!("Failed to embed {}: {}", artifact.path.display(), e);
            UploadResult::untouched()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AttachmentBody, MemoryReport};
    use crate::store::{DisabledReason, MemoryFailure, MemoryStore};
    use keepframe_common::{ArtifactKind, StoreConfig};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(false, true, true => Decision::Discard; "passed valid enabled")]
    #[test_case(false, true, false => Decision::Discard; "passed valid disabled")]
    #[test_case(false, false, true => Decision::Skip; "passed invalid")]
    #[test_case(true, false, true => Decision::SkipWithWarning; "failed invalid enabled")]
    #[test_case(true, false, false => Decision::SkipWithWarning; "failed invalid disabled")]
    #[test_case(true, true, true => Decision::Upload; "failed valid enabled")]
    #[test_case(true, true, false => Decision::InlineFallback; "failed valid disabled")]
    fn test_decision_table(failed: bool, valid: bool, enabled: bool) -> Decision {
        decide(failed, valid, enabled)
    }

    fn capture(dir: &Path, name: &str, bytes: &[u8]) -> ArtifactHandle {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        ArtifactHandle::new(path, bytes.len() as u64, ArtifactKind::Video)
    }

    async fn enabled_store() -> (Arc<MemoryStore>, StoreClient) {
        let store = Arc::new(MemoryStore::new("qa"));
        let config = StoreConfig {
            bucket_name: Some("qa".to_string()),
            ..StoreConfig::default()
        };
        let client = StoreClient::with_backend(store.clone(), &config).await;
        (store, client)
    }

    #[tokio::test]
    async fn test_passing_test_deletes_without_upload() {
        let tmp = TempDir::new().unwrap();
        let artifact = capture(tmp.path(), "a.webm", &[7u8; 2048]);
        let path = artifact.path.clone();
        let (store, client) = enabled_store().await;
        let report = MemoryReport::new();

        let result = RetentionPolicy::new(false)
            .apply(&TestOutcome::passed("t1"), artifact, &client, &report)
            .await;

        assert_eq!(result, UploadResult::deleted());
        assert!(!path.exists());
        assert_eq!(store.put_calls(), 0);
        assert!(report.attachments().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_success_deletes_when_configured() {
        let tmp = TempDir::new().unwrap();
        let artifact = capture(tmp.path(), "a.webm", b"video");
        let path = artifact.path.clone();
        let (_store, client) = enabled_store().await;
        let report = MemoryReport::new();

        let result = RetentionPolicy::new(true)
            .apply(&TestOutcome::failed("test123", "boom"), artifact, &client, &report)
            .await;

        assert_eq!(
            result.url.as_deref(),
            Some("https://storage.googleapis.com/qa/test-artifacts/videos/test123.webm")
        );
        assert!(result.deleted_local);
        assert!(!result.embedded);
        assert!(!path.exists());

        let attachments = report.for_test("test123");
        assert_eq!(attachments.len(), 1);
        assert!(matches!(attachments[0].body, AttachmentBody::Link(_)));
    }

    #[tokio::test]
    async fn test_failed_upload_success_keeps_file_without_flag() {
        let tmp = TempDir::new().unwrap();
        let artifact = capture(tmp.path(), "a.webm", b"video");
        let path = artifact.path.clone();
        let (_store, client) = enabled_store().await;

        let result = RetentionPolicy::new(false)
            .apply(&TestOutcome::failed("t1", "boom"), artifact, &client, &MemoryReport::new())
            .await;

        assert!(result.url.is_some());
        assert!(!result.deleted_local);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upload_error_falls_back_to_inline() {
        let tmp = TempDir::new().unwrap();
        let artifact = capture(tmp.path(), "a.webm", b"raw video");
        let path = artifact.path.clone();
        let (store, client) = enabled_store().await;
        store.fail_uploads(Some(MemoryFailure::Network));
        let report = MemoryReport::new();

        let result = RetentionPolicy::new(true)
            .apply(&TestOutcome::failed("t1", "boom"), artifact, &client, &report)
            .await;

        assert!(result.url.is_none());
        assert!(result.embedded);
        assert!(!result.deleted_local);
        assert!(path.exists());
        assert_eq!(
            report.attachments()[0].body,
            AttachmentBody::Inline(b"raw video".to_vec())
        );
    }

    #[tokio::test]
    async fn test_disabled_store_embeds_inline() {
        let tmp = TempDir::new().unwrap();
        let artifact = capture(tmp.path(), "a.webm", b"raw");
        let path = artifact.path.clone();
        let client = StoreClient::disabled(DisabledReason::NotConfigured);
        let report = MemoryReport::new();

        let result = RetentionPolicy::new(true)
            .apply(&TestOutcome::failed("t1", "boom"), artifact, &client, &report)
            .await;

        assert!(result.embedded);
        assert!(path.exists());
        assert!(report.attachments()[0].is_inline());
    }

    #[tokio::test]
    async fn test_empty_capture_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let (store, client) = enabled_store().await;
        let report = MemoryReport::new();

        for outcome in [TestOutcome::failed("t1", "boom"), TestOutcome::passed("t2")] {
            let artifact = capture(tmp.path(), "empty.webm", b"");
            let result = RetentionPolicy::new(true)
                .apply(&outcome, artifact, &client, &report)
                .await;
            assert_eq!(result, UploadResult::untouched());
            assert!(tmp.path().join("empty.webm").exists());
        }

        assert_eq!(store.put_calls(), 0);
        assert!(report.attachments().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_capture_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let artifact = ArtifactHandle::new(tmp.path().join("gone.webm"), 10, ArtifactKind::Video);
        let (store, client) = enabled_store().await;

        let result = RetentionPolicy::new(true)
            .apply(&TestOutcome::failed("t1", "boom"), artifact, &client, &MemoryReport::new())
            .await;

        assert_eq!(result, UploadResult::untouched());
        assert_eq!(store.put_calls(), 0);
    }
}
