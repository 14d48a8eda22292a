//! Report attachments
//!
//! A preserved artifact ends up in the test report either as a link to the
//! uploaded object or, when the store is unavailable, as the raw capture.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keepframe_common::{ArtifactKind, TestOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ReportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentBody {
    /// URL of the uploaded object
    Link(String),
    /// Inline fallback: the capture itself
    Inline(Vec<u8>),
}

/// One artifact attached to one test's report entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub test_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub body: AttachmentBody,
}

impl Attachment {
    pub fn link(test_id: &str, kind: ArtifactKind, url: impl Into<String>) -> Self {
        Self {
            test_id: test_id.to_string(),
            kind,
            name: format!("{} (GCS)", title(kind)),
            body: AttachmentBody::Link(url.into()),
        }
    }

    pub fn inline(test_id: &str, kind: ArtifactKind, data: Vec<u8>) -> Self {
        Self {
            test_id: test_id.to_string(),
            kind,
            name: format!("{}_{}", test_id, kind),
            body: AttachmentBody::Inline(data),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.body {
            AttachmentBody::Link(_) => "text/uri-list",
            AttachmentBody::Inline(_) => self.kind.mime_type(),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.body {
            AttachmentBody::Link(_) => "uri",
            AttachmentBody::Inline(_) => self.kind.extension(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.body, AttachmentBody::Inline(_))
    }
}

fn title(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Video => "Video",
        ArtifactKind::Screenshot => "Screenshot",
    }
}

/// Destination for report attachments
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn attach(&self, attachment: Attachment) -> Result<(), ReportError>;

    /// Called once per test after all of its attachments, with wall-clock
    /// bounds in Unix milliseconds
    async fn finish(&self, _outcome: &TestOutcome, _start_ms: i64, _stop_ms: i64) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Collects attachments and finished outcomes in memory
#[derive(Default)]
pub struct MemoryReport {
    attachments: Mutex<Vec<Attachment>>,
    finished: Mutex<Vec<TestOutcome>>,
}

impl MemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.lock().clone()
    }

    pub fn for_test(&self, test_id: &str) -> Vec<Attachment> {
        self.attachments
            .lock()
            .iter()
            .filter(|a| a.test_id == test_id)
            .cloned()
            .collect()
    }

    /// Outcomes in the order tests finished
    pub fn finished(&self) -> Vec<TestOutcome> {
        self.finished.lock().clone()
    }
}

#[async_trait]
impl ReportSink for MemoryReport {
    async fn attach(&self, attachment: Attachment) -> Result<(), ReportError> {
        self.attachments.lock().push(attachment);
        Ok(())
    }

    async fn finish(&self, outcome: &TestOutcome, _start_ms: i64, _stop_ms: i64) -> Result<(), ReportError> {
        self.finished.lock().push(outcome.clone());
        Ok(())
    }
}

/// Attachment reference inside an Allure result file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllureAttachment {
    pub name: String,
    pub source: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllureStatusDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Allure 2 test result (`*-result.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllureResult {
    pub uuid: String,
    pub history_id: String,
    pub name: String,
    pub full_name: String,
    pub status: String,
    pub stage: String,
    pub status_details: AllureStatusDetails,
    pub start: i64,
    pub stop: i64,
    pub attachments: Vec<AllureAttachment>,
}

/// Writes attachments and results into an Allure results directory
pub struct AllureResults {
    dir: PathBuf,
    pending: Mutex<HashMap<String, Vec<AllureAttachment>>>,
}

impl AllureResults {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the result file for a finished test, including every
    /// attachment recorded for it so far.
    ///
    /// [`TestLifecycle`](crate::TestLifecycle) calls this through
    /// [`ReportSink::finish`]; call it directly only when driving
    /// [`RetentionPolicy`](crate::RetentionPolicy) by hand.
    pub async fn write_result(
        &self,
        outcome: &TestOutcome,
        start_ms: i64,
        stop_ms: i64,
    ) -> Result<PathBuf, ReportError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let attachments = self
            .pending
            .lock()
            .remove(&outcome.test_id)
            .unwrap_or_default();

        let uuid = Uuid::new_v4().to_string();
        let result = AllureResult {
            uuid: uuid.clone(),
            history_id: outcome.test_id.clone(),
            name: outcome.test_id.clone(),
            full_name: outcome.test_id.clone(),
            status: if outcome.failed { "failed" } else { "passed" }.to_string(),
            stage: "finished".to_string(),
            status_details: AllureStatusDetails {
                message: outcome.message.clone(),
            },
            start: start_ms,
            stop: stop_ms,
            attachments,
        };

        let path = self.dir.join(format!("{}-result.json", uuid));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&result)?).await?;
        debug!("Wrote Allure result {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl ReportSink for AllureResults {
    async fn attach(&self, attachment: Attachment) -> Result<(), ReportError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let source = format!("{}-attachment.{}", Uuid::new_v4(), attachment.extension());
        let path = self.dir.join(&source);
        match &attachment.body {
            AttachmentBody::Link(url) => tokio::fs::write(&path, format!("{}\n", url)).await?,
            AttachmentBody::Inline(data) => tokio::fs::write(&path, data).await?,
        }
        debug!("Attached '{}' for '{}' as {}", attachment.name, attachment.test_id, source);

        self.pending
            .lock()
            .entry(attachment.test_id.clone())
            .or_default()
            .push(AllureAttachment {
                name: attachment.name.clone(),
                source,
                mime_type: attachment.mime_type().to_string(),
            });
        Ok(())
    }

    async fn finish(&self, outcome: &TestOutcome, start_ms: i64, stop_ms: i64) -> Result<(), ReportError> {
        self.write_result(outcome, start_ms, stop_ms).await.map(|_| ())
    }
}
