//! Keepframe test artifact lifecycle
//!
//! This crate keeps the videos and screenshots of failing E2E tests and
//! throws away everything else:
//! - Records each test into shared capture directories without clobbering
//!   concurrent tests
//! - Decides per capture whether to delete, upload or embed it
//! - Uploads preserved captures to a GCS bucket, degrading to inline report
//!   attachments when the bucket is unavailable
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TestLifecycle::run_scoped                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RecordingSession                                           │
//! │    ├── open(test_id, recorder, roots) -> baseline snapshot  │
//! │    └── close() -> [ArtifactHandle] (new, non-empty files)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RetentionPolicy::apply(outcome, artifact)                  │
//! │    ├── passed            -> delete local                    │
//! │    ├── failed + enabled  -> upload, attach link             │
//! │    └── failed + disabled -> attach inline, keep local       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StoreClient (Enabled | Disabled(reason))                   │
//! │    └── ObjectStore: GcsStore | MemoryStore                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReportSink: AllureResults | MemoryReport                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod lifecycle;
pub mod recording;
pub mod report;
pub mod retention;
pub mod store;

pub use error::{RecordingError, ReportError, UploadError};
pub use lifecycle::{ScopeContext, ScopedRun, TestLifecycle};
pub use recording::{CaptureRoot, ExternalRecorder, Recorder, RecordingSession, SessionState};
pub use report::{AllureResults, Attachment, AttachmentBody, MemoryReport, ReportSink};
pub use retention::{decide, Decision, RetentionPolicy};
pub use store::{DisabledReason, GcsStore, MemoryFailure, MemoryStore, ObjectStore, StoreClient};
