//! In-process object store for tests and dry runs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use keepframe_common::config::DEFAULT_GCS_ENDPOINT;
use parking_lot::Mutex;

use super::{object_url, ObjectStore};
use crate::error::UploadError;

/// Failure to inject into verify or upload calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFailure {
    Unauthorized,
    MissingBucket,
    Network,
}

impl MemoryFailure {
    fn to_error(self, bucket: &str) -> UploadError {
        match self {
            MemoryFailure::Unauthorized => UploadError::Status {
                status: 401,
                body: "Anonymous caller does not have storage.buckets.get access".to_string(),
            },
            MemoryFailure::MissingBucket => UploadError::BucketNotFound(bucket.to_string()),
            MemoryFailure::Network => UploadError::Backend("connection reset by peer".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub public: bool,
}

/// Object store held in memory, with switchable failures
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    verify_failure: Mutex<Option<MemoryFailure>>,
    upload_failure: Mutex<Option<MemoryFailure>>,
    upload_delay: Mutex<Option<Duration>>,
    verify_delay: Mutex<Option<Duration>>,
    deny_public: Mutex<bool>,
    verify_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            verify_failure: Mutex::new(None),
            upload_failure: Mutex::new(None),
            upload_delay: Mutex::new(None),
            verify_delay: Mutex::new(None),
            deny_public: Mutex::new(false),
            verify_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_verify(&self, failure: Option<MemoryFailure>) {
        *self.verify_failure.lock() = failure;
    }

    pub fn fail_uploads(&self, failure: Option<MemoryFailure>) {
        *self.upload_failure.lock() = failure;
    }

    pub fn delay_uploads(&self, delay: Duration) {
        *self.upload_delay.lock() = Some(delay);
    }

    pub fn delay_verify(&self, delay: Duration) {
        *self.verify_delay.lock() = Some(delay);
    }

    /// Reject object ACL changes, like a bucket with uniform access
    pub fn deny_public(&self, deny: bool) {
        *self.deny_public.lock() = deny;
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Upload attempts, including failed ones
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn verify(&self) -> Result<(), UploadError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.verify_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match *self.verify_failure.lock() {
            Some(failure) => Err(failure.to_error(&self.bucket)),
            None => Ok(()),
        }
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), UploadError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.upload_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.upload_failure.lock();
        if let Some(failure) = failure {
            return Err(failure.to_error(&self.bucket));
        }

        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                public: false,
            },
        );
        Ok(())
    }

    async fn make_public(&self, key: &str) -> Result<String, UploadError> {
        if *self.deny_public.lock() {
            return Err(UploadError::Status {
                status: 400,
                body: "Cannot update access control for an object when uniform bucket-level access is enabled".to_string(),
            });
        }

        let mut objects = self.objects.lock();
        match objects.get_mut(key) {
            Some(object) => {
                object.public = true;
                Ok(self.object_url(key))
            }
            None => Err(UploadError::Status {
                status: 404,
                body: format!("No such object: {}/{}", self.bucket, key),
            }),
        }
    }

    fn object_url(&self, key: &str) -> String {
        object_url(DEFAULT_GCS_ENDPOINT, &self.bucket, key)
    }
}
