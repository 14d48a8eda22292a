//! Google Cloud Storage backend over the JSON API

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use keepframe_common::StoreConfig;
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tokio::process::Command;
use tracing::debug;

use super::{object_url, ObjectStore};
use crate::error::UploadError;

/// gcloud tokens live for an hour; refresh well before that
const TOKEN_REFRESH_AFTER: Duration = Duration::from_secs(45 * 60);

/// Error bodies are truncated to this many characters
const MAX_ERROR_BODY: usize = 200;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on `gcloud auth application-default print-access-token`
const GCLOUD_TIMEOUT: Duration = Duration::from_secs(30);

enum TokenSource {
    /// Emulators accept unauthenticated requests
    Anonymous,
    Static(String),
    /// Application Default Credentials through the gcloud CLI
    Gcloud(Mutex<Option<(String, Instant)>>),
}

/// GCS bucket client
pub struct GcsStore {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    project_id: Option<String>,
    tokens: TokenSource,
}

impl GcsStore {
    pub fn new(config: &StoreConfig) -> Result<Self, UploadError> {
        let bucket = config
            .bucket()
            .ok_or_else(|| UploadError::Disabled("GCS_BUCKET_NAME not set".to_string()))?
            .to_string();

        let endpoint = Url::parse(config.endpoint())
            .map_err(|e| UploadError::Backend(format!("invalid endpoint {}: {}", config.endpoint(), e)))?;

        let tokens = if let Some(token) = &config.access_token {
            TokenSource::Static(token.clone())
        } else if config.uses_emulator() {
            TokenSource::Anonymous
        } else {
            TokenSource::Gcloud(Mutex::new(None))
        };

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.upload_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            bucket,
            project_id: config.project_id.clone(),
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::Backend(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn access_token(&self) -> Result<Option<String>, UploadError> {
        match &self.tokens {
            TokenSource::Anonymous => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Gcloud(cache) => {
                let cached = cache
                    .lock()
                    .as_ref()
                    .filter(|(_, fetched)| fetched.elapsed() < TOKEN_REFRESH_AFTER)
                    .map(|(token, _)| token.clone());
                if cached.is_some() {
                    return Ok(cached);
                }

                let token = gcloud_access_token().await?;
                *cache.lock() = Some((token.clone(), Instant::now()));
                Ok(Some(token))
            }
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, UploadError> {
        let mut request = request;
        if let Some(token) = self.access_token().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(project) = &self.project_id {
            request = request.header("x-goog-user-project", project);
        }
        Ok(request)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn verify(&self) -> Result<(), UploadError> {
        let url = self.url(&["storage", "v1", "b", &self.bucket])?;
        debug!("Verifying bucket access: {}", url);

        let response = self.authorize(self.http.get(url)).await?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(UploadError::BucketNotFound(self.bucket.clone())),
            _ => check_status(response).await,
        }
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), UploadError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        let request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(data);
        let response = self.authorize(request).await?.send().await?;
        check_status(response).await
    }

    async fn make_public(&self, key: &str) -> Result<String, UploadError> {
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o", key, "acl"])?;
        let request = self.http.post(url).json(&serde_json::json!({
            "entity": "allUsers",
            "role": "READER",
        }));
        let response = self.authorize(request).await?.send().await?;
        check_status(response).await?;
        Ok(self.object_url(key))
    }

    fn object_url(&self, key: &str) -> String {
        object_url(self.endpoint.as_str(), &self.bucket, key)
    }
}

async fn check_status(response: Response) -> Result<(), UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(UploadError::Credentials(format!("{}: {}", status, body.trim())));
    }

    Err(UploadError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn gcloud_access_token() -> Result<String, UploadError> {
    let output = Command::new("gcloud")
        .args(["auth", "application-default", "print-access-token"])
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(GCLOUD_TIMEOUT, output)
        .await
        .map_err(|_| {
            UploadError::Credentials(format!(
                "gcloud did not return an access token within {}s",
                GCLOUD_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| {
            UploadError::Credentials(format!(
                "gcloud CLI unavailable ({}). Run: gcloud auth application-default login",
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(UploadError::Credentials(format!(
            "Google ADC not found: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(UploadError::Credentials(
            "gcloud returned an empty access token".to_string(),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> StoreConfig {
        StoreConfig {
            bucket_name: Some("qa-bucket".to_string()),
            endpoint: endpoint.map(String::from),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_urls_encode_object_names() {
        let store = GcsStore::new(&config(None)).unwrap();

        let acl = store
            .url(&["storage", "v1", "b", "qa-bucket", "o", "videos/a b.webm", "acl"])
            .unwrap();
        assert_eq!(
            acl.as_str(),
            "https://storage.googleapis.com/storage/v1/b/qa-bucket/o/videos%2Fa%20b.webm/acl"
        );

        assert_eq!(
            store.object_url("videos/t1.webm"),
            "https://storage.googleapis.com/qa-bucket/videos/t1.webm"
        );
    }

    #[test]
    fn test_emulator_endpoint_is_anonymous() {
        let store = GcsStore::new(&config(Some("http://127.0.0.1:4443"))).unwrap();
        assert!(matches!(store.tokens, TokenSource::Anonymous));
        assert_eq!(
            store.object_url("k"),
            "http://127.0.0.1:4443/qa-bucket/k"
        );
    }

    #[test]
    fn test_static_token_wins() {
        let mut cfg = config(None);
        cfg.access_token = Some("ya29.token".to_string());
        let store = GcsStore::new(&cfg).unwrap();
        assert!(matches!(store.tokens, TokenSource::Static(_)));
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let cfg = StoreConfig::default();
        assert!(GcsStore::new(&cfg).is_err());
    }
}
