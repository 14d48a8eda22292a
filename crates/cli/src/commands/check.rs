//! Connection check

use colored::Colorize;
use keepframe_common::KeepframeConfig;
use keepframe_e2e::{DisabledReason, StoreClient};
use serde::Serialize;

use crate::output::{self, OutputFormat, TableDisplay};

const PROBE_FOLDER: &str = "test";
const PROBE_NAME: &str = "test-connection.txt";

#[derive(Debug, Serialize)]
struct CheckReport {
    bucket: Option<String>,
    project: Option<String>,
    endpoint: String,
    enabled: bool,
    reason: Option<String>,
    probe_url: Option<String>,
}

impl TableDisplay for CheckReport {
    fn headers() -> Vec<&'static str> {
        vec!["Bucket", "Project", "Endpoint", "Status", "Probe URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.bucket.clone().unwrap_or_else(|| "-".to_string()),
            self.project.clone().unwrap_or_else(|| "-".to_string()),
            self.endpoint.clone(),
            match &self.reason {
                None => "enabled".to_string(),
                Some(reason) => format!("disabled: {}", reason),
            },
            self.probe_url.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub async fn execute(cfg: &KeepframeConfig, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Table {
        println!();
        println!("{}", "━".repeat(60).dimmed());
        println!("{}", " GCS Connection Check".bold());
        println!("{}", "━".repeat(60).dimmed());
        println!();
    }

    let client = StoreClient::connect(&cfg.store).await;
    let mut report = CheckReport {
        bucket: cfg.store.bucket().map(String::from),
        project: cfg.store.project_id.clone(),
        endpoint: cfg.store.endpoint().to_string(),
        enabled: client.is_enabled(),
        reason: client.disabled_reason().map(|r| r.to_string()),
        probe_url: None,
    };

    if let Some(reason) = client.disabled_reason() {
        output::print_item(&report, format);
        if format != OutputFormat::Json {
            output::print_error(&format!("Uploads are disabled: {}", reason));
            match reason {
                DisabledReason::NotConfigured => {
                    output::print_info("Set GCS_BUCKET_NAME, e.g. export GCS_BUCKET_NAME=my-test-artifacts")
                }
                DisabledReason::Credentials(_) => {
                    output::print_info("Run: gcloud auth application-default login")
                }
                DisabledReason::BucketNotFound(bucket) => {
                    output::print_info(&format!("Create it with: gsutil mb gs://{}", bucket))
                }
                DisabledReason::Unreachable(_) => {}
            }
        }
        std::process::exit(1);
    }

    let probe = tempfile::Builder::new()
        .prefix("keepframe-probe-")
        .suffix(".txt")
        .tempfile()?;
    std::fs::write(
        probe.path(),
        format!("Keepframe connection test {}\n", chrono::Utc::now().to_rfc3339()),
    )?;

    let uploaded = client
        .upload(probe.path(), Some(PROBE_NAME), PROBE_FOLDER, false)
        .await;
    // Local probe is gone either way
    probe.close()?;

    match uploaded {
        Ok(url) => {
            report.probe_url = Some(url);
            output::print_item(&report, format);
            if format != OutputFormat::Json {
                output::print_success("Test upload succeeded");
                if let Some(bucket) = client.bucket() {
                    output::print_info(&format!(
                        "Remove the probe with: gsutil rm gs://{}/{}/{}",
                        bucket, PROBE_FOLDER, PROBE_NAME
                    ));
                }
            }
            Ok(())
        }
        Err(e) => {
            output::print_item(&report, format);
            output::print_error(&format!("Test upload failed: {}", e));
            std::process::exit(1);
        }
    }
}
