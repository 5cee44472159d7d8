//! Target environment probe, run before anything touches the browser.

use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::harness::types::HarnessResult;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub base_url: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Decides whether the target can be reached at run start
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn check(&self, base_url: &str) -> HarnessResult<EnvironmentReport>;
}

/// Probe over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpProbe {
    pub timeout: Duration,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl EnvironmentProbe for HttpProbe {
    async fn check(&self, base_url: &str) -> HarnessResult<EnvironmentReport> {
        probe_environment(base_url, self.timeout).await
    }
}

/// Fixed answer, for scripted targets that have no HTTP server behind them
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl EnvironmentProbe for StaticProbe {
    async fn check(&self, base_url: &str) -> HarnessResult<EnvironmentReport> {
        Ok(EnvironmentReport {
            base_url: base_url.to_string(),
            reachable: self.0,
            status: None,
            elapsed_ms: 0,
            error: (!self.0).then(|| "marked unreachable".to_string()),
        })
    }
}

/// GET the base URL once. Any HTTP response, including 4xx/5xx, means the
/// target is up; only transport errors make it unreachable.
pub async fn probe_environment(
    base_url: &str,
    timeout: Duration,
) -> HarnessResult<EnvironmentReport> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let start = Instant::now();
    let report = match client.get(base_url).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            info!(base_url, status, "target environment reachable");
            EnvironmentReport {
                base_url: base_url.to_string(),
                reachable: true,
                status: Some(status),
                elapsed_ms: start.elapsed().as_millis() as u64,
                error: None,
            }
        }
        Err(e) => {
            warn!(base_url, error = %e, "target environment unreachable");
            EnvironmentReport {
                base_url: base_url.to_string(),
                reachable: false,
                status: None,
                elapsed_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_any_response_is_reachable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(302).header("location", "/login");
            })
            .await;

        let report = probe_environment(&server.base_url(), Duration::from_secs(2)).await.unwrap();
        assert!(report.reachable);
        assert_eq!(report.status, Some(302));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let report = probe_environment("http://127.0.0.1:1", Duration::from_secs(2)).await.unwrap();
        assert!(!report.reachable);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_static_probe() {
        assert!(StaticProbe(true).check("http://x").await.unwrap().reachable);
        assert!(!StaticProbe(false).check("http://x").await.unwrap().reachable);
    }
}
