//! HTTP engine adapter.
//!
//! Engines reached over HTTP expose two endpoints:
//! - `POST {endpoint}/invoke` taking an [`EngineRequest`] and returning
//!   either `{"output_ref": ..}` or `{"external_job_id": ..}`
//! - `GET {endpoint}/jobs/{external_job_id}` returning
//!   `{"status": "pending"|"running"|"succeeded"|"failed", ..}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::engine::{EngineAdapter, EngineError, EngineOutcome, EngineRequest, PollStatus};
use crate::error::{RegistryResult, RouterError};

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    output_ref: Option<String>,
    #[serde(default)]
    external_job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    output_ref: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Adapter for an engine served over HTTP.
pub struct HttpEngineAdapter {
    engine_id: String,
    base_url: Url,
    http: Client,
    timeout: Duration,
}

impl HttpEngineAdapter {
    /// Create an adapter. `timeout` bounds each request.
    pub fn new(engine_id: &str, endpoint: &str, timeout: Duration) -> RegistryResult<Self> {
        let mut base_url = Url::parse(endpoint)
            .map_err(|e| RouterError::invalid_engine(engine_id, format!("bad endpoint {endpoint}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            engine_id: engine_id.to_string(),
            base_url,
            http,
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, EngineError> {
        self.base_url
            .join(path)
            .map_err(|e| EngineError::transport(format!("bad url {path}: {e}")))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(EngineError::unavailable(body));
        }
        Err(EngineError::Http {
            status: status.as_u16(),
            body,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.timeout)
        } else if err.is_decode() {
            EngineError::malformed(err.to_string())
        } else {
            EngineError::transport(err.to_string())
        }
    }
}


#[async_trait]
impl EngineAdapter for HttpEngineAdapter {
    async fn invoke(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
        let url = self.url("invoke")?;
        debug!(engine_id = %self.engine_id, job_id = %request.job_id, %url, "Invoking engine");

        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        let response = Self::check_status(response).await?;
        let body: InvokeResponse = response.json().await.map_err(|e| self.map_transport(e))?;

        match (body.output_ref, body.external_job_id) {
            (Some(output_ref), _) if !output_ref.is_empty() => Ok(EngineOutcome::Completed { output_ref }),
            (_, Some(external_job_id)) if !external_job_id.is_empty() => {
                Ok(EngineOutcome::Accepted { external_job_id })
            }
            _ => Err(EngineError::malformed(
                "response has neither output_ref nor external_job_id",
            )),
        }
    }

    async fn poll(&self, external_job_id: &str) -> Result<PollStatus, EngineError> {
        let url = self.url(&format!("jobs/{external_job_id}"))?;

        let response = self.http.get(url).send().await.map_err(|e| self.map_transport(e))?;
        let response = Self::check_status(response).await?;
        let body: PollResponse = response.json().await.map_err(|e| self.map_transport(e))?;

        match body.status.as_str() {
            "pending" | "queued" | "running" => Ok(PollStatus::Pending),
            "succeeded" | "completed" => body
                .output_ref
                .filter(|o| !o.is_empty())
                .map(|output_ref| PollStatus::Completed { output_ref })
                .ok_or_else(|| EngineError::malformed("completed job without output_ref")),
            "failed" => Ok(PollStatus::Failed {
                error: body.error.unwrap_or_else(|| "engine reported failure".to_string()),
            }),
            other => Err(EngineError::malformed(format!("unknown status {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::{ExecutionPlan, JobId, TimelineSegment};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> EngineRequest {
        EngineRequest {
            job_id: JobId::from_string("job-1"),
            plan: ExecutionPlan::new("p", vec![TimelineSegment::new("s1", "a", 0.0, 3.0)]),
            blueprint: serde_json::Value::Null,
            analysis: serde_json::Value::Null,
            callback_url: None,
        }
    }

    async fn adapter(server: &MockServer) -> HttpEngineAdapter {
        HttpEngineAdapter::new("e", &server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_invoke_completed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"output_ref": "s3://out.mp4"})))
            .mount(&server)
            .await;

        let outcome = adapter(&server).await.invoke(&request()).await.unwrap();
        assert_eq!(
            outcome,
            EngineOutcome::Completed {
                output_ref: "s3://out.mp4".into()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"external_job_id": "ext-9"})))
            .mount(&server)
            .await;

        let outcome = adapter(&server).await.invoke(&request()).await.unwrap();
        assert_eq!(
            outcome,
            EngineOutcome::Accepted {
                external_job_id: "ext-9".into()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_maps_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = adapter(&server).await.invoke(&request()).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::Http {
                status: 500,
                body: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_rejects_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = adapter(&server).await.invoke(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn test_request_timeout_reports_configured_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"output_ref": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let adapter = HttpEngineAdapter::new("e", &server.uri(), Duration::from_millis(100)).unwrap();
        let err = adapter.invoke(&request()).await.unwrap_err();
        assert_eq!(err, EngineError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_poll_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/ext-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/ext-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "succeeded", "output_ref": "s3://x"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/ext-3"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "failed", "error": "quota"})),
            )
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(adapter.poll("ext-1").await.unwrap(), PollStatus::Pending);
        assert_eq!(
            adapter.poll("ext-2").await.unwrap(),
            PollStatus::Completed {
                output_ref: "s3://x".into()
            }
        );
        assert_eq!(
            adapter.poll("ext-3").await.unwrap(),
            PollStatus::Failed { error: "quota".into() }
        );
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(HttpEngineAdapter::new("e", "not a url", Duration::from_secs(1)).is_err());
    }
}
