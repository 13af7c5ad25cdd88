//! Callback payloads delivered by asynchronous engines.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reported outcome of external work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Succeeded,
    Failed,
}

/// Completion notice for an externally-running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallbackPayload {
    /// Id the engine returned on submission
    pub external_job_id: String,
    pub status: CallbackStatus,
    /// Produced output, required when `status == succeeded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    /// Engine-reported error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any additional engine data, stored verbatim on the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CallbackPayload {
    /// Parse and sanity-check a raw callback body.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let payload: CallbackPayload =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid callback JSON: {e}"))?;

        if payload.external_job_id.trim().is_empty() {
            return Err("callback is missing external_job_id".to_string());
        }
        if payload.status == CallbackStatus::Succeeded
            && payload.output_ref.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            return Err("successful callback is missing output_ref".to_string());
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_payload() {
        let body = br#"{"external_job_id":"ext-1","status":"succeeded","output_ref":"s3://out.mp4"}"#;
        let payload = CallbackPayload::parse(body).unwrap();
        assert_eq!(payload.external_job_id, "ext-1");
        assert_eq!(payload.output_ref.as_deref(), Some("s3://out.mp4"));
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(CallbackPayload::parse(b"not json").is_err());
        assert!(CallbackPayload::parse(br#"{"external_job_id":"","status":"failed"}"#).is_err());
        assert!(CallbackPayload::parse(br#"{"external_job_id":"x","status":"succeeded"}"#).is_err());
    }

    #[test]
    fn test_parse_failure_payload_without_output() {
        let body = br#"{"external_job_id":"ext-2","status":"failed","error":"nsfw filter"}"#;
        let payload = CallbackPayload::parse(body).unwrap();
        assert_eq!(payload.status, CallbackStatus::Failed);
        assert_eq!(payload.error.as_deref(), Some("nsfw filter"));
    }
}
