use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;

use crate::engine::{
    DownloadedAsset, EngineError, EngineJobPayload, EngineState, EngineSubmission,
    GenerationEngine,
};
use crate::error::ExternalErrorKind;

/// JSON-over-HTTP engine client.
///
/// `POST {base}/jobs` submits and returns `{ "id": ... }`;
/// `GET {base}/jobs/{id}` returns an [`EngineJobPayload`].
#[derive(Clone)]
pub struct HttpGenerationEngine {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

impl HttpGenerationEngine {
    pub fn new(base_url: &str, api_token: Option<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn ensure_success(resp: Response) -> Result<Response, EngineError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(EngineError::from_status(status.as_u16(), &body))
    }
}

fn transport_error(err: reqwest::Error) -> EngineError {
    let kind = if err.is_timeout() {
        ExternalErrorKind::Timeout
    } else if err.is_decode() {
        ExternalErrorKind::MalformedResponse
    } else {
        // connect / request errors
        ExternalErrorKind::Unavailable
    };
    EngineError::new(kind, err.to_string())
}

#[async_trait]
impl GenerationEngine for HttpGenerationEngine {
    async fn submit(&self, submission: &EngineSubmission) -> Result<String, EngineError> {
        let url = format!("{}/jobs", self.base_url);
        let resp = self
            .authorize(self.client.post(url))
            .json(submission)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = Self::ensure_success(resp).await?;

        let body: SubmitResponse = resp.json().await.map_err(|e| {
            EngineError::new(ExternalErrorKind::MalformedResponse, e.to_string())
        })?;
        if body.id.trim().is_empty() {
            return Err(EngineError::new(
                ExternalErrorKind::MalformedResponse,
                "engine returned an empty job id",
            ));
        }
        tracing::debug!(job_id = %submission.job_id, external_job_ref = %body.id, "engine accepted job");
        Ok(body.id)
    }

    async fn status(&self, external_job_ref: &str) -> Result<EngineState, EngineError> {
        let url = format!("{}/jobs/{}", self.base_url, external_job_ref);
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        let resp = Self::ensure_success(resp).await?;

        let payload: EngineJobPayload = resp.json().await.map_err(|e| {
            EngineError::new(ExternalErrorKind::MalformedResponse, e.to_string())
        })?;
        payload.into_state()
    }

    async fn download(&self, output_url: &str) -> Result<DownloadedAsset, EngineError> {
        // Output URLs are usually pre-signed; no bearer token.
        let resp = self
            .client
            .get(output_url)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = Self::ensure_success(resp).await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = resp.bytes().await.map_err(transport_error)?;
        if bytes.is_empty() {
            return Err(EngineError::new(
                ExternalErrorKind::MalformedResponse,
                "engine output is empty",
            ));
        }
        Ok(DownloadedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
