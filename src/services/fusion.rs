use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// Failure classification for upstream fusion calls. The retry policy keys
/// off these variants: `RateLimited` and `Transient` are retried,
/// `Permanent` fails fast, `RateLimitExhausted` is produced by the retry
/// layer once the attempt cap is hit.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream still rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl FusionError {
    /// Classify an upstream failure message. Rate-limit phrasing varies by
    /// deployment, so match a set of known fragments case-insensitively.
    pub fn from_failure_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        const RATE_LIMIT_PHRASES: [&str; 4] =
            ["rate limit", "too many", "slow down", "quota exceeded"];
        if RATE_LIMIT_PHRASES.iter().any(|p| lowered.contains(p)) {
            FusionError::RateLimited(text.to_string())
        } else {
            FusionError::Permanent(text.to_string())
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FusionError::RateLimited(_))
    }
}

/// The upstream transformation seam. Implemented by [`FaceFusionClient`]
/// for the real Space and by stubs in tests.
#[async_trait]
pub trait FusionBackend: Send + Sync {
    /// Fuse the face from `source_url` onto `target_url`, returning raw
    /// JPEG bytes.
    async fn fuse(&self, source_url: &str, target_url: &str) -> Result<Vec<u8>, FusionError>;
}

/// Client for the FaceFusion Hugging Face Space.
///
/// The Space's `process_images` endpoint answers with a two-element `data`
/// array: a result descriptor and a status message. The descriptor has
/// been observed in three shapes (inline base64, `{url}`, `{path}`); all
/// are normalized to raw bytes here.
pub struct FaceFusionClient {
    space_url: String,
    api_token: String,
    timeout: Duration,
    // Dropped and rebuilt after a rate-limit response so the next attempt
    // reconnects with a fresh session.
    http: Mutex<Option<Client>>,
}

#[derive(Deserialize)]
struct PredictResponse {
    data: Vec<serde_json::Value>,
}

impl FaceFusionClient {
    pub fn new(space_url: &str, api_token: &str, timeout: Duration) -> Self {
        Self {
            space_url: space_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            timeout,
            http: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Client, FusionError> {
        let mut guard = self.http.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| FusionError::Transient(format!("failed to build http client: {e}")))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn discard_session(&self) {
        *self.http.lock().await = None;
    }

    async fn call_process_images(
        &self,
        client: &Client,
        source_url: &str,
        target_url: &str,
    ) -> Result<PredictResponse, FusionError> {
        let endpoint = format!("{}/run/process_images", self.space_url);
        let response = client
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "data": [source_url, target_url] }))
            .send()
            .await
            .map_err(|e| FusionError::Transient(format!("fusion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        response
            .json::<PredictResponse>()
            .await
            .map_err(|e| FusionError::Permanent(format!("malformed fusion response: {e}")))
    }

    /// Turn the result descriptor into raw image bytes.
    async fn normalize(
        &self,
        client: &Client,
        descriptor: &serde_json::Value,
    ) -> Result<Vec<u8>, FusionError> {
        match descriptor {
            serde_json::Value::String(encoded) => decode_inline(encoded),
            serde_json::Value::Object(fields) => {
                if let Some(url) = fields.get("url").and_then(|v| v.as_str()) {
                    return download_result(client, url).await;
                }
                if let Some(path) = fields.get("path").and_then(|v| v.as_str()) {
                    return read_temp_file(path).await;
                }
                Err(FusionError::Permanent(
                    "fusion result object carries neither url nor path".to_string(),
                ))
            }
            other => Err(FusionError::Permanent(format!(
                "unexpected fusion result shape: {other}"
            ))),
        }
    }
}

#[async_trait]
impl FusionBackend for FaceFusionClient {
    async fn fuse(&self, source_url: &str, target_url: &str) -> Result<Vec<u8>, FusionError> {
        let client = self.client().await?;

        let result = async {
            let predict = self
                .call_process_images(&client, source_url, target_url)
                .await?;

            let descriptor = predict.data.first().ok_or_else(|| {
                FusionError::Permanent("empty fusion response data".to_string())
            })?;
            if let Some(status) = predict.data.get(1).and_then(|v| v.as_str()) {
                tracing::debug!(status, "fusion status message");
            }

            self.normalize(&client, descriptor).await
        }
        .await;

        if let Err(ref e) = result {
            if e.is_rate_limited() {
                tracing::warn!("upstream rate limited, discarding fusion session");
                self.discard_session().await;
            }
        }
        result
    }
}

fn classify_http_failure(status: StatusCode, body: &str) -> FusionError {
    if status.is_server_error() {
        return FusionError::Transient(format!("upstream returned {status}: {body}"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return FusionError::RateLimited(format!("upstream returned {status}: {body}"));
    }
    FusionError::from_failure_text(&format!("upstream returned {status}: {body}"))
}

/// Decode an inline-encoded result, tolerating a `data:*;base64,` prefix.
fn decode_inline(encoded: &str) -> Result<Vec<u8>, FusionError> {
    let payload = match encoded.split_once(",") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| FusionError::Permanent(format!("undecodable inline fusion result: {e}")))
}

async fn download_result(client: &Client, url: &str) -> Result<Vec<u8>, FusionError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FusionError::Transient(format!("result download failed: {e}")))?;
    if !response.status().is_success() {
        return Err(FusionError::Transient(format!(
            "result download returned {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FusionError::Transient(format!("result download failed: {e}")))?;
    Ok(bytes.to_vec())
}

/// Read a locally materialized result file and remove it afterwards. The
/// removal is best-effort; a stale temp file is not worth failing the job.
async fn read_temp_file(path: &str) -> Result<Vec<u8>, FusionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FusionError::Permanent(format!("fusion result file unreadable: {e}")))?;
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path, error = %e, "could not remove fusion temp file");
    }
    Ok(bytes)
}
