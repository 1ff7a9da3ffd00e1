//! HTTP client for the unary schema endpoints.

use futures_util::stream;
use protofleet_core::protocol::{
    CompareReport, CompareRequest, ErrorBody, FileBody, UploadChunk, UploadReport, VerifyRequest,
    VerifyResponse, FORCE_FETCH_HEADER,
};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::utils::errors::{AgentError, Result};

#[derive(Clone)]
pub struct SchemaClient {
    http: Client,
    base_url: String,
}

impl SchemaClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch `path`. `None` when `digest` names the current version and
    /// `force` is off.
    pub async fn fetch(
        &self,
        path: &str,
        digest: Option<&str>,
        force: bool,
    ) -> Result<Option<FileBody>> {
        let mut query = vec![("path", path)];
        if let Some(digest) = digest {
            query.push(("digest", digest));
        }

        let mut request = self.http.get(self.url("/api/fetch")).query(&query);
        if force {
            request = request.header(FORCE_FETCH_HEADER, "true");
        }

        let response = check(request.send().await?).await?;
        if response.status() == StatusCode::NO_CONTENT {
            debug!(path = %path, "Fetch up to date");
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    pub async fn verify(&self, path: &str, digest: &str) -> Result<bool> {
        let body = VerifyRequest {
            path: path.to_string(),
            digest: digest.to_string(),
        };
        let response = check(
            self.http
                .post(self.url("/api/verify"))
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        let verdict: VerifyResponse = response.json().await?;
        Ok(verdict.matches)
    }

    pub async fn compare(&self, manifest: &str) -> Result<CompareReport> {
        let body = CompareRequest {
            manifest: manifest.to_string(),
        };
        let response = check(
            self.http
                .post(self.url("/api/compare"))
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Stream `chunks` to the server as newline-delimited JSON.
    pub async fn upload(&self, chunks: Vec<UploadChunk>) -> Result<UploadReport> {
        let mut lines = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let mut line = serde_json::to_vec(chunk)?;
            line.push(b'\n');
            lines.push(Ok::<_, std::io::Error>(line));
        }

        let response = check(
            self.http
                .post(self.url("/api/upload"))
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(reqwest::Body::wrap_stream(stream::iter(lines)))
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }
}

/// Map error statuses to `NotFound` / `Remote` using the `{"error"}` body.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    if status == StatusCode::NOT_FOUND {
        Err(AgentError::NotFound(message))
    } else {
        Err(AgentError::Remote(format!("{}: {}", status, message)))
    }
}
