//! HTTP client for effusive-server
//!
//! Every call maps connectivity failures and non-success statuses to
//! [`Error::Network`], except 404 which is reported as [`Error::NotFound`]
//! (the server could not find a reference or model).

use effusive_common::api::{
    DownloadHfModelsRequest, DownloadHfModelsResponse, FoundModels, GenerateRequest,
    PostRefAudioRequest, PostRefAudioResponse, SetModelsRequest, StreamChunk, TestHashesRequest,
    TestHashesResponse,
};
use effusive_common::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Timeout for ordinary calls; uploads, downloads and generation have none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("effusive/", env!("CARGO_PKG_VERSION"));

/// Turn user input into a base URL
///
/// `0.0.0.0` is a bind address, not a destination, so it becomes
/// `localhost`. A scheme is added when missing.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/').replace("0.0.0.0", "localhost");
    if host.contains("://") {
        host
    } else {
        format!("http://{}", host)
    }
}

fn network_error(context: &str, err: reqwest::Error) -> Error {
    Error::Network(format!("{}: {}", context, err))
}

/// Generation output as it arrives
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    /// Build a client without contacting the server
    pub fn new(host: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| network_error("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base_url: normalize_host(host),
        })
    }

    /// Build a client and check the server answers
    pub async fn connect(host: &str) -> Result<Self> {
        let client = Self::new(host)?;
        client.ping().await?;
        tracing::info!(host = %client.base_url, "Connected to server");
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fail unless `response` has the expected status
    async fn check(path: &str, response: reqwest::Response, expected: StatusCode) -> Result<reqwest::Response> {
        let status = response.status();
        if status == expected || (expected == StatusCode::OK && status.is_success()) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{}: {}", path, body)));
        }
        Err(Error::Network(format!("{} returned {}: {}", path, status, body)))
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| Error::MalformedData(format!("{}: {}", path, e)))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, timeout: Option<Duration>) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| network_error(path, e))?;
        let response = Self::check(path, response, StatusCode::OK).await?;
        Self::decode(path, response).await
    }

    /// HEAD /test
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .head(self.url("/test"))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(|e| network_error(&format!("could not reach {}", self.base_url), e))?;
        Self::check("/test", response, StatusCode::OK).await?;
        Ok(())
    }

    pub async fn find_models(&self) -> Result<FoundModels> {
        self.post_json("/find_models", &serde_json::json!({}), Some(DEFAULT_TIMEOUT))
            .await
    }

    /// Ask the server to load weights; returns its active weights
    pub async fn set_models(&self, request: &SetModelsRequest) -> Result<SetModelsRequest> {
        self.post_json("/set_models", request, Some(DEFAULT_TIMEOUT)).await
    }

    /// Which reference hashes the server can use without an upload
    pub async fn test_hashes(&self, hashes: &[String]) -> Result<TestHashesResponse> {
        let body = TestHashesRequest {
            hashes: hashes.to_vec(),
        };
        self.post_json("/test_hashes", &body, Some(DEFAULT_TIMEOUT)).await
    }

    /// Register reference audio; the server answers 201 Created
    pub async fn post_ref_audio(&self, request: &PostRefAudioRequest) -> Result<PostRefAudioResponse> {
        let path = "/post_ref_audio";
        let response = self
            .http
            .post(self.url(path))
            .json(request)
            .send()
            .await
            .map_err(|e| network_error(path, e))?;
        let response = Self::check(path, response, StatusCode::CREATED).await?;
        Self::decode(path, response).await
    }

    /// Start a generation and stream its NDJSON chunks
    pub async fn generate(&self, request: &GenerateRequest) -> Result<ChunkStream> {
        let path = "/generate";
        let response = self
            .http
            .post(self.url(path))
            .json(request)
            .send()
            .await
            .map_err(|e| network_error(path, e))?;
        let response = Self::check(path, response, StatusCode::OK).await?;

        let mut bytes = Box::pin(response.bytes_stream());
        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(|e| network_error("generation stream", e))?;
                buffer.extend_from_slice(&piece);
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline).collect();
                    if let Some(chunk) = StreamChunk::parse_line(&String::from_utf8_lossy(&raw))? {
                        yield chunk;
                    }
                }
            }
            if let Some(chunk) = StreamChunk::parse_line(&String::from_utf8_lossy(&buffer))? {
                yield chunk;
            }
        };
        Ok(stream.boxed())
    }

    /// Best-effort stop of the running generation
    pub async fn stop(&self) -> Result<()> {
        let path = "/stop";
        let response = self
            .http
            .post(self.url(path))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(|e| network_error(path, e))?;
        Self::check(path, response, StatusCode::OK).await?;
        Ok(())
    }

    pub async fn download_hf_models(&self, request: &DownloadHfModelsRequest) -> Result<DownloadHfModelsResponse> {
        self.post_json("/download_hf_models", request, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("localhost:9880"), "http://localhost:9880");
        assert_eq!(normalize_host("  0.0.0.0:9880/ "), "http://localhost:9880");
        assert_eq!(normalize_host("https://tts.example.org"), "https://tts.example.org");
        assert_eq!(normalize_host("http://127.0.0.1:9880/"), "http://127.0.0.1:9880");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 (discard) is closed on test machines
        let result = ServerClient::connect("127.0.0.1:9").await;
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
