//! JSON-over-HTTP client for registry traffic.
//!
//! Every call is bounded by a single timeout that covers connecting, sending,
//! and reading the whole response body, so a hung registry can never block
//! the caller longer than that.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use windmesh_common::{JsonHttpClient, InstanceKey};
//!
//! # async fn demo() -> windmesh_common::Result<()> {
//! let client = JsonHttpClient::new(Duration::from_secs(5));
//! let key = InstanceKey::new("svc-a", "id-1");
//! let response = client.post_json("http://localhost:7000/heartbeat", &key).await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

use http_body_util::{BodyExt, Full};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::{MeshError, Result};

/// Pooled hyper client over plain HTTP.
pub type HyperClient = Client<HttpConnector, Full<Bytes>>;

/// Builds the shared hyper client used by every outbound call in the mesh.
pub fn hyper_client() -> HyperClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Joins a base URL and an absolute path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Bytes that cannot appear raw inside one path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encodes `segment` so it stays a single path segment, e.g. a
/// service name placed after `/services/`.
pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Status and fully-read body of a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns a non-matching status into `MeshError::UnexpectedStatus`.
    pub fn expect_status(self, expected: StatusCode) -> Result<Self> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(MeshError::UnexpectedStatus {
                status: self.status.as_u16(),
                body: self.text(),
            })
        }
    }
}

/// JSON HTTP client with a per-call timeout.
#[derive(Clone)]
pub struct JsonHttpClient {
    client: HyperClient,
    timeout: Duration,
}

impl JsonHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: hyper_client(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| MeshError::InvalidRequest(format!("Failed to build request: {}", e)))?;
        self.send(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<HttpResponse> {
        let body = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| MeshError::InvalidRequest(format!("Failed to build request: {}", e)))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse> {
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| MeshError::Transport(format!("HTTP request failed: {}", e)))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| MeshError::Transport(format!("Failed to read response: {}", e)))?
                .to_bytes();
            Ok(HttpResponse { status, body })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| MeshError::Timeout(self.timeout.as_millis() as u64))?
    }
}
