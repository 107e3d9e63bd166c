//! NodeClient - central-side transport to camera nodes
//!
//! ## Responsibilities
//!
//! - Issue capture / status / image / preview calls to a node
//! - Classify transport failures into unreachable / timeout / failure

use crate::error::{Error, Result};
use crate::models::{CaptureResponse, NodeStatusResponse, StartPreviewRequest};
use crate::node_registry::{CallResult, NodeInfo};
use crate::node_store::{CaptureRequest, ImageRecord};
use crate::session::SessionId;
use crate::set_aggregator::NodeOutcome;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;

/// Classified failure of one node call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeCallError {
    /// Node reachable but the operation failed
    #[error("node failure: {0}")]
    Failure(String),
    /// Request exceeded the client timeout
    #[error("node call timed out")]
    Timeout,
    /// Connection could not be established
    #[error("node unreachable: {0}")]
    Unreachable(String),
}

impl NodeCallError {
    pub fn call_result(&self) -> CallResult {
        match self {
            NodeCallError::Failure(_) => CallResult::Reachable,
            NodeCallError::Timeout => CallResult::TimedOut,
            NodeCallError::Unreachable(reason) => CallResult::Unreachable(reason.clone()),
        }
    }

    pub fn into_outcome(self) -> NodeOutcome {
        match self {
            NodeCallError::Failure(reason) => NodeOutcome::Failure { reason },
            NodeCallError::Timeout => NodeOutcome::Timeout,
            NodeCallError::Unreachable(reason) => NodeOutcome::Unreachable { reason },
        }
    }

    pub fn into_error(self, node_id: &str) -> Error {
        match self {
            NodeCallError::Failure(reason) => Error::Capture(reason),
            NodeCallError::Timeout => Error::Timeout(format!("node {} did not answer", node_id)),
            NodeCallError::Unreachable(message) => Error::NodeUnreachable {
                node_id: node_id.to_string(),
                message,
            },
        }
    }
}

pub type CallOutcome<T> = std::result::Result<T, NodeCallError>;

/// Transport seam between the orchestrator and the nodes
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Ask the node to capture one image for `session`
    async fn capture(&self, node: &NodeInfo, session: &SessionId) -> CallOutcome<ImageRecord>;

    /// Health / status probe
    async fn probe(&self, node: &NodeInfo) -> CallOutcome<NodeStatusResponse>;

    /// Raw bytes of a stored image
    async fn fetch_image(&self, node: &NodeInfo, filename: &str) -> CallOutcome<Bytes>;

    /// Ask the node to publish preview frames to `relay_url`
    async fn start_preview(&self, node: &NodeInfo, relay_url: &str) -> CallOutcome<()>;

    async fn stop_preview(&self, node: &NodeInfo) -> CallOutcome<()>;
}

/// Error body produced by node routes
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: String,
    message: String,
}

/// reqwest backed client
#[derive(Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }

    fn classify(e: reqwest::Error) -> NodeCallError {
        if e.is_connect() {
            NodeCallError::Unreachable(e.to_string())
        } else if e.is_timeout() {
            NodeCallError::Timeout
        } else {
            NodeCallError::Failure(e.to_string())
        }
    }

    /// Map non-2xx responses to `Failure` with the node's error message
    async fn check(response: reqwest::Response) -> CallOutcome<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => format!("{}: {}", err.error_code, err.message),
            Err(_) => format!("HTTP {}", status),
        };
        Err(NodeCallError::Failure(reason))
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn capture(&self, node: &NodeInfo, session: &SessionId) -> CallOutcome<ImageRecord> {
        let url = format!("{}/capture", node.base_url());
        let request = CaptureRequest {
            session: Some(session.clone()),
            resolution: None,
        };

        tracing::debug!(node_id = %node.node_id, url = %url, session = %session, "Sending capture request");

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::classify)?;
        let response = Self::check(response).await?;

        let body: CaptureResponse = response.json().await.map_err(Self::classify)?;
        if body.status != "success" {
            return Err(NodeCallError::Failure(format!(
                "capture status {}",
                body.status
            )));
        }
        Ok(body.into_record())
    }

    async fn probe(&self, node: &NodeInfo) -> CallOutcome<NodeStatusResponse> {
        let url = format!("{}/status", node.base_url());
        let response = self.http.get(&url).send().await.map_err(Self::classify)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(Self::classify)
    }

    async fn fetch_image(&self, node: &NodeInfo, filename: &str) -> CallOutcome<Bytes> {
        let url = format!(
            "{}/images/{}/raw",
            node.base_url(),
            urlencoding::encode(filename)
        );
        let response = self.http.get(&url).send().await.map_err(Self::classify)?;
        let response = Self::check(response).await?;
        response.bytes().await.map_err(Self::classify)
    }

    async fn start_preview(&self, node: &NodeInfo, relay_url: &str) -> CallOutcome<()> {
        let url = format!("{}/preview/start", node.base_url());
        let response = self
            .http
            .post(&url)
            .json(&StartPreviewRequest {
                relay_url: relay_url.to_string(),
            })
            .send()
            .await
            .map_err(Self::classify)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn stop_preview(&self, node: &NodeInfo) -> CallOutcome<()> {
        let url = format!("{}/preview/stop", node.base_url());
        let response = self.http.post(&url).send().await.map_err(Self::classify)?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_classification() {
        assert_eq!(
            NodeCallError::Failure("busy".into()).call_result(),
            CallResult::Reachable
        );
        assert_eq!(NodeCallError::Timeout.call_result(), CallResult::TimedOut);
        assert_eq!(
            NodeCallError::Unreachable("refused".into()).into_outcome(),
            NodeOutcome::Unreachable {
                reason: "refused".into()
            }
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpNodeClient::new(Duration::from_millis(500), Duration::from_secs(2)).unwrap();
        let node = NodeInfo::new("node_x", addr.to_string());
        let session: SessionId = "20250130_122601".parse().unwrap();

        let err = client.capture(&node, &session).await.unwrap_err();
        assert!(matches!(err, NodeCallError::Unreachable(_)));
    }
}
