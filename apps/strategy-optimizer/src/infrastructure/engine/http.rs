//! HTTP adapter for the backtest engine.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::api_types::{LaunchNodeRequest, LaunchNodeResponse, NodeStateResponse};
use super::http_client::EngineHttpClient;
use crate::application::ports::{
    BacktestEnginePort, EngineError, NodeHandle, NodeSnapshot, NodeStatus,
};
use crate::config::EngineConfig;
use crate::domain::shared::NodeId;

/// `BacktestEnginePort` over the engine's REST API.
///
/// - `POST /nodes` with `{config, label}` launches a node
/// - `GET /nodes/{id}` reports `{status, metrics}`
/// - `POST /nodes/{id}/stop` stops it and reports the final state
///
/// Node ids are percent-encoded as single path segments. Launches are only
/// retried when the engine cannot have created the node.
#[derive(Debug, Clone)]
pub struct HttpBacktestEngine {
    client: EngineHttpClient,
}

impl HttpBacktestEngine {
    /// Create an adapter from config.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: EngineHttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl BacktestEnginePort for HttpBacktestEngine {
    async fn launch(&self, config: &Value, label: &str) -> Result<NodeHandle, EngineError> {
        let body = LaunchNodeRequest { config, label };
        let response: LaunchNodeResponse = self.client.create(&["nodes"], &body).await?;

        let node_id = response.node_id.trim();
        if node_id.is_empty() {
            return Err(EngineError::Launch(format!(
                "engine returned an empty node id for '{label}'"
            )));
        }

        debug!(%label, node_id, "Node launched");
        Ok(NodeHandle {
            node_id: NodeId::new(node_id),
        })
    }

    async fn poll(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError> {
        let response: NodeStateResponse = self.client.get(&["nodes", node_id.as_str()]).await?;
        Ok(response.into())
    }

    async fn stop(&self, node_id: &NodeId) -> Result<NodeSnapshot, EngineError> {
        let response: Option<NodeStateResponse> = self
            .client
            .post(&["nodes", node_id.as_str(), "stop"], None::<&()>)
            .await?;
        debug!(%node_id, "Node stopped");
        Ok(response.map_or_else(
            || NodeSnapshot::bare(NodeStatus::Stopped),
            NodeSnapshot::from,
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::RetryConfig;

    fn config_for(server: &MockServer, token: Option<&str>, max_retries: u32) -> EngineConfig {
        EngineConfig {
            base_url: format!("{}/", server.uri()),
            api_token: token.map(str::to_string),
            timeout_ms: 2_000,
            max_parallel: 2,
            retry: RetryConfig {
                max_retries,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }

    fn engine_for(server: &MockServer, token: Option<&str>, max_retries: u32) -> HttpBacktestEngine {
        HttpBacktestEngine::new(&config_for(server, token, max_retries)).unwrap()
    }

    #[tokio::test]
    async fn launch_posts_config_and_label_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_json(json!({"config": {"fast": 5}, "label": "ema #1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"node_id": "n-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, Some("s3cret"), 0);
        let handle = engine.launch(&json!({"fast": 5}), "ema #1").await.unwrap();

        assert_eq!(handle.node_id.as_str(), "n-1");
    }

    #[tokio::test]
    async fn poll_maps_status_and_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/n-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "RUNNING",
                "metrics": {"sharpe": "1.4"}
            })))
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 0);
        let snapshot = engine.poll(&NodeId::new("n-1")).await.unwrap();

        assert_eq!(snapshot.status, NodeStatus::Running);
        assert_eq!(snapshot.metrics.get("sharpe"), Some(&json!("1.4")));
    }

    #[tokio::test]
    async fn stop_tolerates_missing_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes/n-2/stop"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "stopped", "metrics": null})),
            )
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 0);
        let snapshot = engine.stop(&NodeId::new("n-2")).await.unwrap();

        assert_eq!(snapshot.status, NodeStatus::Stopped);
        assert!(snapshot.metrics.is_empty());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/n-3"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nodes/n-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "stopped"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 3);
        let snapshot = engine.poll(&NodeId::new("n-3")).await.unwrap();

        assert_eq!(snapshot.status, NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/n-4"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 2);
        let err = engine.poll(&NodeId::new("n-4")).await.unwrap_err();

        assert_eq!(err, EngineError::MaxRetriesExceeded { attempts: 3 });
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"detail": "unknown strategy"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 5);
        let err = engine.launch(&json!({}), "bad #1").await.unwrap_err();

        assert_eq!(
            err,
            EngineError::Http {
                status: 422,
                message: "unknown strategy".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn launch_is_not_repeated_after_an_ambiguous_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 3);
        let err = engine.launch(&json!({}), "once #1").await.unwrap_err();

        assert!(matches!(err, EngineError::Http { status: 502, .. }));
    }

    #[tokio::test]
    async fn launch_timeout_is_not_repeated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"node_id": "late"}))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_for(&server, None, 3);
        config.timeout_ms = 50;
        let engine = HttpBacktestEngine::new(&config).unwrap();
        let err = engine.launch(&json!({}), "slow #1").await.unwrap_err();

        assert!(matches!(err, EngineError::Network(_)));
    }

    #[tokio::test]
    async fn launch_retries_when_engine_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"node_id": "n-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 3);
        let handle = engine.launch(&json!({}), "busy #1").await.unwrap();

        assert_eq!(handle.node_id.as_str(), "n-9");
    }

    #[tokio::test]
    async fn node_ids_are_encoded_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/a%2Fb%3Fc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/nodes/a%2Fb%3Fc/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 0);
        let node_id = NodeId::new("a/b?c");

        assert_eq!(engine.poll(&node_id).await.unwrap().status, NodeStatus::Running);
        assert_eq!(engine.stop(&node_id).await.unwrap().status, NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn empty_node_id_is_a_launch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"node_id": " "})))
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 0);
        let err = engine.launch(&json!({}), "x #1").await.unwrap_err();

        assert!(matches!(err, EngineError::Launch(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/n-5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let engine = engine_for(&server, None, 0);
        let err = engine.poll(&NodeId::new("n-5")).await.unwrap_err();

        assert!(matches!(err, EngineError::Decode(_)));
    }
}
