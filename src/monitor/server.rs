//! Diagnostics HTTP server

use axum::{routing::get, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::monitor::handlers;
use crate::receiver::{SharedReceiverBuffer, SharedReport};
use crate::sender::SharedFrameFifo;

/// Which end of the link this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// Shared state read by the handlers
pub struct MonitorState {
    pub role: Role,
    pub started: Instant,
    pub report: Option<SharedReport>,
    pub buffer: Option<SharedReceiverBuffer>,
    pub fifo: Option<SharedFrameFifo>,
}

impl MonitorState {
    pub fn sender(fifo: SharedFrameFifo) -> Self {
        Self {
            role: Role::Sender,
            started: Instant::now(),
            report: None,
            buffer: None,
            fifo: Some(fifo),
        }
    }

    pub fn receiver(buffer: SharedReceiverBuffer, report: SharedReport) -> Self {
        Self {
            role: Role::Receiver,
            started: Instant::now(),
            report: Some(report),
            buffer: Some(buffer),
            fifo: None,
        }
    }
}

/// Read-only diagnostics endpoint
pub struct MonitorServer {
    config: MonitorConfig,
    state: Arc<MonitorState>,
}

impl MonitorServer {
    pub fn new(config: MonitorConfig, state: MonitorState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/report", get(handlers::get_report))
            .route("/api/buffer", get(handlers::get_buffer))
            .route("/api/fifo", get(handlers::get_fifo))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        addr.parse()
            .map_err(|_| Error::Config(format!("invalid monitor address {}", addr)))
    }

    /// Serve until the task is dropped
    pub async fn run(self) -> Result<()> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("Monitor listening on http://{}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Run on a background task, logging a failure instead of returning it
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Monitor server error: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;
    use crate::receiver::create_shared_buffer;
    use crate::sender::create_shared_fifo;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use parking_lot::RwLock;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn receiver_server() -> MonitorServer {
        let buffer = create_shared_buffer(&ReceiverConfig::default());
        let report = Arc::new(RwLock::new(None));
        MonitorServer::new(MonitorConfig::default(), MonitorState::receiver(buffer, report))
    }

    #[tokio::test]
    async fn test_status() {
        let server = receiver_server();
        let (status, json) = get_json(server.router(), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["mode"], "receiver");
    }

    #[tokio::test]
    async fn test_report_before_first_tick() {
        let server = receiver_server();
        let (status, json) = get_json(server.router(), "/api/report").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_buffer_counters() {
        let server = receiver_server();
        let (status, json) = get_json(server.router(), "/api/buffer").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["nb_slots"], 16);
        assert_eq!(json["data"]["counters"]["blocks_written"], 0);
    }

    #[tokio::test]
    async fn test_endpoints_follow_role() {
        let server = MonitorServer::new(
            MonitorConfig::default(),
            MonitorState::sender(create_shared_fifo(20)),
        );

        let (status, _) = get_json(server.router(), "/api/report").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = get_json(server.router(), "/api/fifo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["capacity"], 20);
    }

    #[test]
    fn test_invalid_address() {
        let config = MonitorConfig {
            bind_address: "nowhere".to_string(),
            ..Default::default()
        };
        let server = MonitorServer::new(config, MonitorState::sender(create_shared_fifo(1)));
        assert!(server.addr().is_err());
    }
}
