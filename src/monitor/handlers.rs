//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::receiver::{BufferCounters, StreamReport};
use crate::monitor::server::{MonitorState, Role};

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(Serialize)]
pub struct SystemStatus {
    pub mode: Role,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

/// Receiver buffer state
#[derive(Serialize)]
pub struct BufferStatus {
    pub nb_slots: usize,
    pub ring_bytes: usize,
    pub buffer_len_sec: f64,
    pub gauge: i32,
    pub correction: f64,
    pub counters: BufferCounters,
}

/// Sender FIFO state
#[derive(Serialize)]
pub struct FifoStatus {
    pub len: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub overwritten: u64,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<MonitorState>>) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::ok(SystemStatus {
        mode: state.role,
        uptime_seconds: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Latest stream report
pub async fn get_report(
    State(state): State<Arc<MonitorState>>,
) -> (StatusCode, Json<ApiResponse<StreamReport>>) {
    let Some(report) = &state.report else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::error("Not a receiver")));
    };

    match report.read().clone() {
        Some(r) => (StatusCode::OK, Json(ApiResponse::ok(r))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("No report yet")),
        ),
    }
}

/// Receiver buffer counters
pub async fn get_buffer(
    State(state): State<Arc<MonitorState>>,
) -> (StatusCode, Json<ApiResponse<BufferStatus>>) {
    let Some(buffer) = &state.buffer else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::error("Not a receiver")));
    };

    let buffer = buffer.lock();
    let status = BufferStatus {
        nb_slots: buffer.nb_slots(),
        ring_bytes: buffer.ring_size(),
        buffer_len_sec: buffer.buffer_len_sec(),
        gauge: buffer.gauge(),
        correction: buffer.balance_correction(),
        counters: buffer.counters(),
    };

    (StatusCode::OK, Json(ApiResponse::ok(status)))
}

/// Sender FIFO occupancy
pub async fn get_fifo(
    State(state): State<Arc<MonitorState>>,
) -> (StatusCode, Json<ApiResponse<FifoStatus>>) {
    let Some(fifo) = &state.fifo else {
        return (StatusCode::NOT_FOUND, Json(ApiResponse::error("Not a sender")));
    };

    let status = FifoStatus {
        len: fifo.len(),
        capacity: fifo.capacity(),
        pushed: fifo.pushed_count(),
        overwritten: fifo.overwritten_count(),
    };

    (StatusCode::OK, Json(ApiResponse::ok(status)))
}
