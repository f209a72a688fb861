use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

use crate::board::{Report, StatusBoard};
use crate::models::{CheckMethod, Status};

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub x: u8,
    pub y: u8,
    pub status: Status,
    pub method: CheckMethod,
    pub target: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ReportBody {
    #[serde(flatten)]
    pub report: Report,
    pub message: String,
}

pub async fn get_status(State(board): State<StatusBoard>) -> Json<Vec<HostStatus>> {
    let hosts = board
        .snapshot()
        .await
        .into_iter()
        .map(|(at, r)| HostStatus {
            x: at.x,
            y: at.y,
            status: r.status,
            method: r.method,
            target: r.target,
            detail: r.detail,
            timestamp: r.timestamp,
            latency_ms: r.latency_ms,
        })
        .collect();
    Json(hosts)
}

pub async fn get_report(State(board): State<StatusBoard>) -> Json<ReportBody> {
    let report = board.report().await;
    Json(ReportBody { message: report.message(), report })
}

pub fn create_router(board: StatusBoard) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/report", get(get_report))
        .with_state(board)
}

pub async fn start_server(port: u16, board: StatusBoard) -> Result<()> {
    let app = create_router(board);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status API on {}", addr))?;
    info!("Status API: http://localhost:{}/api/status", addr.port());
    axum::serve(listener, app).await.context("Status API server failed")
}
