//! Health-Check-Endpunkt fuer tsvoice
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und aktiven Sessions

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub sessions: usize,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Der Voice-Treiber schreibt Sessions und Tick-Zustand, der Handler liest.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    sessions: Arc<AtomicUsize>,
    transport_laeuft: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            sessions: Arc::new(AtomicUsize::new(0)),
            transport_laeuft: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn sessions_setzen(&self, anzahl: usize) {
        self.sessions.store(anzahl, Ordering::Relaxed);
    }

    pub fn transport_laeuft(&self) -> bool {
        self.transport_laeuft.load(Ordering::Relaxed)
    }

    /// Markiert den Transport als gestoppt (z.B. beim Herunterfahren)
    pub fn transport_status_setzen(&self, laeuft: bool) {
        self.transport_laeuft.store(laeuft, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let status = if self.transport_laeuft() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            sessions: self.sessions(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}
