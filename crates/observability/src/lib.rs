//! # tsvoice-observability
//!
//! Observability-Crate fuer tsvoice:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber (text/json)

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, TransportWerte, TsVoiceMetrics};

use anyhow::Result;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;

/// Baut den Router mit `/metrics` und `/health`
pub fn router(metriken: TsVoiceMetrics, health: HealthState) -> Router {
    Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health))
}

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis `stopp` abschliesst.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: TsVoiceMetrics,
    health: HealthState,
    stopp: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(metriken, health);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(stopp)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn http_get(addr: SocketAddr, pfad: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let anfrage = format!("GET {pfad} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(anfrage.as_bytes()).await.unwrap();
        let mut antwort = String::new();
        stream.read_to_string(&mut antwort).await.unwrap();
        antwort
    }

    #[tokio::test]
    async fn endpunkte_liefern_metriken_und_health() {
        let metriken = TsVoiceMetrics::neu().unwrap();
        metriken.belegung_setzen(3, 0);
        let health = HealthState::neu();
        health.sessions_setzen(3);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(metriken, health);
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let metrics = http_get(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("tsvoice_sessions 3"));

        let health = http_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains("\"sessions\":3"));

        server.abort();
    }
}
