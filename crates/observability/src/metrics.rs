//! Prometheus-kompatible Metriken fuer tsvoice
//!
//! Registrierte Metriken:
//! - `tsvoice_sessions` – Gauge: Aktive Sessions
//! - `tsvoice_handshakes_pending` – Gauge: Offene Handshake-Kandidaten
//! - `tsvoice_datagrams_received_total` – Counter: Empfangene Datagramme
//! - `tsvoice_datagrams_sent_total` – Counter: Gesendete Datagramme
//! - `tsvoice_datagrams_dropped_total` – Counter: Verworfene Datagramme
//! - `tsvoice_handshakes_completed_total` – Counter: Abgeschlossene Handshakes
//! - `tsvoice_handshakes_reset_total` – Counter: Zurueckgesetzte Handshakes
//! - `tsvoice_resends_total` – Counter: Erneut gesendete Pakete
//! - `tsvoice_delivery_failures_total` – Counter: Endgueltig nicht bestaetigte Pakete
//! - `tsvoice_address_migrations_total` – Counter: Adresswechsel von Sessions
//! - `tsvoice_rto_milliseconds` – Histogram: Retransmission-Timeout pro Session

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Zaehlerstaende des Transports zu einem Zeitpunkt.
///
/// Alle Werte sind monoton seit Serverstart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportWerte {
    pub datagramme_empfangen: u64,
    pub datagramme_gesendet: u64,
    pub datagramme_verworfen: u64,
    pub handshakes_abgeschlossen: u64,
    pub handshakes_zurueckgesetzt: u64,
    pub resends: u64,
    pub zustellfehler: u64,
    pub adresswechsel: u64,
}

/// Alle tsvoice-Prometheus-Metriken
#[derive(Clone)]
pub struct TsVoiceMetrics {
    pub registry: Arc<Registry>,

    pub sessions: IntGauge,
    pub handshakes_pending: IntGauge,

    pub datagrams_received: IntCounter,
    pub datagrams_sent: IntCounter,
    pub datagrams_dropped: IntCounter,
    pub handshakes_completed: IntCounter,
    pub handshakes_reset: IntCounter,
    pub resends: IntCounter,
    pub delivery_failures: IntCounter,
    pub address_migrations: IntCounter,

    pub rto_milliseconds: Histogram,
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let zaehler = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(zaehler.clone()))?;
    Ok(zaehler)
}

/// Zieht einen Prometheus-Counter auf einen absoluten Stand nach
fn angleichen(zaehler: &IntCounter, gesamt: u64) {
    let differenz = gesamt.saturating_sub(zaehler.get());
    if differenz > 0 {
        zaehler.inc_by(differenz);
    }
}

impl TsVoiceMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions = gauge(&registry, "tsvoice_sessions", "Anzahl aktiver Sessions")?;
        let handshakes_pending = gauge(
            &registry,
            "tsvoice_handshakes_pending",
            "Anzahl offener Handshake-Kandidaten",
        )?;

        let datagrams_received = zaehler(
            &registry,
            "tsvoice_datagrams_received_total",
            "Gesamtanzahl empfangener Datagramme",
        )?;
        let datagrams_sent = zaehler(
            &registry,
            "tsvoice_datagrams_sent_total",
            "Gesamtanzahl gesendeter Datagramme",
        )?;
        let datagrams_dropped = zaehler(
            &registry,
            "tsvoice_datagrams_dropped_total",
            "Gesamtanzahl verworfener Datagramme",
        )?;
        let handshakes_completed = zaehler(
            &registry,
            "tsvoice_handshakes_completed_total",
            "Gesamtanzahl abgeschlossener Handshakes",
        )?;
        let handshakes_reset = zaehler(
            &registry,
            "tsvoice_handshakes_reset_total",
            "Gesamtanzahl zurueckgesetzter Handshakes",
        )?;
        let resends = zaehler(
            &registry,
            "tsvoice_resends_total",
            "Gesamtanzahl erneut gesendeter Pakete",
        )?;
        let delivery_failures = zaehler(
            &registry,
            "tsvoice_delivery_failures_total",
            "Pakete, die nach allen Resends unbestaetigt blieben",
        )?;
        let address_migrations = zaehler(
            &registry,
            "tsvoice_address_migrations_total",
            "Gesamtanzahl Adresswechsel von Sessions",
        )?;

        let rto_milliseconds = Histogram::with_opts(
            HistogramOpts::new(
                "tsvoice_rto_milliseconds",
                "Retransmission-Timeout pro Session in Millisekunden",
            )
            .buckets(vec![
                10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0, 60000.0,
            ]),
        )?;
        registry.register(Box::new(rto_milliseconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions,
            handshakes_pending,
            datagrams_received,
            datagrams_sent,
            datagrams_dropped,
            handshakes_completed,
            handshakes_reset,
            resends,
            delivery_failures,
            address_migrations,
            rto_milliseconds,
        })
    }

    /// Uebernimmt die Zaehlerstaende des Transports
    pub fn transport_aktualisieren(&self, werte: &TransportWerte) {
        angleichen(&self.datagrams_received, werte.datagramme_empfangen);
        angleichen(&self.datagrams_sent, werte.datagramme_gesendet);
        angleichen(&self.datagrams_dropped, werte.datagramme_verworfen);
        angleichen(&self.handshakes_completed, werte.handshakes_abgeschlossen);
        angleichen(&self.handshakes_reset, werte.handshakes_zurueckgesetzt);
        angleichen(&self.resends, werte.resends);
        angleichen(&self.delivery_failures, werte.zustellfehler);
        angleichen(&self.address_migrations, werte.adresswechsel);
    }

    /// Setzt die Gauges fuer Sessions und offene Handshakes
    pub fn belegung_setzen(&self, sessions: usize, handshakes: usize) {
        self.sessions.set(sessions as i64);
        self.handshakes_pending.set(handshakes as i64);
    }

    pub fn rto_beobachten(&self, rto_ms: f64) {
        self.rto_milliseconds.observe(rto_ms);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: TsVoiceMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<TsVoiceMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
