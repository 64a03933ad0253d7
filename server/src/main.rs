//! tsvoice Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use tsvoice_observability::logging_initialisieren;
use tsvoice_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("TSV_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Logging zuerst, damit die Warnung bei fehlender Datei sichtbar ist
    let logging = ServerConfig::laden(&config_pfad)
        .map(|c| c.logging)
        .unwrap_or_default();
    logging_initialisieren(&logging.level, &logging.format);

    let config = ServerConfig::laden(&config_pfad)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "tsvoice Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
