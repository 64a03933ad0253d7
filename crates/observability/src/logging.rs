//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `TSV_LOG_LEVEL`: Filter-Direktive (z.B. `info` oder `tsvoice_voice=trace`),
//!   ueberschreibt den Wert aus der Konfiguration
//! - `TSV_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "TSV_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "TSV_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration; gesetzte
/// Umgebungsvariablen haben Vorrang. Ein zweiter Aufruf ist wirkungslos.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = format_waehlen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Waehlt das Log-Format: Umgebung vor Konfiguration, ungueltige Werte
/// fallen auf `text` zurueck
pub fn format_waehlen(aus_env: Option<String>, konfiguriert: &str) -> String {
    let kandidat = aus_env.unwrap_or_else(|| konfiguriert.to_string());
    if log_format_gueltig(&kandidat) {
        kandidat
    } else {
        "text".to_string()
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level}");
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn format_umgebung_hat_vorrang() {
        assert_eq!(format_waehlen(Some("json".into()), "text"), "json");
        assert_eq!(format_waehlen(None, "json"), "json");
    }

    #[test]
    fn format_ungueltig_faellt_auf_text() {
        assert_eq!(format_waehlen(Some("xml".into()), "json"), "text");
        assert_eq!(format_waehlen(None, "JSON"), "text");
    }
}
