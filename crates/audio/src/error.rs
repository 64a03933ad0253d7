//! Fehlertypen fuer die Audio-Wiedergabe

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Wiedergabe
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Codec nicht unterstuetzt: {0}")]
    CodecNichtUnterstuetzt(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Puffer zu klein: {benoetigt} Samples benoetigt, {verfuegbar} verfuegbar")]
    PufferZuKlein { benoetigt: usize, verfuegbar: usize },

    #[error("Resampler-Fehler: {0}")]
    Resampler(String),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
