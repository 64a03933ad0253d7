//! Wiedergabe-Konfiguration und Zustand einer Audio-Quelle

use serde::{Deserialize, Serialize};

/// Konfiguration der serverseitigen Wiedergabe
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Voice-Pakete dekodieren (sonst nur Transport)
    pub aktiviert: bool,
    /// Abtastrate der Ausgabe in Hz
    pub sample_rate: u32,
    /// Kanalanzahl der Ausgabe
    pub channels: usize,
    /// Mindestfuellstand bevor die Wiedergabe startet (ms)
    pub min_puffer_ms: u32,
    /// Hoechstfuellstand des Ausgabepuffers (ms)
    pub max_puffer_ms: u32,
    /// Anzahl der Decode-Worker
    pub decode_threads: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            aktiviert: true,
            sample_rate: 48_000,
            channels: 1,
            min_puffer_ms: 40,
            max_puffer_ms: 500,
            decode_threads: 2,
        }
    }
}

impl PlaybackConfig {
    /// Umrechnung Millisekunden -> Samples pro Kanal
    pub fn ms_zu_samples(&self, ms: u32) -> usize {
        (self.sample_rate as usize * ms as usize).div_ceil(1000)
    }
}

/// Zustand eines Wiedergabe-Streams
///
/// ```text
/// Stopped -> Buffering -> Playing <-> Stopping -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Kein Stream aktiv
    Stopped,
    /// Ausgabe ist leergelaufen, wartet auf weitere Daten
    Buffering,
    /// Stream wird abgespielt
    Playing,
    /// Stream-Ende empfangen, Rest wird ausgespielt
    Stopping,
}

impl PlaybackState {
    /// Ein neuer Stream beginnt in diesen Zustaenden
    pub fn ist_gestoppt(self) -> bool {
        matches!(self, Self::Stopped | Self::Stopping)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_konfiguration() {
        let config = PlaybackConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.ms_zu_samples(config.min_puffer_ms), 1920);
        assert_eq!(config.ms_zu_samples(config.max_puffer_ms), 24_000);
    }

    #[test]
    fn gestoppte_zustaende() {
        assert!(PlaybackState::Stopped.ist_gestoppt());
        assert!(PlaybackState::Stopping.ist_gestoppt());
        assert!(!PlaybackState::Buffering.ist_gestoppt());
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
    }
}
