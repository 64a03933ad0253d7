//! Laufzeit-Konfiguration des Voice-Transports

use std::time::Duration;

/// Konfiguration von Handshake, Retransmission, Sessions und Eventloops
///
/// Die Server-Konfiguration (TOML) wird beim Start hierhin uebersetzt.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Exponent-Level der Puzzles (`x^(2^level) mod n`)
    pub puzzle_level: u32,
    /// Anzahl vorberechneter Puzzles
    pub puzzle_pool_groesse: usize,
    /// PUZZLE_GET ohne vorheriges COOKIE_GET ablehnen
    pub cookie_pflicht: bool,
    /// Eine verbundene, aber stumme Session darf durch einen neuen Handshake ersetzt werden
    pub session_reinitialisierung: bool,
    /// Inaktivitaet, nach der ein Handshake-Kandidat verworfen wird
    pub handshake_timeout: Duration,
    /// Zeitlimit fuer InitLow/InitHigh seit dem letzten Kommando
    pub init_timeout: Duration,
    /// Verbundene Session ohne Lebenszeichen wird nach dieser Zeit getrennt
    pub verbindungs_timeout: Duration,
    /// Abstand zwischen zwei Pings an einen Client
    pub ping_intervall: Duration,
    /// Obergrenze fuer das Ausspuelen beim geordneten Trennen
    pub trennungs_timeout: Duration,
    /// Anzahl der Netzwerk-Eventloops (OS-Threads)
    pub event_loops: usize,
    /// Schreib-Registrierungen pro Socket (hoechstens `event_loops`)
    pub events_per_socket: usize,
    /// Zeitbudget eines Lese- oder Schreib-Handlers
    pub io_budget: Duration,
    /// Untergrenze des Retransmission-Timeouts
    pub min_rto: Duration,
    /// Neuversuche, bevor ein Paket als nicht zustellbar gilt
    pub max_resends: u32,
    /// Mindestdauer seit dem ersten Versand, bevor aufgegeben wird
    pub resend_aufgabe: Duration,
    /// Intervall des Treiber-Ticks
    pub tick_intervall: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            puzzle_level: 1000,
            puzzle_pool_groesse: 128,
            cookie_pflicht: true,
            session_reinitialisierung: true,
            handshake_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(5),
            verbindungs_timeout: Duration::from_secs(30),
            ping_intervall: Duration::from_secs(1),
            trennungs_timeout: Duration::from_secs(5),
            event_loops: 4,
            events_per_socket: 4,
            io_budget: Duration::from_micros(2500),
            min_rto: Duration::ZERO,
            max_resends: 15,
            resend_aufgabe: Duration::from_secs(15),
            tick_intervall: Duration::from_millis(500),
        }
    }
}

impl VoiceConfig {
    /// Schreib-Registrierungen pro Socket
    pub fn schreib_registrierungen(&self) -> usize {
        self.events_per_socket.min(self.event_loops).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let config = VoiceConfig::default();
        assert_eq!(config.puzzle_level, 1000);
        assert!(config.cookie_pflicht);
        assert_eq!(config.io_budget, Duration::from_micros(2500));
        assert_eq!(config.max_resends, 15);
    }

    #[test]
    fn schreib_registrierungen_begrenzt() {
        let mut config = VoiceConfig::default();
        config.event_loops = 2;
        config.events_per_socket = 4;
        assert_eq!(config.schreib_registrierungen(), 2);
        config.events_per_socket = 0;
        assert_eq!(config.schreib_registrierungen(), 1);
    }
}
