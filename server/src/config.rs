//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist. Zeitangaben stehen in Millisekunden.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tsvoice_audio::PlaybackConfig;
use tsvoice_voice::VoiceConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Voice-Transport (Handshake, Resends, Eventloops)
    pub voice: VoiceEinstellungen,
    /// Serverseitige Wiedergabe
    pub audio: AudioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "tsvoice".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Voice-Port
    pub bind_adresse: String,
    /// Port fuer UDP (Voice-Daten)
    pub udp_port: u16,
    /// Weitere Voice-Sockets als `ip:port`
    pub zusaetzliche_adressen: Vec<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            udp_port: 9987,
            zusaetzliche_adressen: vec![],
        }
    }
}

/// Voice-Transport-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceEinstellungen {
    pub puzzle_level: u32,
    pub puzzle_pool_groesse: usize,
    /// PUZZLE_GET nur nach COOKIE_GET
    pub cookie_pflicht: bool,
    /// Stumme Sessions duerfen durch einen neuen Handshake ersetzt werden
    pub session_reinitialisierung: bool,
    pub handshake_timeout_ms: u64,
    pub init_timeout_ms: u64,
    pub verbindungs_timeout_ms: u64,
    pub ping_intervall_ms: u64,
    pub trennungs_timeout_ms: u64,
    /// Anzahl Netzwerk-Eventloops (0 = Anzahl CPU-Kerne)
    pub event_loops: usize,
    pub events_per_socket: usize,
    /// Zeitbudget pro Lese-/Schreib-Handler in Mikrosekunden
    pub io_budget_us: u64,
    pub min_rto_ms: u64,
    pub max_resends: u32,
    pub resend_aufgabe_ms: u64,
    pub tick_intervall_ms: u64,
}

impl Default for VoiceEinstellungen {
    fn default() -> Self {
        let basis = VoiceConfig::default();
        Self {
            puzzle_level: basis.puzzle_level,
            puzzle_pool_groesse: basis.puzzle_pool_groesse,
            cookie_pflicht: basis.cookie_pflicht,
            session_reinitialisierung: basis.session_reinitialisierung,
            handshake_timeout_ms: basis.handshake_timeout.as_millis() as u64,
            init_timeout_ms: basis.init_timeout.as_millis() as u64,
            verbindungs_timeout_ms: basis.verbindungs_timeout.as_millis() as u64,
            ping_intervall_ms: basis.ping_intervall.as_millis() as u64,
            trennungs_timeout_ms: basis.trennungs_timeout.as_millis() as u64,
            event_loops: basis.event_loops,
            events_per_socket: basis.events_per_socket,
            io_budget_us: basis.io_budget.as_micros() as u64,
            min_rto_ms: basis.min_rto.as_millis() as u64,
            max_resends: basis.max_resends,
            resend_aufgabe_ms: basis.resend_aufgabe.as_millis() as u64,
            tick_intervall_ms: basis.tick_intervall.as_millis() as u64,
        }
    }
}

impl VoiceEinstellungen {
    /// Uebersetzt in die Laufzeit-Konfiguration des Voice-Crates
    pub fn voice_config(&self) -> VoiceConfig {
        let event_loops = if self.event_loops == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.event_loops
        };
        VoiceConfig {
            puzzle_level: self.puzzle_level,
            puzzle_pool_groesse: self.puzzle_pool_groesse.max(1),
            cookie_pflicht: self.cookie_pflicht,
            session_reinitialisierung: self.session_reinitialisierung,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            verbindungs_timeout: Duration::from_millis(self.verbindungs_timeout_ms),
            ping_intervall: Duration::from_millis(self.ping_intervall_ms),
            trennungs_timeout: Duration::from_millis(self.trennungs_timeout_ms),
            event_loops,
            events_per_socket: self.events_per_socket,
            io_budget: Duration::from_micros(self.io_budget_us),
            min_rto: Duration::from_millis(self.min_rto_ms),
            max_resends: self.max_resends,
            resend_aufgabe: Duration::from_millis(self.resend_aufgabe_ms),
            tick_intervall: Duration::from_millis(self.tick_intervall_ms.max(1)),
        }
    }
}

/// Einstellungen der serverseitigen Wiedergabe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Voice-Pakete dekodieren und sequenzieren
    pub aktiviert: bool,
    /// Ausgabe-Abtastrate in Hz
    pub sample_rate: u32,
    /// Ausgabe-Kanaele (1 oder 2)
    pub kanaele: usize,
    /// Puffer-Fuellstand, ab dem die Wiedergabe startet
    pub min_puffer_ms: u32,
    /// Obergrenze des Ausgabepuffers
    pub max_puffer_ms: u32,
    /// Anzahl Decode-Worker
    pub decode_threads: usize,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        let basis = PlaybackConfig::default();
        Self {
            aktiviert: false,
            sample_rate: basis.sample_rate,
            kanaele: basis.channels,
            min_puffer_ms: basis.min_puffer_ms,
            max_puffer_ms: basis.max_puffer_ms,
            decode_threads: basis.decode_threads,
        }
    }
}

impl AudioEinstellungen {
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            aktiviert: self.aktiviert,
            sample_rate: self.sample_rate,
            channels: self.kanaele.clamp(1, 2),
            min_puffer_ms: self.min_puffer_ms,
            max_puffer_ms: self.max_puffer_ms.max(self.min_puffer_ms),
            decode_threads: self.decode_threads.max(1),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive, z.B. "info" oder "tsvoice_voice=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Bind-Adresse (leer = wie `netzwerk.bind_adresse`)
    pub bind_adresse: Option<String>,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: None,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer UDP zurueck
    pub fn udp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.udp_port)
    }

    /// Alle Voice-Adressen: Hauptport plus zusaetzliche Sockets
    pub fn voice_adressen(&self) -> anyhow::Result<Vec<SocketAddr>> {
        std::iter::once(self.udp_bind_adresse())
            .chain(self.netzwerk.zusaetzliche_adressen.iter().cloned())
            .map(|a| {
                a.parse::<SocketAddr>()
                    .map_err(|e| anyhow::anyhow!("Ungueltige Voice-Adresse '{a}': {e}"))
            })
            .collect()
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let host = self
            .observability
            .bind_adresse
            .as_deref()
            .unwrap_or(&self.netzwerk.bind_adresse);
        let adresse = format!("{host}:{}", self.observability.port);
        adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Observability-Adresse '{adresse}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.netzwerk.udp_port, 9987);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.voice.puzzle_level, 1000);
        assert!(!cfg.audio.aktiviert);
        assert!(cfg.observability.aktiviert);
    }

    #[test]
    fn standard_voice_config_entspricht_crate_standard() {
        let cfg = ServerConfig::default();
        let mut erwartet = VoiceConfig::default();
        let voice = cfg.voice.voice_config();
        erwartet.event_loops = voice.event_loops;
        assert_eq!(voice, erwartet);
    }

    #[test]
    fn bind_adressen() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.udp_bind_adresse(), "0.0.0.0:9987");
        assert_eq!(
            cfg.observability_bind_adresse().unwrap(),
            "0.0.0.0:9300".parse().unwrap()
        );
        cfg.observability.bind_adresse = Some("127.0.0.1".into());
        assert_eq!(
            cfg.observability_bind_adresse().unwrap(),
            "127.0.0.1:9300".parse().unwrap()
        );
    }

    #[test]
    fn voice_adressen_mit_zusaetzlichen_sockets() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.zusaetzliche_adressen = vec!["127.0.0.1:9988".into()];
        let adressen = cfg.voice_adressen().unwrap();
        assert_eq!(adressen.len(), 2);
        assert_eq!(adressen[1].port(), 9988);

        cfg.netzwerk.zusaetzliche_adressen = vec!["kein-socket".into()];
        assert!(cfg.voice_adressen().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Mein Server"

            [netzwerk]
            udp_port = 10000

            [voice]
            puzzle_level = 20
            cookie_pflicht = false
            io_budget_us = 1000
            event_loops = 2

            [audio]
            aktiviert = true
            kanaele = 2
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Mein Server");
        assert_eq!(cfg.netzwerk.udp_port, 10000);

        let voice = cfg.voice.voice_config();
        assert_eq!(voice.puzzle_level, 20);
        assert!(!voice.cookie_pflicht);
        assert_eq!(voice.io_budget, Duration::from_millis(1));
        assert_eq!(voice.event_loops, 2);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(voice.max_resends, 15);
        assert!(voice.session_reinitialisierung);

        let playback = cfg.audio.playback_config();
        assert!(playback.aktiviert);
        assert_eq!(playback.channels, 2);
        assert_eq!(playback.sample_rate, 48_000);
    }

    #[test]
    fn event_loops_null_nimmt_kerne() {
        let mut cfg = ServerConfig::default();
        cfg.voice.event_loops = 0;
        assert!(cfg.voice.voice_config().event_loops >= 1);
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/tsvoice.toml").unwrap();
        assert_eq!(cfg.netzwerk.udp_port, 9987);
    }

    #[test]
    fn kaputte_datei_ist_fehler() {
        let pfad = std::env::temp_dir().join(format!("tsvoice-config-{}.toml", std::process::id()));
        std::fs::write(&pfad, "[voice\npuzzle_level = ").unwrap();
        let ergebnis = ServerConfig::laden(pfad.to_str().unwrap());
        let _ = std::fs::remove_file(&pfad);
        assert!(ergebnis.is_err());
    }
}
