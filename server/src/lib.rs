//! tsvoice-server – Bibliotheks-Root
//!
//! Setzt Eventloops, Puzzle-Pool, Voice-Server, Treiber und
//! Observability zusammen. Der Einstiegspunkt steht in `main.rs`.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::oneshot;

use config::ServerConfig;
use tsvoice_audio::{DecodeEventLoop, StandardDecoderFactory};
use tsvoice_core::{Clock, SystemClock};
use tsvoice_observability::{HealthState, TransportWerte, TsVoiceMetrics};
use tsvoice_voice::driver::TickBeobachter;
use tsvoice_voice::{
    KeinCrypt, NetworkEventLoop, ProtokollCommandHandler, PuzzlePool, ServerBausteine,
    StatistikSnapshot, VoiceDriver, VoiceServer, Wiedergabe,
};

/// Uebersetzt die Transport-Statistik in Metrik-Werte
pub fn transport_werte(snapshot: &StatistikSnapshot) -> TransportWerte {
    TransportWerte {
        datagramme_empfangen: snapshot.datagramme_empfangen,
        datagramme_gesendet: snapshot.datagramme_gesendet,
        datagramme_verworfen: snapshot.datagramme_verworfen,
        handshakes_abgeschlossen: snapshot.handshakes_abgeschlossen,
        handshakes_zurueckgesetzt: snapshot.handshakes_zurueckgesetzt,
        resends: snapshot.resends,
        zustellfehler: snapshot.zustellfehler,
        adresswechsel: snapshot.adresswechsel,
    }
}

/// Aktualisiert Metriken und Health-Zustand nach jedem Treiber-Tick
pub fn tick_beobachter(metriken: TsVoiceMetrics, health: HealthState) -> TickBeobachter {
    Box::new(move |server: &VoiceServer| {
        let sessions = server.sessions_anzahl();
        metriken.transport_aktualisieren(&transport_werte(&server.statistik().snapshot()));
        metriken.belegung_setzen(sessions, server.handshakes_offen());
        for rto in server.rto_werte() {
            metriken.rto_beobachten(rto);
        }
        health.sessions_setzen(sessions);
    })
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Netzwerk-Eventloops starten
    /// 2. Puzzles vorberechnen
    /// 3. Voice-Sockets binden
    /// 4. Treiber und Observability-Server starten
    /// 5. Auf Ctrl-C warten, dann in umgekehrter Reihenfolge stoppen
    pub async fn starten(self) -> Result<()> {
        let voice_config = self.config.voice.voice_config();
        let adressen = self.config.voice_adressen()?;

        tracing::info!(
            server_name = %self.config.server.name,
            udp = %self.config.udp_bind_adresse(),
            event_loops = voice_config.event_loops,
            puzzle_level = voice_config.puzzle_level,
            "Server startet"
        );

        let event_loop = NetworkEventLoop::starten(voice_config.event_loops)?;

        let pool = Arc::new(PuzzlePool::neu(
            voice_config.puzzle_level,
            voice_config.puzzle_pool_groesse,
        ));
        let vorrat = Arc::clone(&pool);
        let erzeugt = tokio::task::spawn_blocking(move || vorrat.vorberechnen()).await?;
        tracing::info!(puzzles = erzeugt, "Puzzle-Pool bereit");

        let playback = self.config.audio.playback_config();
        let wiedergabe = if playback.aktiviert {
            let decode = Arc::new(DecodeEventLoop::starten(playback.decode_threads)?);
            Some(Wiedergabe {
                config: playback,
                factory: Arc::new(StandardDecoderFactory),
                decode,
            })
        } else {
            None
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tick_intervall = voice_config.tick_intervall;
        let server = VoiceServer::neu(
            voice_config,
            pool,
            Arc::clone(&event_loop),
            ServerBausteine {
                crypt: Arc::new(KeinCrypt),
                kommandos: Arc::new(ProtokollCommandHandler),
                clock: Arc::clone(&clock),
                wiedergabe,
            },
        );

        for adresse in adressen {
            let gebunden = server.binden(adresse)?;
            tracing::info!(adresse = %gebunden, "UDP-Socket bereit");
        }

        let metriken = TsVoiceMetrics::neu()?;
        let health = HealthState::neu();
        let treiber = VoiceDriver::starten(
            Arc::clone(&server),
            clock,
            tick_intervall,
            Some(tick_beobachter(metriken.clone(), health.clone())),
        );

        let (obs_stopp, obs_stopp_rx) = oneshot::channel::<()>();
        let observability = if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let metriken = metriken.clone();
            let health = health.clone();
            Some(tokio::spawn(async move {
                let stopp = async move {
                    let _ = obs_stopp_rx.await;
                };
                if let Err(e) = tsvoice_observability::observability_server_starten(
                    adresse, metriken, health, stopp,
                )
                .await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }))
        } else {
            None
        };

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        health.transport_status_setzen(false);
        treiber.stoppen().await;
        server.herunterfahren();
        event_loop.stoppen();

        let _ = obs_stopp.send(());
        if let Some(task) = observability {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Observability-Task ist abgestuerzt");
            }
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsvoice_voice::VoiceConfig;

    #[test]
    fn transport_werte_uebernehmen_snapshot() {
        let snapshot = StatistikSnapshot {
            datagramme_empfangen: 7,
            resends: 2,
            adresswechsel: 1,
            ..Default::default()
        };
        let werte = transport_werte(&snapshot);
        assert_eq!(werte.datagramme_empfangen, 7);
        assert_eq!(werte.resends, 2);
        assert_eq!(werte.adresswechsel, 1);
        assert_eq!(werte.zustellfehler, 0);
    }

    #[test]
    fn beobachter_aktualisiert_metriken_und_health() {
        let event_loop = NetworkEventLoop::starten(1).unwrap();
        let server = VoiceServer::neu(
            VoiceConfig::default(),
            Arc::new(PuzzlePool::neu(8, 1)),
            Arc::clone(&event_loop),
            ServerBausteine {
                crypt: Arc::new(KeinCrypt),
                kommandos: Arc::new(ProtokollCommandHandler),
                clock: Arc::new(SystemClock),
                wiedergabe: None,
            },
        );
        let adresse = server.binden("127.0.0.1:0".parse().unwrap()).unwrap();
        server.register_verified_client(0, "127.0.0.1:40000".parse().unwrap(), 1).unwrap();

        let metriken = TsVoiceMetrics::neu().unwrap();
        let health = HealthState::neu();
        let beobachter = tick_beobachter(metriken.clone(), health.clone());
        beobachter(&server);

        assert_ne!(adresse.port(), 0);
        assert_eq!(metriken.sessions.get(), 1);
        assert_eq!(health.sessions(), 1);
        assert_eq!(metriken.rto_milliseconds.get_sample_count(), 1);

        server.herunterfahren();
        event_loop.stoppen();
    }
}
