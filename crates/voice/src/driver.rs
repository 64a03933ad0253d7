//! Periodischer Treiber des Voice-Servers
//!
//! Ein tokio-Task ruft im festen Takt Resends, den Handshake-Sweep und die
//! Session-Ticks auf. Die Netzwerk-Eventloops selbst brauchen keinen Takt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tsvoice_core::Clock;

use crate::server::VoiceServer;

/// Wird nach jedem Tick aufgerufen (z.B. zum Aktualisieren von Metriken)
pub type TickBeobachter = Box<dyn Fn(&VoiceServer) + Send + Sync>;

/// Ergebnis eines einzelnen Ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickBericht {
    pub kandidaten_entfernt: usize,
    pub sessions_entfernt: usize,
}

/// Fuehrt einen Tick synchron aus
pub fn tick_ausfuehren(server: &VoiceServer, clock: &dyn Clock) -> TickBericht {
    let jetzt = clock.now();
    server.execute_resend(jetzt);
    let kandidaten_entfernt = server.tick_handshaking_clients();
    let sessions_entfernt = server.tick_connections(jetzt);
    TickBericht {
        kandidaten_entfernt,
        sessions_entfernt,
    }
}

/// Laufender Treiber-Task
pub struct VoiceDriver {
    stopp: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl VoiceDriver {
    /// Startet den Treiber auf der aktuellen tokio-Runtime
    pub fn starten(
        server: Arc<VoiceServer>,
        clock: Arc<dyn Clock>,
        intervall: Duration,
        beobachter: Option<TickBeobachter>,
    ) -> Self {
        let (stopp, mut stopp_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut takt = tokio::time::interval(intervall);
            takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(intervall_ms = intervall.as_millis() as u64, "Voice-Treiber gestartet");

            loop {
                tokio::select! {
                    _ = takt.tick() => {
                        let bericht = tick_ausfuehren(&server, clock.as_ref());
                        if bericht.sessions_entfernt > 0 || bericht.kandidaten_entfernt > 0 {
                            tracing::trace!(
                                sessions = bericht.sessions_entfernt,
                                kandidaten = bericht.kandidaten_entfernt,
                                "Abgelaufene Eintraege entfernt"
                            );
                        }
                        if let Some(beobachter) = &beobachter {
                            beobachter(&server);
                        }
                    }
                    ergebnis = stopp_rx.changed() => {
                        if ergebnis.is_err() || *stopp_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Voice-Treiber beendet");
        });

        Self { stopp, task }
    }

    /// Stoppt den Treiber und wartet auf das Ende des Tasks
    pub async fn stoppen(self) {
        let _ = self.stopp.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(fehler = %e, "Voice-Treiber ist abgestuerzt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ProtokollCommandHandler;
    use crate::config::VoiceConfig;
    use crate::crypt::KeinCrypt;
    use crate::event_loop::NetworkEventLoop;
    use crate::puzzle::PuzzlePool;
    use crate::server::ServerBausteine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsvoice_core::{ConnectionState, ManualClock};

    fn server(clock: &ManualClock) -> (Arc<VoiceServer>, Arc<NetworkEventLoop>) {
        let event_loop = NetworkEventLoop::starten(1).unwrap();
        let server = VoiceServer::neu(
            VoiceConfig::default(),
            Arc::new(PuzzlePool::neu(8, 1)),
            Arc::clone(&event_loop),
            ServerBausteine {
                crypt: Arc::new(KeinCrypt),
                kommandos: Arc::new(ProtokollCommandHandler),
                clock: Arc::new(clock.clone()),
                wiedergabe: None,
            },
        );
        (server, event_loop)
    }

    #[test]
    fn tick_entfernt_abgelaufene_sessions() {
        let clock = ManualClock::neu();
        let (server, _event_loop) = server(&clock);
        server
            .socket_hinzufuegen(Arc::new(crate::socket::tests::FakeIo::default()))
            .unwrap();
        let verbindung = server
            .register_verified_client(0, "192.0.2.1:1000".parse().unwrap(), 1)
            .unwrap()
            .unwrap();

        clock.vorstellen(Duration::from_secs(6));
        let bericht = tick_ausfuehren(&server, &clock);
        assert_eq!(bericht.sessions_entfernt, 1);
        assert_eq!(verbindung.state(), ConnectionState::Disconnected);
        assert_eq!(server.sessions_anzahl(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn treiber_tickt_bis_zum_stopp() {
        let clock = ManualClock::neu();
        let (server, _event_loop) = server(&clock);
        let ticks = Arc::new(AtomicUsize::new(0));
        let zaehler = Arc::clone(&ticks);

        let treiber = VoiceDriver::starten(
            server,
            Arc::new(clock.clone()),
            Duration::from_millis(500),
            Some(Box::new(move |_: &VoiceServer| {
                zaehler.fetch_add(1, Ordering::SeqCst);
            })),
        );

        tokio::time::sleep(Duration::from_millis(1600)).await;
        treiber.stoppen().await;
        let anzahl = ticks.load(Ordering::SeqCst);
        assert!((3..=5).contains(&anzahl), "ticks: {anzahl}");
    }
}
