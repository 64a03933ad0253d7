//! Admission-Handshake (`TS3INIT1`)
//!
//! Ein unbekannter Absender wird erst dann zur Session, wenn er ein
//! vorberechnetes Puzzle geloest hat. Pro (Socket, Adresse) existiert
//! hoechstens ein [`PendingClient`]:
//!
//! ```text
//! COOKIE_GET  -> COOKIE_SET  (Cookie + gespiegelte Nonce)
//! PUZZLE_GET  -> PUZZLE_SET  (x, n, level)
//! PUZZLE_SOLVE               (Ergebnis + Init-Kommando) -> Session
//! ```
//!
//! Fehlerhafte Pakete werden ohne Antwort verworfen, Protokollverstoesse
//! mit `COMMAND_RESET` beantwortet. Keine Ausnahme verlaesst dieses Modul.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::{debug, trace};

use tsvoice_core::Clock;
use tsvoice_protocol::init::{self, HandshakeStep, InitRequest, COOKIE_GET_LAENGE, COOKIE_SIZE, PUZZLE_GET_LAENGE, PUZZLE_SOLVE_LAENGE};

use crate::puzzle::{Puzzle, PuzzlePool};
use crate::statistics::TransportStatistik;

/// Wartezeit auf die Sperre eines Kandidaten; danach wird verworfen
const KANDIDATEN_SPERRE: Duration = Duration::from_micros(15);

// ---------------------------------------------------------------------------
// Schnittstellen
// ---------------------------------------------------------------------------

/// Ziel fuer Antworten des Handshakes (der empfangende Socket)
pub trait DatagramSink: Send + Sync {
    /// Reiht ein rohes Datagramm in die Sendewarteschlange ein
    fn send_datagram(&self, ziel: SocketAddr, daten: Bytes);

    /// Kennung des Sockets (Teil des Kandidaten-Schluessels)
    fn socket_id(&self) -> usize;
}

/// Macht aus einem erfolgreichen Handshake eine Session
pub trait SessionPromoter: Send + Sync {
    /// Gibt `false` zurueck wenn die Session abgelehnt wurde
    fn promote(&self, socket_id: usize, adresse: SocketAddr, client_version: u32, kommando: &[u8]) -> bool;
}

/// Ausgang der Verarbeitung eines Handshake-Datagramms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeErgebnis {
    /// Ohne Antwort verworfen
    Verworfen,
    /// Mit dem angegebenen Schritt beantwortet
    Beantwortet(HandshakeStep),
    /// `COMMAND_RESET` gesendet
    Zurueckgesetzt,
    /// Puzzle geloest, Session angelegt oder wiederverwendet
    Abgeschlossen,
    /// Puzzle geloest, Session aber von der Registry abgelehnt
    Abgelehnt,
}

// ---------------------------------------------------------------------------
// PendingClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingZustand {
    schritt: HandshakeStep,
    letzte_aktivitaet: Instant,
    client_version: u32,
    nonce: [u8; 4],
    /// Erstes Byte 0 = noch nicht ausgegeben
    cookie: [u8; COOKIE_SIZE],
    puzzle: Option<Arc<Puzzle>>,
}

/// Kandidat vor der Aufnahme als Session
#[derive(Debug)]
pub struct PendingClient {
    adresse: SocketAddr,
    zustand: Mutex<PendingZustand>,
}

impl PendingClient {
    fn neu(adresse: SocketAddr, jetzt: Instant) -> Self {
        Self {
            adresse,
            zustand: Mutex::new(PendingZustand {
                schritt: HandshakeStep::CookieGet,
                letzte_aktivitaet: jetzt,
                client_version: 0,
                nonce: [0; 4],
                cookie: [0; COOKIE_SIZE],
                puzzle: None,
            }),
        }
    }

    pub fn adresse(&self) -> SocketAddr {
        self.adresse
    }
}

// ---------------------------------------------------------------------------
// AdmissionHandshake
// ---------------------------------------------------------------------------

/// Einstellungen des Handshakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub cookie_pflicht: bool,
    pub timeout: Duration,
}

/// Zustandsautomat aller Handshake-Kandidaten
pub struct AdmissionHandshake {
    kandidaten: Mutex<HashMap<(usize, SocketAddr), Arc<PendingClient>>>,
    pool: Arc<PuzzlePool>,
    config: HandshakeConfig,
    clock: Arc<dyn Clock>,
    statistik: Arc<TransportStatistik>,
}

impl AdmissionHandshake {
    pub fn neu(
        pool: Arc<PuzzlePool>,
        config: HandshakeConfig,
        clock: Arc<dyn Clock>,
        statistik: Arc<TransportStatistik>,
    ) -> Self {
        Self {
            kandidaten: Mutex::new(HashMap::new()),
            pool,
            config,
            clock,
            statistik,
        }
    }

    /// Anzahl offener Kandidaten
    pub fn anzahl(&self) -> usize {
        self.kandidaten.lock().len()
    }

    /// Aktueller Schritt eines Kandidaten (fuer Diagnose und Tests)
    pub fn schritt(&self, socket_id: usize, adresse: SocketAddr) -> Option<HandshakeStep> {
        let kandidat = self.kandidaten.lock().get(&(socket_id, adresse)).cloned()?;
        let zustand = kandidat.zustand.lock();
        Some(zustand.schritt)
    }

    /// Verarbeitet ein Datagramm mit `TS3INIT1`-Magic
    pub fn handle_datagram(
        &self,
        sink: &dyn DatagramSink,
        adresse: SocketAddr,
        datagramm: &[u8],
        promoter: &dyn SessionPromoter,
    ) -> HandshakeErgebnis {
        let anfrage = match InitRequest::parse(datagramm) {
            Ok(a) => a,
            Err(e) => {
                trace!(adresse = %adresse, fehler = %e, "Handshake-Paket zu kurz");
                return HandshakeErgebnis::Verworfen;
            }
        };

        let jetzt = self.clock.now();
        let kandidat = {
            let mut kandidaten = self.kandidaten.lock();
            Arc::clone(
                kandidaten
                    .entry((sink.socket_id(), adresse))
                    .or_insert_with(|| {
                        trace!(adresse = %adresse, "Neuer Handshake-Kandidat");
                        Arc::new(PendingClient::neu(adresse, jetzt))
                    }),
            )
        };

        let Some(mut zustand) = kandidat.zustand.try_lock_for(KANDIDATEN_SPERRE) else {
            trace!(adresse = %adresse, "Kandidat gesperrt, Paket verworfen");
            return HandshakeErgebnis::Verworfen;
        };

        zustand.letzte_aktivitaet = jetzt;
        zustand.client_version = anfrage.client_version();

        let Some(schritt) = HandshakeStep::from_u8(anfrage.schritt_byte()) else {
            trace!(adresse = %adresse, schritt = anfrage.schritt_byte(), "Unbekannter Handshake-Schritt");
            return HandshakeErgebnis::Verworfen;
        };

        if schritt < zustand.schritt {
            trace!(adresse = %adresse, von = ?zustand.schritt, nach = ?schritt, "Handshake springt zurueck");
            zustand.schritt = schritt;
        } else if schritt != zustand.schritt {
            let ohne_cookie = zustand.schritt == HandshakeStep::CookieGet
                && schritt == HandshakeStep::PuzzleGet
                && !self.config.cookie_pflicht;
            if !ohne_cookie {
                debug!(adresse = %adresse, erwartet = ?zustand.schritt, erhalten = ?schritt, "Unerwarteter Handshake-Schritt");
                return self.zuruecksetzen(sink, adresse, &mut zustand);
            }
            zustand.schritt = HandshakeStep::PuzzleGet;
            zustand.cookie[0] = 0;
        }

        match schritt {
            HandshakeStep::CookieGet => self.cookie_get(sink, adresse, &anfrage, &mut zustand),
            HandshakeStep::PuzzleGet => self.puzzle_get(sink, adresse, &anfrage, &mut zustand),
            HandshakeStep::PuzzleSolve => {
                self.puzzle_solve(sink, adresse, &anfrage, &mut zustand, promoter)
            }
            andere => {
                debug!(adresse = %adresse, schritt = ?andere, "Schritt wird nicht vom Client gesendet");
                self.zuruecksetzen(sink, adresse, &mut zustand)
            }
        }
    }

    fn cookie_get(
        &self,
        sink: &dyn DatagramSink,
        adresse: SocketAddr,
        anfrage: &InitRequest<'_>,
        zustand: &mut PendingZustand,
    ) -> HandshakeErgebnis {
        if anfrage.laenge() < COOKIE_GET_LAENGE {
            trace!(adresse = %adresse, laenge = anfrage.laenge(), "COOKIE_GET zu kurz");
            return HandshakeErgebnis::Verworfen;
        }
        let Some(nonce) = anfrage.nonce() else {
            return HandshakeErgebnis::Verworfen;
        };

        if zustand.cookie[0] == 0 {
            rand::thread_rng().fill_bytes(&mut zustand.cookie);
            zustand.cookie[0] |= 0x01;
        }
        zustand.nonce = nonce;

        sink.send_datagram(adresse, Bytes::from(init::cookie_set(&zustand.cookie, nonce)));
        zustand.schritt = HandshakeStep::PuzzleGet;
        HandshakeErgebnis::Beantwortet(HandshakeStep::CookieSet)
    }

    fn puzzle_get(
        &self,
        sink: &dyn DatagramSink,
        adresse: SocketAddr,
        anfrage: &InitRequest<'_>,
        zustand: &mut PendingZustand,
    ) -> HandshakeErgebnis {
        if anfrage.laenge() < PUZZLE_GET_LAENGE {
            trace!(adresse = %adresse, laenge = anfrage.laenge(), "PUZZLE_GET zu kurz");
            return HandshakeErgebnis::Verworfen;
        }

        if zustand.cookie[0] != 0 && anfrage.cookie() != Some(zustand.cookie.as_slice()) {
            debug!(adresse = %adresse, "Cookie stimmt nicht ueberein");
            return self.zuruecksetzen(sink, adresse, zustand);
        }

        let puzzle = Arc::clone(zustand.puzzle.get_or_insert_with(|| self.pool.naechstes()));
        sink.send_datagram(
            adresse,
            Bytes::from(init::puzzle_set(puzzle.x(), puzzle.n(), puzzle.level())),
        );
        zustand.schritt = HandshakeStep::PuzzleSolve;
        HandshakeErgebnis::Beantwortet(HandshakeStep::PuzzleSet)
    }

    fn puzzle_solve(
        &self,
        sink: &dyn DatagramSink,
        adresse: SocketAddr,
        anfrage: &InitRequest<'_>,
        zustand: &mut PendingZustand,
        promoter: &dyn SessionPromoter,
    ) -> HandshakeErgebnis {
        if anfrage.laenge() < PUZZLE_SOLVE_LAENGE {
            trace!(adresse = %adresse, laenge = anfrage.laenge(), "PUZZLE_SOLVE zu kurz");
            return HandshakeErgebnis::Verworfen;
        }

        let Some(puzzle) = zustand.puzzle.clone() else {
            debug!(adresse = %adresse, "Loesung ohne ausgegebenes Puzzle");
            return self.zuruecksetzen(sink, adresse, zustand);
        };

        let ergebnis = anfrage.ergebnis().unwrap_or(&[]);
        if !puzzle.pruefen(ergebnis) {
            if ergebnis.iter().all(|b| *b == 0) {
                puzzle.fehlversuch();
            }
            debug!(adresse = %adresse, fehlversuche = puzzle.fail_count(), "Falsche Puzzle-Loesung");
            zustand.puzzle = None;
            return self.zuruecksetzen(sink, adresse, zustand);
        }

        if !promoter.promote(sink.socket_id(), adresse, zustand.client_version, anfrage.kommando()) {
            debug!(adresse = %adresse, "Session abgelehnt, warte auf neues Paket");
            return HandshakeErgebnis::Abgelehnt;
        }

        zustand.schritt = HandshakeStep::Completed;
        TransportStatistik::erhoehen(&self.statistik.handshakes_abgeschlossen, 1);
        debug!(adresse = %adresse, version = zustand.client_version, "Handshake abgeschlossen");
        HandshakeErgebnis::Abgeschlossen
    }

    fn zuruecksetzen(
        &self,
        sink: &dyn DatagramSink,
        adresse: SocketAddr,
        zustand: &mut PendingZustand,
    ) -> HandshakeErgebnis {
        sink.send_datagram(adresse, Bytes::from(init::command_reset()));
        zustand.schritt = HandshakeStep::CookieGet;
        TransportStatistik::erhoehen(&self.statistik.handshakes_zurueckgesetzt, 1);
        HandshakeErgebnis::Zurueckgesetzt
    }

    /// Entfernt Kandidaten ohne Aktivitaet seit dem Timeout
    ///
    /// Kandidaten, die gerade verarbeitet werden, bleiben bis zum naechsten Lauf.
    pub fn execute_tick(&self) -> usize {
        let jetzt = self.clock.now();
        let timeout = self.config.timeout;
        let mut kandidaten = self.kandidaten.lock();
        let vorher = kandidaten.len();
        kandidaten.retain(|_, kandidat| match kandidat.zustand.try_lock() {
            Some(zustand) => jetzt.saturating_duration_since(zustand.letzte_aktivitaet) < timeout,
            None => true,
        });
        let entfernt = vorher - kandidaten.len();
        if entfernt > 0 {
            trace!(entfernt, offen = kandidaten.len(), "Handshake-Kandidaten abgelaufen");
        }
        entfernt
    }
}
