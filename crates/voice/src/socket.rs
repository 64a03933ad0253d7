//! UDP-Sockets des Voice-Servers
//!
//! Ein [`VoiceServerSocket`] wird einmal zum Lesen und mehrfach zum
//! Schreiben auf den Netzwerk-Eventloops registriert. Lese- und
//! Schreib-Handler arbeiten mit festem Zeitbudget und melden
//! [`Rearm::Pending`], wenn Arbeit uebrig bleibt.
//!
//! Schreibdaten kommen aus zwei Warteschlangen unter einer Sperre:
//! rohe Datagramme (Handshake-Antworten) und Sessions, die selbst einen
//! Sendepuffer fuehren und Frame fuer Frame abgefragt werden.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use tsvoice_core::Clock;

use crate::error::VoiceResult;
use crate::event_loop::{EventHandler, EventRegistration, NetworkEventLoop, Rearm, Richtung};
use crate::handshake::DatagramSink;
use crate::statistics::TransportStatistik;

/// Groesse des Empfangspuffers; ein volles Datagramm gilt als abgeschnitten
pub const EMPFANGS_PUFFER: usize = 1600;

/// Kuerzere Datagramme werden ignoriert
pub const MIN_DATAGRAMM: usize = 8;

/// Abstand zwischen zwei Meldungen ueber abgeschnittene Datagramme
const KUERZUNGS_MELDUNG: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Schnittstellen
// ---------------------------------------------------------------------------

/// Nicht-blockierender Datagramm-Socket
pub trait DatagramIo: Send + Sync {
    fn recv_from(&self, puffer: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, daten: &[u8], ziel: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Eigener Deskriptor fuer eine weitere Poll-Registrierung
    ///
    /// `None` heisst: nicht pollbar, Handler laufen nur auf Anforderung.
    fn duplizieren(&self) -> io::Result<Option<OwnedFd>>;
}

/// Empfaenger gelesener Datagramme
pub trait DatagramDispatcher: Send + Sync {
    fn datagramm_verarbeiten(&self, socket: &Arc<VoiceServerSocket>, adresse: SocketAddr, daten: &[u8]);
}

/// Eine Session mit eigenem Sendepuffer
pub trait WriteSource: Send + Sync {
    /// Naechstes Datagramm und ob danach noch weitere warten
    fn pop_write_buffer(&self) -> (Option<Bytes>, bool);

    /// Legt ein nicht gesendetes Datagramm vorne zurueck
    fn reenqueue_failed_buffer(&self, daten: Bytes);

    fn remote_address(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// UdpDatagramIo
// ---------------------------------------------------------------------------

/// Echter UDP-Socket
#[derive(Debug)]
pub struct UdpDatagramIo {
    socket: UdpSocket,
}

impl UdpDatagramIo {
    /// Bindet einen nicht-blockierenden UDP-Socket
    pub fn binden(adresse: SocketAddr) -> VoiceResult<Self> {
        let socket = Socket::new(Domain::for_address(adresse), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&adresse.into())?;
        Ok(Self {
            socket: socket.into(),
        })
    }
}

impl DatagramIo for UdpDatagramIo {
    fn recv_from(&self, puffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(puffer)
    }

    fn send_to(&self, daten: &[u8], ziel: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(daten, ziel)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn duplizieren(&self) -> io::Result<Option<OwnedFd>> {
        Ok(Some(OwnedFd::from(self.socket.try_clone()?)))
    }
}

// ---------------------------------------------------------------------------
// VoiceServerSocket
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SocketQueues {
    datagramme: VecDeque<(SocketAddr, Bytes)>,
    clients: VecDeque<Weak<dyn WriteSource>>,
}

/// Quelle eines zu sendenden Datagramms
enum Sendeauftrag {
    Roh(SocketAddr, Bytes),
    Client(Arc<dyn WriteSource>),
}

/// Warum ein Schreibdurchlauf endete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schreibende {
    Budget,
    Leer,
    Blockiert,
}

/// Ein gebundener Server-Socket
pub struct VoiceServerSocket {
    id: usize,
    io: Arc<dyn DatagramIo>,
    lokale_adresse: SocketAddr,
    queues: Mutex<SocketQueues>,
    dispatcher: Weak<dyn DatagramDispatcher>,
    clock: Arc<dyn Clock>,
    budget: Duration,
    lese_registrierung: Mutex<Option<EventRegistration>>,
    schreib_registrierungen: Mutex<Vec<EventRegistration>>,
    schreib_index: AtomicUsize,
    /// Gesetzt, solange ein Eventloop die Warteschlangen leert
    schreibt: AtomicBool,
    letzte_kuerzung: Mutex<Option<Instant>>,
    statistik: Arc<TransportStatistik>,
}

impl VoiceServerSocket {
    pub fn neu(
        id: usize,
        io: Arc<dyn DatagramIo>,
        dispatcher: Weak<dyn DatagramDispatcher>,
        clock: Arc<dyn Clock>,
        budget: Duration,
        statistik: Arc<TransportStatistik>,
    ) -> VoiceResult<Arc<Self>> {
        let lokale_adresse = io.local_addr()?;
        Ok(Arc::new(Self {
            id,
            io,
            lokale_adresse,
            queues: Mutex::new(SocketQueues::default()),
            dispatcher,
            clock,
            budget,
            lese_registrierung: Mutex::new(None),
            schreib_registrierungen: Mutex::new(Vec::new()),
            schreib_index: AtomicUsize::new(0),
            schreibt: AtomicBool::new(false),
            letzte_kuerzung: Mutex::new(None),
            statistik,
        }))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokale_adresse
    }

    /// Registriert Lese- und Schreib-Handler auf dem Eventloop-Pool
    pub fn aktivieren(self: &Arc<Self>, event_loop: &NetworkEventLoop, schreib_anzahl: usize) -> VoiceResult<()> {
        let handler: Arc<dyn EventHandler> = Arc::new(SocketHandler {
            socket: Arc::downgrade(self),
        });

        let mut schreiben = Vec::new();
        for schleife in event_loop.loops_waehlen(schreib_anzahl) {
            schreiben.push(schleife.registrieren(
                self.io.duplizieren()?,
                Richtung::Schreiben,
                Arc::clone(&handler),
            )?);
        }

        let mut lesen = None;
        if let Some(schleife) = event_loop.loops_waehlen(1).into_iter().next() {
            lesen = Some(schleife.registrieren(self.io.duplizieren()?, Richtung::Lesen, handler)?);
        }

        debug!(
            socket = self.id,
            adresse = %self.lokale_adresse,
            lesen = ?lesen.as_ref().map(EventRegistration::loop_index),
            schreiben = schreiben.len(),
            "Socket registriert"
        );
        *self.schreib_registrierungen.lock() = schreiben;
        *self.lese_registrierung.lock() = lesen;
        Ok(())
    }

    /// Meldet alle Handler ab
    pub fn deaktivieren(&self) {
        self.lese_registrierung.lock().take();
        self.schreib_registrierungen.lock().clear();
    }

    /// Reiht ein rohes Datagramm ein
    pub fn enqueue_datagram(&self, ziel: SocketAddr, daten: Bytes) {
        self.queues.lock().datagramme.push_back((ziel, daten));
        self.schreiben_planen();
    }

    /// Meldet eine Session mit neuen Sendedaten an
    pub fn enqueue_client_write(&self, client: Weak<dyn WriteSource>) {
        self.queues.lock().clients.push_back(client);
        self.schreiben_planen();
    }

    /// Stoesst eine Schreib-Registrierung reihum an
    fn schreiben_planen(&self) {
        let registrierungen = self.schreib_registrierungen.lock();
        if registrierungen.is_empty() {
            return;
        }
        let index = self.schreib_index.fetch_add(1, Ordering::Relaxed) % registrierungen.len();
        registrierungen[index].planen();
    }

    /// Anzahl wartender roher Datagramme und Sessions
    pub fn warteschlange(&self) -> (usize, usize) {
        let queues = self.queues.lock();
        (queues.datagramme.len(), queues.clients.len())
    }

    // -----------------------------------------------------------------------
    // Lesen
    // -----------------------------------------------------------------------

    /// Liest bis `WouldBlock` oder bis das Zeitbudget erschoepft ist
    pub fn lesen(self: &Arc<Self>) -> Rearm {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Rearm::Idle;
        };

        let start = self.clock.now();
        let mut puffer = [0u8; EMPFANGS_PUFFER];
        loop {
            if self.clock.now().saturating_duration_since(start) >= self.budget {
                trace!(socket = self.id, "Lesebudget erschoepft");
                return Rearm::Pending;
            }

            match self.io.recv_from(&mut puffer) {
                Ok((laenge, adresse)) => {
                    TransportStatistik::erhoehen(&self.statistik.datagramme_empfangen, 1);
                    if laenge >= EMPFANGS_PUFFER {
                        self.kuerzung_melden(adresse);
                        TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
                        continue;
                    }
                    if laenge < MIN_DATAGRAMM {
                        TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
                        continue;
                    }
                    dispatcher.datagramm_verarbeiten(self, adresse, &puffer[..laenge]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Rearm::Idle,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(socket = self.id, fehler = %e, "Empfangsfehler");
                }
            }
        }
    }

    fn kuerzung_melden(&self, adresse: SocketAddr) {
        let jetzt = self.clock.now();
        let mut letzte = self.letzte_kuerzung.lock();
        let faellig = letzte.map_or(true, |t| jetzt.saturating_duration_since(t) >= KUERZUNGS_MELDUNG);
        if faellig {
            *letzte = Some(jetzt);
            warn!(socket = self.id, adresse = %adresse, groesse = EMPFANGS_PUFFER, "Abgeschnittenes Datagramm verworfen");
        }
    }

    // -----------------------------------------------------------------------
    // Schreiben
    // -----------------------------------------------------------------------

    fn naechster_auftrag(&self) -> Option<Sendeauftrag> {
        let mut queues = self.queues.lock();
        if let Some((ziel, daten)) = queues.datagramme.pop_front() {
            return Some(Sendeauftrag::Roh(ziel, daten));
        }
        while let Some(client) = queues.clients.pop_front() {
            if let Some(client) = client.upgrade() {
                return Some(Sendeauftrag::Client(client));
            }
        }
        None
    }

    /// Leert die Warteschlangen bis `WouldBlock` oder Budgetende
    ///
    /// Es leert immer nur ein Eventloop zur Zeit; weitere Aufrufe kehren
    /// sofort mit [`Rearm::Idle`] zurueck.
    pub fn schreiben(&self) -> Rearm {
        if self
            .schreibt
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(socket = self.id, "Schreiben laeuft bereits auf anderem Eventloop");
            return Rearm::Idle;
        }

        let ende = self.leeren();
        self.schreibt.store(false, Ordering::Release);

        match ende {
            Schreibende::Budget => Rearm::Pending,
            Schreibende::Blockiert => Rearm::Idle,
            Schreibende::Leer => {
                // Zwischen letztem Abholen und Freigabe Eingereihtes
                if self.warteschlange() != (0, 0) {
                    self.schreiben_planen();
                }
                Rearm::Idle
            }
        }
    }

    fn leeren(&self) -> Schreibende {
        let start = self.clock.now();
        loop {
            if self.clock.now().saturating_duration_since(start) >= self.budget {
                trace!(socket = self.id, "Schreibbudget erschoepft");
                return Schreibende::Budget;
            }

            match self.naechster_auftrag() {
                None => return Schreibende::Leer,
                Some(Sendeauftrag::Roh(ziel, daten)) => {
                    if self.senden(ziel, &daten) == SendeErgebnis::Blockiert {
                        self.queues.lock().datagramme.push_front((ziel, daten));
                        return Schreibende::Blockiert;
                    }
                }
                Some(Sendeauftrag::Client(client)) => {
                    let (daten, mehr) = client.pop_write_buffer();
                    let Some(daten) = daten else {
                        continue;
                    };
                    match self.senden(client.remote_address(), &daten) {
                        SendeErgebnis::Blockiert => {
                            client.reenqueue_failed_buffer(daten);
                            self.queues.lock().clients.push_front(Arc::downgrade(&client));
                            return Schreibende::Blockiert;
                        }
                        _ if mehr => {
                            self.queues.lock().clients.push_back(Arc::downgrade(&client));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn senden(&self, ziel: SocketAddr, daten: &[u8]) -> SendeErgebnis {
        match self.io.send_to(daten, ziel) {
            Ok(_) => {
                TransportStatistik::erhoehen(&self.statistik.datagramme_gesendet, 1);
                SendeErgebnis::Gesendet
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendeErgebnis::Blockiert,
            Err(e) => {
                debug!(socket = self.id, ziel = %ziel, fehler = %e, "Senden fehlgeschlagen, Datagramm verworfen");
                TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
                SendeErgebnis::Verworfen
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendeErgebnis {
    Gesendet,
    Blockiert,
    Verworfen,
}

impl DatagramSink for VoiceServerSocket {
    fn send_datagram(&self, ziel: SocketAddr, daten: Bytes) {
        self.enqueue_datagram(ziel, daten);
    }

    fn socket_id(&self) -> usize {
        self.id
    }
}

impl std::fmt::Debug for VoiceServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceServerSocket")
            .field("id", &self.id)
            .field("adresse", &self.lokale_adresse)
            .finish()
    }
}

/// Verbindet die Loop-Rueckrufe mit dem Socket, ohne ihn am Leben zu halten
struct SocketHandler {
    socket: Weak<VoiceServerSocket>,
}

impl EventHandler for SocketHandler {
    fn on_readable(&self) -> Rearm {
        self.socket.upgrade().map_or(Rearm::Idle, |s| s.lesen())
    }

    fn on_writable(&self) -> Rearm {
        self.socket.upgrade().map_or(Rearm::Idle, |s| s.schreiben())
    }
}
