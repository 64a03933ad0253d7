//! Netzwerk-Eventloops
//!
//! Ein fester Pool von OS-Threads (`network loop #i`), jeder mit eigenem
//! `mio::Poll` und `Waker`. Sockets registrieren Lese- und
//! Schreib-Handler auf verschiedenen Loops, damit ein ueberlasteter
//! Socket nicht alle anderen blockiert.
//!
//! Readiness ist flankengesteuert. Ein Handler, der sein Zeitbudget
//! ausgeschoepft hat, gibt [`Rearm::Pending`] zurueck und wird in der
//! naechsten Iteration ohne neue Flanke erneut aufgerufen.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::error::{VoiceError, VoiceResult};

const WAKER: Token = Token(usize::MAX);
const EVENT_KAPAZITAET: usize = 256;

/// Soll der Handler ohne neue Flanke erneut laufen?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    Idle,
    Pending,
}

/// Art einer Registrierung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Richtung {
    Lesen,
    Schreiben,
}

impl Richtung {
    fn interest(self) -> Interest {
        match self {
            Richtung::Lesen => Interest::READABLE,
            Richtung::Schreiben => Interest::WRITABLE,
        }
    }
}

/// Rueckrufe eines Loops
pub trait EventHandler: Send + Sync {
    fn on_readable(&self) -> Rearm {
        Rearm::Idle
    }

    fn on_writable(&self) -> Rearm {
        Rearm::Idle
    }
}

// ---------------------------------------------------------------------------
// Einzelner Loop
// ---------------------------------------------------------------------------

struct HandlerEintrag {
    handler: Arc<dyn EventHandler>,
    richtung: Richtung,
}

struct LoopShared {
    index: usize,
    registry: Registry,
    waker: Waker,
    handler: Mutex<HashMap<Token, HandlerEintrag>>,
    /// Manuell angestossene Tokens (z.B. neue Schreibdaten)
    geplant: Mutex<Vec<Token>>,
    naechster_token: AtomicUsize,
    laufend: AtomicBool,
}

impl LoopShared {
    fn aufwecken(&self) {
        if let Err(e) = self.waker.wake() {
            error!(event_loop = self.index, fehler = %e, "Eventloop konnte nicht geweckt werden");
        }
    }

    fn ausfuehren(&self, mut poll: Poll) {
        let mut events = Events::with_capacity(EVENT_KAPAZITAET);
        let mut pending: Vec<Token> = Vec::new();

        while self.laufend.load(Ordering::Acquire) {
            let timeout = if pending.is_empty() { None } else { Some(Duration::ZERO) };
            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(event_loop = self.index, fehler = %e, "Poll fehlgeschlagen, Eventloop endet");
                break;
            }

            let mut faellig = std::mem::take(&mut pending);
            faellig.extend(events.iter().map(|e| e.token()).filter(|t| *t != WAKER));
            faellig.append(&mut self.geplant.lock());
            faellig.sort_unstable_by_key(|t| t.0);
            faellig.dedup();

            for token in faellig {
                let eintrag = self
                    .handler
                    .lock()
                    .get(&token)
                    .map(|e| (Arc::clone(&e.handler), e.richtung));
                let Some((handler, richtung)) = eintrag else {
                    continue;
                };

                let rearm = match richtung {
                    Richtung::Lesen => handler.on_readable(),
                    Richtung::Schreiben => handler.on_writable(),
                };
                if rearm == Rearm::Pending {
                    pending.push(token);
                }
            }
        }
        debug!(event_loop = self.index, "Eventloop beendet");
    }
}

/// Zugriff auf einen einzelnen Loop des Pools
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<LoopShared>,
}

impl EventLoopHandle {
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Registriert einen Handler
    ///
    /// Mit `fd` wird der Deskriptor beim Poll angemeldet; ohne `fd` laeuft
    /// der Handler nur ueber [`EventRegistration::planen`].
    pub fn registrieren(
        &self,
        fd: Option<OwnedFd>,
        richtung: Richtung,
        handler: Arc<dyn EventHandler>,
    ) -> VoiceResult<EventRegistration> {
        let token = Token(self.shared.naechster_token.fetch_add(1, Ordering::Relaxed));
        if let Some(fd) = &fd {
            self.shared
                .registry
                .register(&mut SourceFd(&fd.as_raw_fd()), token, richtung.interest())?;
        }
        self.shared
            .handler
            .lock()
            .insert(token, HandlerEintrag { handler, richtung });
        trace!(event_loop = self.shared.index, token = token.0, richtung = ?richtung, "Handler registriert");

        Ok(EventRegistration {
            shared: Arc::clone(&self.shared),
            token,
            fd,
        })
    }
}

// ---------------------------------------------------------------------------
// EventRegistration
// ---------------------------------------------------------------------------

/// Registrierung eines Handlers; meldet sich beim Drop genau einmal ab
pub struct EventRegistration {
    shared: Arc<LoopShared>,
    token: Token,
    fd: Option<OwnedFd>,
}

impl EventRegistration {
    /// Fuehrt den Handler in der naechsten Iteration des Loops aus
    pub fn planen(&self) {
        self.shared.geplant.lock().push(self.token);
        self.shared.aufwecken();
    }

    pub fn loop_index(&self) -> usize {
        self.shared.index
    }
}

impl std::fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistration")
            .field("event_loop", &self.shared.index)
            .field("token", &self.token.0)
            .finish()
    }
}

impl Drop for EventRegistration {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            if let Err(e) = self.shared.registry.deregister(&mut SourceFd(&fd.as_raw_fd())) {
                debug!(event_loop = self.shared.index, fehler = %e, "Abmelden fehlgeschlagen");
            }
        }
        self.shared.handler.lock().remove(&self.token);
    }
}

// ---------------------------------------------------------------------------
// NetworkEventLoop (Pool)
// ---------------------------------------------------------------------------

/// Pool der Netzwerk-Eventloops
pub struct NetworkEventLoop {
    loops: Vec<Arc<LoopShared>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Zuletzt benutzte Loops stehen hinten
    nutzung: Mutex<VecDeque<usize>>,
}

impl NetworkEventLoop {
    /// Startet `anzahl` Loops (mindestens einen)
    pub fn starten(anzahl: usize) -> VoiceResult<Arc<Self>> {
        let anzahl = anzahl.max(1);
        let mut loops = Vec::with_capacity(anzahl);
        let mut threads = Vec::with_capacity(anzahl);

        for index in 0..anzahl {
            let poll = Poll::new()?;
            let registry = poll.registry().try_clone()?;
            let waker = Waker::new(poll.registry(), WAKER)?;
            let shared = Arc::new(LoopShared {
                index,
                registry,
                waker,
                handler: Mutex::new(HashMap::new()),
                geplant: Mutex::new(Vec::new()),
                naechster_token: AtomicUsize::new(1),
                laufend: AtomicBool::new(true),
            });

            let thread_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("network loop #{index}"))
                .spawn(move || thread_shared.ausfuehren(poll))
                .map_err(|e| VoiceError::event_loop(format!("Thread konnte nicht gestartet werden: {e}")))?;

            loops.push(shared);
            threads.push(handle);
        }

        info!(anzahl, "Netzwerk-Eventloops gestartet");
        Ok(Arc::new(Self {
            loops,
            threads: Mutex::new(threads),
            nutzung: Mutex::new((0..anzahl).collect()),
        }))
    }

    pub fn anzahl(&self) -> usize {
        self.loops.len()
    }

    /// Waehlt `k` verschiedene Loops, am laengsten unbenutzte zuerst
    pub fn loops_waehlen(&self, k: usize) -> Vec<EventLoopHandle> {
        let k = k.clamp(1, self.loops.len());
        let mut nutzung = self.nutzung.lock();
        let mut gewaehlt = Vec::with_capacity(k);
        for _ in 0..k {
            if let Some(index) = nutzung.pop_front() {
                nutzung.push_back(index);
                gewaehlt.push(EventLoopHandle {
                    shared: Arc::clone(&self.loops[index]),
                });
            }
        }
        gewaehlt
    }

    /// Beendet alle Loops und wartet auf ihre Threads
    pub fn stoppen(&self) {
        for shared in &self.loops {
            shared.laufend.store(false, Ordering::Release);
            shared.aufwecken();
        }
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        if threads.is_empty() {
            return;
        }
        for handle in threads {
            if handle.join().is_err() {
                error!("Eventloop-Thread ist abgestuerzt");
            }
        }
        info!("Netzwerk-Eventloops gestoppt");
    }
}

impl Drop for NetworkEventLoop {
    fn drop(&mut self) {
        self.stoppen();
    }
}
