//! Session-Registry und Paketverteilung
//!
//! [`VoiceServer`] nimmt die gelesenen Datagramme aller Sockets entgegen:
//! Handshake-Pakete gehen an den [`AdmissionHandshake`], alles andere an
//! die zugehoerige [`VoiceConnection`]. Er setzt ausserdem die
//! Wiederverbindungs-Regeln und den Adresswechsel (NAT-Rebinding) um.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use tsvoice_audio::{DecodeEventLoop, DecoderFactory, PlaybackConfig, PlaybackSequencer};
use tsvoice_core::{ClientId, Clock, ConnectionState};
use tsvoice_protocol::{ClientPacket, PacketFlags, PacketType, INIT_MAGIC};

use crate::command::{CommandHandler, Kommando};
use crate::config::VoiceConfig;
use crate::connection::{SessionKontext, VoiceConnection};
use crate::crypt::CryptHandler;
use crate::error::{VoiceError, VoiceResult};
use crate::event_loop::NetworkEventLoop;
use crate::handshake::{AdmissionHandshake, HandshakeConfig, SessionPromoter};
use crate::puzzle::PuzzlePool;
use crate::socket::{DatagramDispatcher, DatagramIo, UdpDatagramIo, VoiceServerSocket};
use crate::statistics::TransportStatistik;

/// Eine verbundene Session mit juengerer Aktivitaet wird nicht ersetzt
const WIEDERVERBINDUNGS_SPERRE: Duration = Duration::from_secs(5);

/// Serverseitige Wiedergabe der empfangenen Voice-Pakete
pub struct Wiedergabe {
    pub config: PlaybackConfig,
    pub factory: Arc<dyn DecoderFactory>,
    pub decode: Arc<DecodeEventLoop>,
}

/// Austauschbare Bausteine des Servers
pub struct ServerBausteine {
    pub crypt: Arc<dyn CryptHandler>,
    pub kommandos: Arc<dyn CommandHandler>,
    pub clock: Arc<dyn Clock>,
    pub wiedergabe: Option<Wiedergabe>,
}

/// Registry aller Sessions eines Voice-Servers
pub struct VoiceServer {
    selbst: Weak<VoiceServer>,
    config: VoiceConfig,
    sessions: DashMap<ClientId, Arc<VoiceConnection>>,
    /// Sessions pro Adresse, die neueste zuletzt
    adressen: DashMap<SocketAddr, Vec<ClientId>>,
    sockets: Mutex<Vec<Arc<VoiceServerSocket>>>,
    handshake: AdmissionHandshake,
    /// Serialisiert die Aufnahme neuer Sessions
    aufnahme: Mutex<u16>,
    event_loop: Arc<NetworkEventLoop>,
    wiedergabe: Option<Wiedergabe>,
    crypt: Arc<dyn CryptHandler>,
    kommandos: Arc<dyn CommandHandler>,
    clock: Arc<dyn Clock>,
    statistik: Arc<TransportStatistik>,
}

impl VoiceServer {
    pub fn neu(
        config: VoiceConfig,
        pool: Arc<PuzzlePool>,
        event_loop: Arc<NetworkEventLoop>,
        bausteine: ServerBausteine,
    ) -> Arc<Self> {
        let statistik = Arc::new(TransportStatistik::neu());
        let handshake = AdmissionHandshake::neu(
            pool,
            HandshakeConfig {
                cookie_pflicht: config.cookie_pflicht,
                timeout: config.handshake_timeout,
            },
            Arc::clone(&bausteine.clock),
            Arc::clone(&statistik),
        );

        Arc::new_cyclic(|selbst| Self {
            selbst: selbst.clone(),
            config,
            sessions: DashMap::new(),
            adressen: DashMap::new(),
            sockets: Mutex::new(Vec::new()),
            handshake,
            aufnahme: Mutex::new(1),
            event_loop,
            wiedergabe: bausteine.wiedergabe,
            crypt: bausteine.crypt,
            kommandos: bausteine.kommandos,
            clock: bausteine.clock,
            statistik,
        })
    }

    /// Bindet einen UDP-Socket und registriert ihn auf den Eventloops
    pub fn binden(&self, adresse: SocketAddr) -> VoiceResult<SocketAddr> {
        let io = Arc::new(UdpDatagramIo::binden(adresse)?);
        let socket = self.socket_hinzufuegen(io)?;
        info!(adresse = %socket.lokale_adresse(), "Voice-Socket gebunden");
        Ok(socket.lokale_adresse())
    }

    /// Nimmt einen beliebigen Datagramm-Socket auf
    pub fn socket_hinzufuegen(&self, io: Arc<dyn DatagramIo>) -> VoiceResult<Arc<VoiceServerSocket>> {
        let dispatcher: Weak<dyn DatagramDispatcher> = self.selbst.clone();
        let mut sockets = self.sockets.lock();
        let socket = VoiceServerSocket::neu(
            sockets.len(),
            io,
            dispatcher,
            Arc::clone(&self.clock),
            self.config.io_budget,
            Arc::clone(&self.statistik),
        )?;
        socket.aktivieren(&self.event_loop, self.config.schreib_registrierungen())?;
        sockets.push(Arc::clone(&socket));
        Ok(socket)
    }

    // -----------------------------------------------------------------------
    // Zugriff
    // -----------------------------------------------------------------------

    pub fn statistik(&self) -> &Arc<TransportStatistik> {
        &self.statistik
    }

    pub fn session(&self, client_id: ClientId) -> Option<Arc<VoiceConnection>> {
        self.sessions.get(&client_id).map(|e| Arc::clone(e.value()))
    }

    pub fn sessions(&self) -> Vec<Arc<VoiceConnection>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn sessions_anzahl(&self) -> usize {
        self.sessions.len()
    }

    pub fn handshakes_offen(&self) -> usize {
        self.handshake.anzahl()
    }

    pub fn lokale_adressen(&self) -> Vec<SocketAddr> {
        self.sockets.lock().iter().map(|s| s.lokale_adresse()).collect()
    }

    /// Aktuelle RTO-Werte aller Sessions (ms)
    pub fn rto_werte(&self) -> Vec<f64> {
        self.sessions.iter().map(|e| e.value().rto()).collect()
    }

    // -----------------------------------------------------------------------
    // Verteilung
    // -----------------------------------------------------------------------

    fn session_finden(&self, client_id: u16, adresse: SocketAddr) -> Option<Arc<VoiceConnection>> {
        if client_id > 0 {
            return self.session(ClientId(client_id));
        }
        let id = *self.adressen.get(&adresse)?.last()?;
        self.session(id)
    }

    /// Bindet eine Session nach verifiziertem Paket an eine neue Adresse
    fn adresse_migrieren(&self, verbindung: &Arc<VoiceConnection>, paket: &ClientPacket<'_>, neu: SocketAddr) -> bool {
        if paket.hat_flag(PacketFlags::UNENCRYPTED) {
            trace!(client = %verbindung.client_id(), adresse = %neu, "Unverschluesseltes Paket von fremder Adresse");
            return false;
        }
        if verbindung.state() != ConnectionState::Connected || !self.crypt.verify(paket) {
            trace!(client = %verbindung.client_id(), adresse = %neu, "Adresswechsel nicht verifiziert");
            return false;
        }

        let Some(alt) = verbindung.adresse_wechseln(neu) else {
            return true;
        };

        let id = verbindung.client_id();
        if let Some(mut ids) = self.adressen.get_mut(&alt) {
            ids.retain(|i| *i != id);
        }
        self.adressen.remove_if(&alt, |_, ids| ids.is_empty());
        self.adressen.entry(neu).or_default().push(id);

        TransportStatistik::erhoehen(&self.statistik.adresswechsel, 1);
        info!(client = %id, alt = %alt, neu = %neu, "Adresswechsel der Session");

        let meldung = format!("dummy_ipchange old_ip={} new_ip={}", alt.ip(), neu.ip());
        verbindung.kommando_zustellen(Kommando::neu(PacketType::Command, 0, Bytes::from(meldung)));
        true
    }

    // -----------------------------------------------------------------------
    // Aufnahme
    // -----------------------------------------------------------------------

    fn freie_client_id(&self, naechste: &mut u16) -> Option<ClientId> {
        for _ in 0..=u16::MAX {
            let kandidat = *naechste;
            *naechste = naechste.wrapping_add(1);
            if kandidat == 0 || self.sessions.contains_key(&ClientId(kandidat)) {
                continue;
            }
            return Some(ClientId(kandidat));
        }
        None
    }

    /// Sucht oder erstellt die Session fuer einen verifizierten Client
    pub fn register_verified_client(
        &self,
        socket_id: usize,
        adresse: SocketAddr,
        client_version: u32,
    ) -> VoiceResult<Option<Arc<VoiceConnection>>> {
        let mut naechste = self.aufnahme.lock();
        let jetzt = self.clock.now();

        let bekannte = self
            .adressen
            .get(&adresse)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for id in bekannte {
            let Some(bestehend) = self.session(id) else {
                continue;
            };
            match bestehend.state() {
                ConnectionState::Disconnecting | ConnectionState::Disconnected => continue,
                ConnectionState::InitLow | ConnectionState::InitHigh => {
                    debug!(client = %id, adresse = %adresse, "Session im Init wiederverwendet");
                    return Ok(Some(bestehend));
                }
                ConnectionState::Connected => {
                    let stumm = jetzt.saturating_duration_since(bestehend.letztes_lebenszeichen());
                    if stumm < WIEDERVERBINDUNGS_SPERRE {
                        debug!(client = %id, adresse = %adresse, "Verbundene Session noch aktiv, Aufnahme abgelehnt");
                        return Ok(None);
                    }
                    if !self.config.session_reinitialisierung {
                        debug!(client = %id, adresse = %adresse, "Reinitialisierung deaktiviert, Aufnahme abgelehnt");
                        return Ok(None);
                    }
                    info!(client = %id, adresse = %adresse, "Stumme Session wird ersetzt");
                    bestehend.close_connection(false);
                }
            }
        }

        let socket = self
            .sockets
            .lock()
            .get(socket_id)
            .cloned()
            .ok_or_else(|| VoiceError::Konfiguration(format!("Unbekannter Socket {socket_id}")))?;
        let client_id = self.freie_client_id(&mut naechste).ok_or(VoiceError::ServerVoll)?;

        let (sequencer, decode) = match &self.wiedergabe {
            Some(w) if w.config.aktiviert => (
                Some(Arc::new(PlaybackSequencer::new(
                    &w.config,
                    Arc::clone(&w.factory),
                    Arc::clone(&self.clock),
                ))),
                Some(Arc::clone(&w.decode)),
            ),
            _ => (None, None),
        };

        let verbindung = VoiceConnection::neu(
            client_id,
            adresse,
            client_version,
            &self.config,
            SessionKontext {
                socket,
                crypt: Arc::clone(&self.crypt),
                kommandos: Arc::clone(&self.kommandos),
                clock: Arc::clone(&self.clock),
                statistik: Arc::clone(&self.statistik),
                sequencer,
                decode,
            },
        );
        self.sessions.insert(client_id, Arc::clone(&verbindung));
        self.adressen.entry(adresse).or_default().push(client_id);
        info!(client = %client_id, adresse = %adresse, version = client_version, "Neue Session");
        Ok(Some(verbindung))
    }

    // -----------------------------------------------------------------------
    // Periodisch
    // -----------------------------------------------------------------------

    /// Resends aller Sessions; gibt den fruehesten naechsten Termin zurueck
    pub fn execute_resend(&self, jetzt: Instant) -> Option<Instant> {
        self.sessions()
            .iter()
            .filter(|v| v.state() != ConnectionState::Disconnected)
            .filter_map(|v| v.execute_resend(jetzt))
            .min()
    }

    /// Entfernt abgelaufene Handshake-Kandidaten
    pub fn tick_handshaking_clients(&self) -> usize {
        self.handshake.execute_tick()
    }

    /// Tick aller Sessions; getrennte Sessions werden entfernt
    pub fn tick_connections(&self, jetzt: Instant) -> usize {
        let mut entfernt = 0;
        for verbindung in self.sessions() {
            verbindung.tick(jetzt);
            if verbindung.state() == ConnectionState::Disconnected {
                self.session_entfernen(&verbindung);
                entfernt += 1;
            }
        }
        entfernt
    }

    fn session_entfernen(&self, verbindung: &Arc<VoiceConnection>) {
        let id = verbindung.client_id();
        if self.sessions.remove(&id).is_none() {
            return;
        }
        let adresse = verbindung.adresse();
        if let Some(mut ids) = self.adressen.get_mut(&adresse) {
            ids.retain(|i| *i != id);
        }
        self.adressen.remove_if(&adresse, |_, ids| ids.is_empty());
        self.kommandos.client_getrennt(id);
    }

    /// Trennt alle Sessions und meldet die Sockets ab
    pub fn herunterfahren(&self) {
        for verbindung in self.sessions() {
            verbindung.close_connection(false);
            self.session_entfernen(&verbindung);
        }
        for socket in self.sockets.lock().drain(..) {
            socket.deaktivieren();
        }
        info!("Voice-Server heruntergefahren");
    }
}

impl DatagramDispatcher for VoiceServer {
    fn datagramm_verarbeiten(&self, socket: &Arc<VoiceServerSocket>, adresse: SocketAddr, daten: &[u8]) {
        if daten.starts_with(INIT_MAGIC) {
            self.handshake.handle_datagram(socket.as_ref(), adresse, daten, self);
            return;
        }

        let paket = match ClientPacket::parse(daten) {
            Ok(p) => p,
            Err(e) => {
                trace!(adresse = %adresse, fehler = %e, "Ungueltiges Paket verworfen");
                TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
                return;
            }
        };

        let Some(verbindung) = self.session_finden(paket.client_id(), adresse) else {
            trace!(adresse = %adresse, client = paket.client_id(), "Paket ohne Session verworfen");
            TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
            return;
        };
        if verbindung.state() == ConnectionState::Disconnected {
            TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
            return;
        }
        if verbindung.adresse() != adresse && !self.adresse_migrieren(&verbindung, &paket, adresse) {
            TransportStatistik::erhoehen(&self.statistik.datagramme_verworfen, 1);
            return;
        }

        verbindung.handle_packet(&paket);
    }
}

impl SessionPromoter for VoiceServer {
    fn promote(&self, socket_id: usize, adresse: SocketAddr, client_version: u32, kommando: &[u8]) -> bool {
        let verbindung = match self.register_verified_client(socket_id, adresse, client_version) {
            Ok(Some(v)) => v,
            Ok(None) => return false,
            Err(e) => {
                warn!(adresse = %adresse, fehler = %e, "Session konnte nicht angelegt werden");
                return false;
            }
        };
        if !kommando.is_empty() {
            verbindung.kommando_zustellen(Kommando::neu(
                PacketType::Command,
                0,
                Bytes::copy_from_slice(kommando),
            ));
        }
        true
    }
}
