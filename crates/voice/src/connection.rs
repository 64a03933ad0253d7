//! Voice-Session (`VoiceConnection`)
//!
//! Entsteht nach erfolgreichem Handshake und besitzt alles, was zu einem
//! Client gehoert: Adresse, Paket-ID-Zaehler, Retransmission, Sendepuffer,
//! Ping-Zustand und optional einen [`PlaybackSequencer`] fuer die
//! serverseitige Wiedergabe.
//!
//! Ausgehende Datagramme landen im Sendepuffer der Session; der Socket
//! fragt sie Frame fuer Frame ab ([`WriteSource`]).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use tsvoice_audio::{DecodeEventLoop, PlaybackSequencer};
use tsvoice_core::{ClientId, Clock, ConnectionState};
use tsvoice_protocol::{ClientPacket, OutgoingPacket, PacketFlags, PacketIdGenerator, PacketType, VoicePayload};

use crate::acknowledge::{AcknowledgeConfig, AcknowledgeManager};
use crate::command::{CommandHandler, Kommando};
use crate::config::VoiceConfig;
use crate::crypt::CryptHandler;
use crate::error::{VoiceError, VoiceResult};
use crate::socket::{VoiceServerSocket, WriteSource};
use crate::statistics::TransportStatistik;

/// So viele zuletzt empfangene Kommando-IDs werden pro Typ gemerkt
const KOMMANDO_HISTORIE: usize = 64;

/// Abhaengigkeiten einer neuen Session
pub struct SessionKontext {
    pub socket: Arc<VoiceServerSocket>,
    pub crypt: Arc<dyn CryptHandler>,
    pub kommandos: Arc<dyn CommandHandler>,
    pub clock: Arc<dyn Clock>,
    pub statistik: Arc<TransportStatistik>,
    pub sequencer: Option<Arc<PlaybackSequencer>>,
    pub decode: Option<Arc<DecodeEventLoop>>,
}

#[derive(Debug)]
struct SessionZustand {
    zustand: ConnectionState,
    adresse: SocketAddr,
    letzte_aktivitaet: Instant,
    letztes_kommando: Instant,
    trennung_seit: Option<Instant>,
    letzter_ping: Instant,
    /// Letzte PONG-Antwort des Clients
    letzte_ping_antwort: Instant,
    /// Letztes bestaetigtes Kommando des Servers
    letzte_bestaetigung: Instant,
    offener_ping: Option<(u16, Instant)>,
    ping_rtt: Option<Duration>,
    /// Bereits zugestellte Kommando-IDs (COMMAND, COMMAND_LOW)
    kommando_ids: [VecDeque<u16>; 2],
}

#[derive(Debug, Default)]
struct Sendepuffer {
    daten: VecDeque<Bytes>,
    /// Die Session steht in der Warteschlange des Sockets
    eingereiht: bool,
}

/// Eine aufgenommene Client-Session
pub struct VoiceConnection {
    client_id: ClientId,
    client_version: u32,
    selbst: Weak<VoiceConnection>,
    zustand: Mutex<SessionZustand>,
    ids: Mutex<PacketIdGenerator>,
    acks: Mutex<AcknowledgeManager>,
    sendepuffer: Mutex<Sendepuffer>,
    socket: Arc<VoiceServerSocket>,
    sequencer: Option<Arc<PlaybackSequencer>>,
    decode: Option<Arc<DecodeEventLoop>>,
    crypt: Arc<dyn CryptHandler>,
    kommandos: Arc<dyn CommandHandler>,
    clock: Arc<dyn Clock>,
    statistik: Arc<TransportStatistik>,
    config: VoiceConfig,
}

impl VoiceConnection {
    pub fn neu(
        client_id: ClientId,
        adresse: SocketAddr,
        client_version: u32,
        config: &VoiceConfig,
        kontext: SessionKontext,
    ) -> Arc<Self> {
        let jetzt = kontext.clock.now();
        let acks = AcknowledgeManager::neu(AcknowledgeConfig {
            min_rto: config.min_rto,
            max_resends: config.max_resends,
            aufgabe_nach: config.resend_aufgabe,
        });

        Arc::new_cyclic(|selbst| Self {
            client_id,
            client_version,
            selbst: selbst.clone(),
            zustand: Mutex::new(SessionZustand {
                zustand: ConnectionState::InitLow,
                adresse,
                letzte_aktivitaet: jetzt,
                letztes_kommando: jetzt,
                trennung_seit: None,
                letzter_ping: jetzt,
                letzte_ping_antwort: jetzt,
                letzte_bestaetigung: jetzt,
                offener_ping: None,
                ping_rtt: None,
                kommando_ids: [VecDeque::new(), VecDeque::new()],
            }),
            ids: Mutex::new(PacketIdGenerator::neu()),
            acks: Mutex::new(acks),
            sendepuffer: Mutex::new(Sendepuffer::default()),
            socket: kontext.socket,
            sequencer: kontext.sequencer,
            decode: kontext.decode,
            crypt: kontext.crypt,
            kommandos: kontext.kommandos,
            clock: kontext.clock,
            statistik: kontext.statistik,
            config: config.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Zugriff
    // -----------------------------------------------------------------------

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn client_version(&self) -> u32 {
        self.client_version
    }

    pub fn adresse(&self) -> SocketAddr {
        self.zustand.lock().adresse
    }

    pub fn state(&self) -> ConnectionState {
        self.zustand.lock().zustand
    }

    /// Setzt den Zustand (Init-Ablauf auf Kommando-Ebene)
    pub fn zustand_setzen(&self, neu: ConnectionState) {
        let mut z = self.zustand.lock();
        if z.zustand == neu || !z.zustand.ist_aktiv() {
            return;
        }
        debug!(client = %self.client_id, von = %z.zustand, nach = %neu, "Zustandswechsel");
        z.zustand = neu;
    }

    /// Zeitpunkt des letzten gueltigen Pakets
    pub fn letzte_aktivitaet(&self) -> Instant {
        self.zustand.lock().letzte_aktivitaet
    }

    /// Juengstes Lebenszeichen: letzte PONG-Antwort oder letztes Ack
    ///
    /// Voice- und Kommando-Pakete zaehlen nicht, da sie auch von einer
    /// wiederholten oder uebernommenen Adresse stammen koennen.
    pub fn letztes_lebenszeichen(&self) -> Instant {
        let z = self.zustand.lock();
        z.letzte_ping_antwort.max(z.letzte_bestaetigung)
    }

    pub fn socket(&self) -> &Arc<VoiceServerSocket> {
        &self.socket
    }

    pub fn sequencer(&self) -> Option<&Arc<PlaybackSequencer>> {
        self.sequencer.as_ref()
    }

    /// Aktueller Retransmission-Timeout (ms)
    pub fn rto(&self) -> f64 {
        self.acks.lock().rto()
    }

    /// Anzahl unbestaetigter Pakete
    pub fn ausstehend(&self) -> usize {
        self.acks.lock().ausstehend()
    }

    pub fn ping_rtt(&self) -> Option<Duration> {
        self.zustand.lock().ping_rtt
    }

    /// Wartende Datagramme im Sendepuffer
    pub fn sendepuffer_laenge(&self) -> usize {
        self.sendepuffer.lock().daten.len()
    }

    /// Setzt eine neue Adresse; gibt die alte zurueck, falls sie sich geaendert hat
    pub fn adresse_wechseln(&self, neu: SocketAddr) -> Option<SocketAddr> {
        let mut z = self.zustand.lock();
        if z.adresse == neu {
            return None;
        }
        Some(std::mem::replace(&mut z.adresse, neu))
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    fn paket_senden(&self, packet_type: PacketType, flags: u8, payload: Bytes, bestaetigen: bool) -> u16 {
        let (packet_id, generation) = self.ids.lock().naechste(packet_type);
        let paket = OutgoingPacket {
            packet_type,
            flags,
            packet_id,
            generation,
            payload,
        };
        let daten = paket.encode(self.crypt.mac(&paket.header(), &paket.payload));

        if bestaetigen {
            self.acks.lock().track(&paket, daten.clone(), self.clock.now());
        }
        self.puffer_einreihen(daten);
        packet_id
    }

    fn puffer_einreihen(&self, daten: Bytes) {
        let einreihen = {
            let mut puffer = self.sendepuffer.lock();
            puffer.daten.push_back(daten);
            !std::mem::replace(&mut puffer.eingereiht, true)
        };
        if einreihen {
            let quelle: Weak<dyn WriteSource> = self.selbst.clone();
            self.socket.enqueue_client_write(quelle);
        }
    }

    /// Sendet ein Kommando mit Zustellgarantie
    pub fn send_command(&self, daten: &[u8], low: bool) -> VoiceResult<u16> {
        if !self.state().ist_aktiv() {
            return Err(VoiceError::Getrennt);
        }
        let typ = if low { PacketType::CommandLow } else { PacketType::Command };
        Ok(self.paket_senden(typ, PacketFlags::NEW_PROTOCOL, Bytes::copy_from_slice(daten), true))
    }

    /// Sendet ein Paket ohne Bestaetigung (Voice, Ping)
    pub fn send_packet(&self, packet_type: PacketType, flags: u8, payload: Bytes) -> VoiceResult<u16> {
        if packet_type.braucht_bestaetigung() {
            return Err(VoiceError::KeinAckTyp(packet_type));
        }
        if self.state() == ConnectionState::Disconnected {
            return Err(VoiceError::Getrennt);
        }
        Ok(self.paket_senden(packet_type, flags, payload, false))
    }

    // -----------------------------------------------------------------------
    // Empfangen
    // -----------------------------------------------------------------------

    /// Stellt ein Kommando an den Kommando-Pfad zu
    pub fn kommando_zustellen(self: &Arc<Self>, kommando: Kommando) {
        self.zustand.lock().letztes_kommando = self.clock.now();
        self.kommandos.handle_command(self, kommando);
    }

    /// Verarbeitet ein Paket, das dieser Session zugeordnet wurde
    pub fn handle_packet(self: &Arc<Self>, paket: &ClientPacket<'_>) {
        let jetzt = self.clock.now();
        self.zustand.lock().letzte_aktivitaet = jetzt;

        let typ = paket.packet_type();
        match typ {
            PacketType::Ack | PacketType::AckLow => self.ack_verarbeiten(typ, paket.payload(), jetzt),
            PacketType::Command | PacketType::CommandLow => self.kommando_verarbeiten(paket, jetzt),
            PacketType::Ping => {
                let id = paket.packet_id().to_be_bytes();
                self.paket_senden(
                    PacketType::Pong,
                    PacketFlags::UNENCRYPTED,
                    Bytes::copy_from_slice(&id),
                    false,
                );
            }
            PacketType::Pong => self.pong_verarbeiten(paket.payload(), jetzt),
            PacketType::Voice => self.voice_verarbeiten(paket),
            PacketType::VoiceWhisper => {
                trace!(client = %self.client_id, laenge = paket.payload().len(), "Whisper ignoriert");
            }
            PacketType::Init1 => {
                trace!(client = %self.client_id, "Init-Paket ohne Magic ignoriert");
            }
        }
    }

    fn ack_verarbeiten(&self, typ: PacketType, payload: &[u8], jetzt: Instant) {
        let Some(roh) = payload.get(..2) else {
            trace!(client = %self.client_id, "Ack ohne Paket-ID");
            return;
        };
        let id = u16::from_be_bytes([roh[0], roh[1]]);
        let ergebnis = self.acks.lock().acknowledge(typ, id, jetzt);
        match ergebnis {
            Ok(()) => self.zustand.lock().letzte_bestaetigung = jetzt,
            Err(e) => debug!(client = %self.client_id, fehler = %e, "Unerwartetes Ack"),
        }
    }

    fn kommando_verarbeiten(self: &Arc<Self>, paket: &ClientPacket<'_>, jetzt: Instant) {
        let typ = paket.packet_type();
        let id = paket.packet_id();
        if let Some(ack_typ) = typ.ack_typ() {
            self.paket_senden(ack_typ, 0, Bytes::copy_from_slice(&id.to_be_bytes()), false);
        }

        let neu = {
            let mut z = self.zustand.lock();
            let historie = &mut z.kommando_ids[usize::from(typ == PacketType::CommandLow)];
            if historie.contains(&id) {
                false
            } else {
                historie.push_back(id);
                if historie.len() > KOMMANDO_HISTORIE {
                    historie.pop_front();
                }
                z.letztes_kommando = jetzt;
                true
            }
        };
        if !neu {
            trace!(client = %self.client_id, packet_id = id, "Doppeltes Kommando bestaetigt, nicht zugestellt");
            return;
        }

        let kommando = Kommando::neu(typ, paket.flags(), Bytes::copy_from_slice(paket.payload()));
        self.kommandos.handle_command(self, kommando);
    }

    fn pong_verarbeiten(&self, payload: &[u8], jetzt: Instant) {
        let Some(roh) = payload.get(..2) else {
            return;
        };
        let id = u16::from_be_bytes([roh[0], roh[1]]);
        let mut z = self.zustand.lock();
        z.letzte_ping_antwort = jetzt;
        if let Some((offen, gesendet)) = z.offener_ping {
            if offen == id {
                z.ping_rtt = Some(jetzt.saturating_duration_since(gesendet));
                z.offener_ping = None;
            }
        }
    }

    fn voice_verarbeiten(&self, paket: &ClientPacket<'_>) {
        let Some(sequencer) = &self.sequencer else {
            return;
        };
        let voice = match VoicePayload::parse(paket.payload()) {
            Ok(v) => v,
            Err(e) => {
                trace!(client = %self.client_id, fehler = %e, "Ungueltiges Voice-Paket");
                return;
            }
        };

        // Stream-Anfang: die Reihenfolge beginnt neu
        if paket.hat_flag(PacketFlags::COMPRESSED) && sequencer.state().ist_gestoppt() {
            sequencer.reset_sequence(voice.voice_id.wrapping_sub(1));
        }

        if sequencer.enqueue_audio(voice.voice_id, voice.codec, Bytes::copy_from_slice(voice.daten)) {
            match &self.decode {
                Some(decode) => decode.planen(Arc::clone(sequencer)),
                None => sequencer.execute_pending(),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Periodisch
    // -----------------------------------------------------------------------

    /// Sendet faellige Pakete erneut; nicht zustellbare trennen die Session
    ///
    /// Gibt den naechsten Resend-Termin zurueck.
    pub fn execute_resend(&self, jetzt: Instant) -> Option<Instant> {
        let ohne_termin = jetzt + self.config.resend_aufgabe;
        let mut naechster = ohne_termin;
        let ergebnis = self.acks.lock().execute_resend(jetzt, &mut naechster);

        if !ergebnis.erneut.is_empty() {
            TransportStatistik::erhoehen(&self.statistik.resends, ergebnis.erneut.len() as u64);
            trace!(client = %self.client_id, anzahl = ergebnis.erneut.len(), "Pakete erneut gesendet");
            for daten in ergebnis.erneut {
                self.puffer_einreihen(daten);
            }
        }

        if !ergebnis.fehlgeschlagen.is_empty() {
            TransportStatistik::erhoehen(&self.statistik.zustellfehler, ergebnis.fehlgeschlagen.len() as u64);
            for eintrag in &ergebnis.fehlgeschlagen {
                warn!(
                    client = %self.client_id,
                    typ = ?eintrag.packet_type,
                    packet_id = eintrag.packet_id,
                    versuche = eintrag.send_count,
                    "Paket nicht zustellbar"
                );
            }
            self.close_connection(false);
            return None;
        }

        (naechster < ohne_termin).then_some(naechster)
    }

    /// Pings, Timeouts, Trennungsablauf und Wiedergabe-Tick
    pub fn tick(&self, jetzt: Instant) {
        let ping_faellig = {
            let mut z = self.zustand.lock();
            let aktuell = z.zustand;
            match aktuell {
                ConnectionState::InitLow | ConnectionState::InitHigh => {
                    if jetzt.saturating_duration_since(z.letztes_kommando) > self.config.init_timeout {
                        drop(z);
                        debug!(client = %self.client_id, "Init-Timeout");
                        self.close_connection(false);
                        return;
                    }
                    false
                }
                ConnectionState::Connected => {
                    if jetzt.saturating_duration_since(z.letzte_aktivitaet) > self.config.verbindungs_timeout {
                        drop(z);
                        info!(client = %self.client_id, "Verbindungs-Timeout");
                        self.close_connection(false);
                        return;
                    }
                    if jetzt.saturating_duration_since(z.letzter_ping) >= self.config.ping_intervall {
                        z.letzter_ping = jetzt;
                        true
                    } else {
                        false
                    }
                }
                ConnectionState::Disconnecting => {
                    let abgelaufen = z
                        .trennung_seit
                        .map_or(true, |t| jetzt.saturating_duration_since(t) >= self.config.trennungs_timeout);
                    drop(z);
                    let leer = self.ausstehend() == 0 && self.sendepuffer_laenge() == 0;
                    if leer || abgelaufen {
                        self.close_connection(false);
                    }
                    return;
                }
                ConnectionState::Disconnected => return,
            }
        };

        if ping_faellig {
            let id = self.paket_senden(PacketType::Ping, PacketFlags::UNENCRYPTED, Bytes::new(), false);
            self.zustand.lock().offener_ping = Some((id, jetzt));
        }

        if let Some(sequencer) = &self.sequencer {
            sequencer.execute_tick();
        }
    }

    /// Trennt die Session
    ///
    /// Mit `flush` werden ausstehende Pakete noch bis zum Trennungs-Timeout
    /// gesendet, sonst wird sofort alles verworfen.
    pub fn close_connection(&self, flush: bool) {
        {
            let mut z = self.zustand.lock();
            let aktuell = z.zustand;
            match aktuell {
                ConnectionState::Disconnected => return,
                ConnectionState::Disconnecting if flush => return,
                _ => {}
            }
            if flush {
                z.zustand = ConnectionState::Disconnecting;
                z.trennung_seit = Some(self.clock.now());
                debug!(client = %self.client_id, "Trennung eingeleitet");
                return;
            }
            z.zustand = ConnectionState::Disconnected;
        }

        let verworfen = self.acks.lock().reset().len();
        self.sendepuffer.lock().daten.clear();
        if let Some(sequencer) = &self.sequencer {
            sequencer.cancel_replay();
        }
        info!(client = %self.client_id, adresse = %self.adresse(), verworfen, "Session getrennt");
    }
}

impl WriteSource for VoiceConnection {
    fn pop_write_buffer(&self) -> (Option<Bytes>, bool) {
        let mut puffer = self.sendepuffer.lock();
        let daten = puffer.daten.pop_front();
        let mehr = !puffer.daten.is_empty();
        if !mehr {
            puffer.eingereiht = false;
        }
        (daten, mehr)
    }

    fn reenqueue_failed_buffer(&self, daten: Bytes) {
        let mut puffer = self.sendepuffer.lock();
        puffer.daten.push_front(daten);
        puffer.eingereiht = true;
    }

    fn remote_address(&self) -> SocketAddr {
        self.adresse()
    }
}

impl std::fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConnection")
            .field("client_id", &self.client_id)
            .field("adresse", &self.adresse())
            .field("zustand", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::KeinCrypt;
    use crate::socket::tests::FakeIo;
    use crate::socket::DatagramDispatcher;
    use tsvoice_core::ManualClock;
    use tsvoice_protocol::packet::client_paket_bauen;

    #[derive(Default)]
    struct Protokoll {
        kommandos: Mutex<Vec<Kommando>>,
    }

    impl CommandHandler for Protokoll {
        fn handle_command(&self, _verbindung: &Arc<VoiceConnection>, kommando: Kommando) {
            self.kommandos.lock().push(kommando);
        }
    }

    struct KeinDispatcher;

    impl DatagramDispatcher for KeinDispatcher {
        fn datagramm_verarbeiten(&self, _: &Arc<VoiceServerSocket>, _: SocketAddr, _: &[u8]) {}
    }

    struct Aufbau {
        verbindung: Arc<VoiceConnection>,
        socket: Arc<VoiceServerSocket>,
        io: Arc<FakeIo>,
        protokoll: Arc<Protokoll>,
        clock: ManualClock,
    }

    fn aufbau() -> Aufbau {
        let clock = ManualClock::neu();
        let io = Arc::new(FakeIo::default());
        let dispatcher: Arc<dyn DatagramDispatcher> = Arc::new(KeinDispatcher);
        let socket = VoiceServerSocket::neu(
            0,
            io.clone(),
            Arc::downgrade(&dispatcher),
            Arc::new(clock.clone()),
            Duration::from_millis(5),
            Arc::new(TransportStatistik::neu()),
        )
        .unwrap();
        let protokoll = Arc::new(Protokoll::default());
        let verbindung = VoiceConnection::neu(
            ClientId(1),
            "10.0.0.5:1234".parse().unwrap(),
            7,
            &VoiceConfig::default(),
            SessionKontext {
                socket: socket.clone(),
                crypt: Arc::new(KeinCrypt),
                kommandos: protokoll.clone(),
                clock: Arc::new(clock.clone()),
                statistik: Arc::new(TransportStatistik::neu()),
                sequencer: None,
                decode: None,
            },
        );
        Aufbau {
            verbindung,
            socket,
            io,
            protokoll,
            clock,
        }
    }

    /// Sendet alles aus dem Socket und gibt die Datagramme zurueck
    fn gesendet(a: &Aufbau) -> Vec<Vec<u8>> {
        a.socket.schreiben();
        a.io.gesendet.lock().drain(..).map(|(_, d)| d).collect()
    }

    fn empfangen(a: &Aufbau, typ: PacketType, id: u16, payload: &[u8]) {
        let roh = client_paket_bauen(typ, 0, id, 1, payload);
        let paket = ClientPacket::parse(&roh).unwrap();
        a.verbindung.handle_packet(&paket);
    }

    #[test]
    fn kommando_wird_bestaetigt_und_zugestellt() {
        let a = aufbau();
        empfangen(&a, PacketType::Command, 9, b"clientinitiv alpha=x");

        let raus = gesendet(&a);
        assert_eq!(raus.len(), 1);
        assert_eq!(raus[0][10] & 0x0F, PacketType::Ack as u8);
        assert_eq!(&raus[0][11..], &9u16.to_be_bytes());
        assert_eq!(a.protokoll.kommandos.lock().len(), 1);
        assert_eq!(a.protokoll.kommandos.lock()[0].name(), "clientinitiv");
    }

    #[test]
    fn doppeltes_kommando_nur_einmal_zugestellt() {
        let a = aufbau();
        empfangen(&a, PacketType::CommandLow, 3, b"x");
        empfangen(&a, PacketType::CommandLow, 3, b"x");
        empfangen(&a, PacketType::Command, 3, b"y");

        let raus = gesendet(&a);
        assert_eq!(raus.len(), 3);
        assert_eq!(raus[0][10] & 0x0F, PacketType::AckLow as u8);
        assert_eq!(a.protokoll.kommandos.lock().len(), 2);
    }

    #[test]
    fn ping_wird_mit_pong_beantwortet() {
        let a = aufbau();
        empfangen(&a, PacketType::Ping, 0x0102, b"");
        let raus = gesendet(&a);
        assert_eq!(raus.len(), 1);
        assert_eq!(raus[0][10], PacketType::Pong as u8 | PacketFlags::UNENCRYPTED);
        assert_eq!(&raus[0][11..], &[0x01, 0x02]);
    }

    #[test]
    fn ack_entfernt_ausstehendes_kommando() {
        let a = aufbau();
        let id = a.verbindung.send_command(b"initserver", false).unwrap();
        assert_eq!(a.verbindung.ausstehend(), 1);
        empfangen(&a, PacketType::Ack, 0, &id.to_be_bytes());
        assert_eq!(a.verbindung.ausstehend(), 0);
    }

    #[test]
    fn nur_ack_und_pong_sind_lebenszeichen() {
        let a = aufbau();
        let start = a.clock.ansehen();
        let id = a.verbindung.send_command(b"initserver", false).unwrap();

        a.clock.vorstellen(Duration::from_secs(1));
        empfangen(&a, PacketType::Voice, 0, &[0, 1, 4, 9]);
        empfangen(&a, PacketType::Command, 0, b"clientinit");
        assert_eq!(a.verbindung.letztes_lebenszeichen(), start);

        // Unbekannte Ack-ID zaehlt nicht
        empfangen(&a, PacketType::Ack, 0, &id.wrapping_add(5).to_be_bytes());
        assert_eq!(a.verbindung.letztes_lebenszeichen(), start);

        empfangen(&a, PacketType::Ack, 0, &id.to_be_bytes());
        assert_eq!(a.verbindung.letztes_lebenszeichen(), a.clock.ansehen());

        a.clock.vorstellen(Duration::from_secs(1));
        empfangen(&a, PacketType::Pong, 0, &[0, 0]);
        assert_eq!(a.verbindung.letztes_lebenszeichen(), a.clock.ansehen());
    }

    #[test]
    fn resend_und_aufgabe_trennen_session() {
        let a = aufbau();
        a.verbindung.send_command(b"initserver", false).unwrap();
        assert_eq!(gesendet(&a).len(), 1);

        a.clock.vorstellen(Duration::from_millis(1000));
        let naechster = a.verbindung.execute_resend(a.clock.ansehen());
        assert!(naechster.is_some());
        assert_eq!(gesendet(&a).len(), 1);

        for _ in 0..40 {
            a.clock.vorstellen(Duration::from_millis(1500));
            a.verbindung.execute_resend(a.clock.ansehen());
        }
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnected);
        assert_eq!(a.verbindung.ausstehend(), 0);
    }

    #[test]
    fn init_timeout_trennt() {
        let a = aufbau();
        a.clock.vorstellen(Duration::from_secs(4));
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::InitLow);
        a.clock.vorstellen(Duration::from_secs(2));
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn verbundene_session_pingt_und_misst_rtt() {
        let a = aufbau();
        a.verbindung.zustand_setzen(ConnectionState::Connected);
        a.clock.vorstellen(Duration::from_secs(1));
        a.verbindung.tick(a.clock.ansehen());

        let raus = gesendet(&a);
        assert_eq!(raus.len(), 1);
        assert_eq!(raus[0][10] & 0x0F, PacketType::Ping as u8);
        let ping_id = [raus[0][8], raus[0][9]];

        a.clock.vorstellen(Duration::from_millis(30));
        empfangen(&a, PacketType::Pong, 0, &ping_id);
        assert_eq!(a.verbindung.ping_rtt(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn stumme_verbindung_laeuft_ab() {
        let a = aufbau();
        a.verbindung.zustand_setzen(ConnectionState::Connected);
        a.clock.vorstellen(Duration::from_secs(31));
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn geordnete_trennung_wartet_auf_acks() {
        let a = aufbau();
        a.verbindung.zustand_setzen(ConnectionState::Connected);
        let id = a.verbindung.send_command(b"notifyclientleftview", false).unwrap();
        gesendet(&a);

        a.verbindung.close_connection(true);
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnecting);
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnecting);

        empfangen(&a, PacketType::Ack, 0, &id.to_be_bytes());
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnected);
        assert!(a.verbindung.send_command(b"x", false).is_err());
    }

    #[test]
    fn geordnete_trennung_hat_obergrenze() {
        let a = aufbau();
        a.verbindung.zustand_setzen(ConnectionState::Connected);
        a.verbindung.send_command(b"x", false).unwrap();
        a.verbindung.close_connection(true);
        a.clock.vorstellen(Duration::from_secs(5));
        a.verbindung.tick(a.clock.ansehen());
        assert_eq!(a.verbindung.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn adresswechsel_meldet_alte_adresse() {
        let a = aufbau();
        let alt = a.verbindung.adresse();
        let neu: SocketAddr = "10.0.0.6:999".parse().unwrap();
        assert_eq!(a.verbindung.adresse_wechseln(alt), None);
        assert_eq!(a.verbindung.adresse_wechseln(neu), Some(alt));
        assert_eq!(a.verbindung.remote_address(), neu);
    }

    #[test]
    fn sendepuffer_meldet_session_nur_einmal_an() {
        let a = aufbau();
        a.verbindung.send_packet(PacketType::Voice, 0, Bytes::from_static(b"a")).unwrap();
        a.verbindung.send_packet(PacketType::Voice, 0, Bytes::from_static(b"b")).unwrap();
        assert_eq!(a.socket.warteschlange(), (0, 1));
        assert_eq!(gesendet(&a).len(), 2);
        assert!(a.verbindung.send_packet(PacketType::Command, 0, Bytes::new()).is_err());
    }
}
