//! Wiedergabe-Sequencer: Umsortieren, Verlustverdeckung, Dekodierung
//!
//! Voice-Pakete kommen ueber UDP ungeordnet und mit Luecken an. Der
//! Sequencer haelt sie in aufsteigender (modularer) Reihenfolge und
//! entscheidet, wann ein Stueck der Warteschlange abgespielt wird:
//!
//! 1. Erzwungener Flush (Stream-Ende oder Timeout): alles bis zur Marke
//! 2. Lueckenlose Folge ab der zuletzt gespielten ID
//! 3. Lauf von mindestens drei aufeinanderfolgenden IDs: alles davor, dann den Lauf
//! 4. Erstes Paket mindestens fuenf IDs voraus: alles bis dahin
//! 5. Sonst warten
//!
//! Fehlende Pakete werden ueber die FEC-Daten des Nachfolgers rekonstruiert.
//!
//! Sperren: `queue` und `zustand` werden nie gleichzeitig mit `ausgabe`
//! in umgekehrter Reihenfolge gehalten. Der Mixer sperrt `ausgabe` und
//! darin `zustand` bzw. `queue`; die Ausfuehrung sperrt `ausgabe` nur
//! kurz und ohne weitere Sperre.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use tsvoice_core::Clock;
use tsvoice_protocol::codec::AudioCodec;
use tsvoice_protocol::packet_id::{packet_id_diff, packet_id_less, MAX_LOST_PACKETS, ORDER_WINDOW};

use crate::codec::{AudioDecoder, DecodePayloadInfo, DecoderFactory};
use crate::output::{AudioOutputSource, BufferState};
use crate::playback::{PlaybackConfig, PlaybackState};
use crate::resampler::LinearResampler;
use crate::volume::{apply_gain, merge_channels_interleaved};

/// Ohne Paket fuer diese Dauer beginnt ein neuer Stream
const STREAM_TIMEOUT: Duration = Duration::from_millis(1000);

/// Buffering ohne Paket fuer diese Dauer -> Stopped (Tick)
const BUFFERING_TIMEOUT: Duration = Duration::from_millis(250);

/// Ab so vielen verlorenen Paketen wird der Decoder zurueckgesetzt
const MAX_FEC_LUECKE: u16 = 10;

/// Mindestlaenge eines Laufs aufeinanderfolgender IDs
const MIN_LAUF: usize = 3;

/// Ab diesem Abstand wird uebersprungen
const SPRUNG_ABSTAND: u16 = 5;

/// Temporaerer Decode-Puffer: 120 ms Stereo bei 48 kHz
const TEMP_BUFFER_SAMPLES: usize = 5760 * 2;

/// Ein empfangenes Voice-Paket in der Warteschlange
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub packet_id: u16,
    pub codec: u8,
    pub payload: Bytes,
    seriennummer: u64,
}

#[derive(Debug)]
struct SequencerQueue {
    frames: VecDeque<AudioFrame>,
    /// Zuletzt zur Wiedergabe ausgewaehlte ID
    last_packet_id: u16,
    last_packet_ts: Option<Instant>,
    /// Seriennummer des Frames, bis zu dem erzwungen abgespielt wird
    force_marke: Option<u64>,
    naechste_serie: u64,
    process_pending: bool,
}

struct Ausfuehrung {
    codec: Option<AudioCodec>,
    decoder: Option<Box<dyn AudioDecoder>>,
    decoder_initialisiert: bool,
    resampler: Option<LinearResampler>,
    temp: Vec<f32>,
}

/// Empfangsseitiger Sequencer einer Session
pub struct PlaybackSequencer {
    queue: Mutex<SequencerQueue>,
    ausfuehrung: Mutex<Ausfuehrung>,
    zustand: Mutex<PlaybackState>,
    ausgabe: Mutex<AudioOutputSource>,
    volume: Mutex<f32>,
    factory: Arc<dyn DecoderFactory>,
    clock: Arc<dyn Clock>,
}

impl PlaybackSequencer {
    pub fn new(
        config: &PlaybackConfig,
        factory: Arc<dyn DecoderFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut ausgabe = AudioOutputSource::new(config.channels, config.sample_rate);
        ausgabe.set_max_buffered_samples(config.ms_zu_samples(config.max_puffer_ms));
        ausgabe.set_min_buffered_samples(config.ms_zu_samples(config.min_puffer_ms));

        Self {
            queue: Mutex::new(SequencerQueue {
                frames: VecDeque::new(),
                last_packet_id: 0,
                last_packet_ts: None,
                force_marke: None,
                naechste_serie: 0,
                process_pending: false,
            }),
            ausfuehrung: Mutex::new(Ausfuehrung {
                codec: None,
                decoder: None,
                decoder_initialisiert: false,
                resampler: None,
                temp: vec![0.0; TEMP_BUFFER_SAMPLES],
            }),
            zustand: Mutex::new(PlaybackState::Stopped),
            ausgabe: Mutex::new(ausgabe),
            volume: Mutex::new(1.0),
            factory,
            clock,
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.zustand.lock()
    }

    /// Lautstaerke (0 = stumm, Frames werden verworfen)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.max(0.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    /// Zuletzt zur Wiedergabe ausgewaehlte Paket-ID
    pub fn last_packet_id(&self) -> u16 {
        self.queue.lock().last_packet_id
    }

    /// Setzt die Ausgangs-ID (z.B. nach einem Stream-Neustart des Clients)
    pub fn reset_sequence(&self, last_packet_id: u16) {
        let mut q = self.queue.lock();
        q.last_packet_id = last_packet_id;
        q.frames.clear();
        q.force_marke = None;
    }

    /// Anzahl wartender Frames
    pub fn pending_frames(&self) -> usize {
        self.queue.lock().frames.len()
    }

    /// Gepufferte Samples pro Kanal im Ausgabepuffer
    pub fn buffered_samples(&self) -> usize {
        self.ausgabe.lock().currently_buffered_samples()
    }

    // -----------------------------------------------------------------------
    // Einsortieren
    // -----------------------------------------------------------------------

    /// Sortiert ein Voice-Paket ein
    ///
    /// Gibt `true` zurueck wenn der Aufrufer [`execute_pending`](Self::execute_pending)
    /// einplanen muss; solange eine Ausfuehrung aussteht, nur einmal.
    pub fn enqueue_audio(&self, packet_id: u16, codec: u8, payload: Bytes) -> bool {
        let jetzt = self.clock.now();
        let mut q = self.queue.lock();

        if packet_id == q.last_packet_id
            || packet_id_less(packet_id, q.last_packet_id, MAX_LOST_PACKETS)
        {
            trace!(packet_id, letzte = q.last_packet_id, "Voice-Paket zu alt, verworfen");
            return false;
        }

        // Sortiert nach Abstand zur zuletzt gespielten ID
        let letzte = q.last_packet_id;
        let abstand = packet_id_diff(letzte, packet_id);
        let index = q
            .frames
            .iter()
            .position(|f| packet_id_diff(letzte, f.packet_id) >= abstand)
            .unwrap_or(q.frames.len());
        if q.frames.get(index).map(|f| f.packet_id) == Some(packet_id) {
            trace!(packet_id, "Doppeltes Voice-Paket verworfen");
            return false;
        }

        let seriennummer = q.naechste_serie;
        q.naechste_serie += 1;
        let erzwingen = payload.is_empty()
            || q
                .last_packet_ts
                .map_or(true, |ts| jetzt > ts + STREAM_TIMEOUT);

        q.frames.insert(
            index,
            AudioFrame {
                packet_id,
                codec,
                payload,
                seriennummer,
            },
        );
        if erzwingen {
            q.force_marke = Some(seriennummer);
        }
        q.last_packet_ts = Some(jetzt);

        let planen = !q.process_pending;
        q.process_pending = true;
        planen
    }

    /// Waehlt die naechste abzuspielende Gruppe und rueckt die ID vor
    fn gruppe_waehlen(q: &mut SequencerQueue) -> Option<Vec<AudioFrame>> {
        if q.frames.is_empty() {
            return None;
        }

        let mut anzahl = None;

        if let Some(marke) = q.force_marke.take() {
            if let Some(pos) = q.frames.iter().position(|f| f.seriennummer == marke) {
                anzahl = Some(pos + 1);
            }
        }

        if anzahl.is_none() {
            let mut erwartet = q.last_packet_id.wrapping_add(1);
            let folge = q
                .frames
                .iter()
                .take_while(|f| {
                    let passt = f.packet_id == erwartet;
                    erwartet = erwartet.wrapping_add(1);
                    passt
                })
                .count();
            if folge > 0 {
                anzahl = Some(folge);
            }
        }

        if anzahl.is_none() {
            anzahl = Self::lauf_finden(&q.frames);
        }

        if anzahl.is_none() {
            let letzte = q.last_packet_id;
            anzahl = q
                .frames
                .iter()
                .position(|f| packet_id_diff(letzte, f.packet_id) >= SPRUNG_ABSTAND)
                .map(|pos| pos + 1);
        }

        let anzahl = anzahl?;
        let gruppe: Vec<AudioFrame> = q.frames.drain(..anzahl).collect();
        if let Some(letzter) = gruppe.last() {
            q.last_packet_id = letzter.packet_id;
        }
        if let Some(naechster) = q.frames.front() {
            if !packet_id_less(q.last_packet_id, naechster.packet_id, ORDER_WINDOW) {
                error!(
                    letzte = q.last_packet_id,
                    naechste = naechster.packet_id,
                    "Voice-Warteschlange nicht geordnet"
                );
            }
        }
        Some(gruppe)
    }

    /// Ende eines Laufs von mindestens [`MIN_LAUF`] aufeinanderfolgenden IDs
    fn lauf_finden(frames: &VecDeque<AudioFrame>) -> Option<usize> {
        let mut laenge = 1;
        for i in 1..frames.len() {
            if frames[i].packet_id == frames[i - 1].packet_id.wrapping_add(1) {
                laenge += 1;
                continue;
            }
            if laenge >= MIN_LAUF {
                return Some(i);
            }
            laenge = 1;
        }
        (laenge >= MIN_LAUF).then_some(frames.len())
    }

    // -----------------------------------------------------------------------
    // Ausfuehrung
    // -----------------------------------------------------------------------

    /// Spielt alle Gruppen ab, die nach den Regeln abspielbar sind
    pub fn execute_pending(&self) {
        let mut ausfuehrung = self.ausfuehrung.lock();

        loop {
            let (gruppe, mut lokal_letzte) = {
                let mut q = self.queue.lock();
                let lokal_letzte = q.last_packet_id;
                match Self::gruppe_waehlen(&mut q) {
                    Some(gruppe) => (gruppe, lokal_letzte),
                    None => {
                        q.process_pending = false;
                        break;
                    }
                }
            };

            for frame in &gruppe {
                self.frame_abspielen(&mut ausfuehrung, frame, lokal_letzte);
                lokal_letzte = frame.packet_id;
            }
        }
    }

    fn frame_abspielen(&self, ausfuehrung: &mut Ausfuehrung, frame: &AudioFrame, lokal_letzte: u16) {
        if frame.payload.is_empty() {
            let mut zustand = self.zustand.lock();
            if matches!(*zustand, PlaybackState::Playing | PlaybackState::Buffering) {
                debug!(packet_id = frame.packet_id, "Stream-Ende empfangen");
                *zustand = PlaybackState::Stopping;
            }
            return;
        }

        let verloren = packet_id_diff(lokal_letzte, frame.packet_id).wrapping_sub(1);
        let mut zuruecksetzen = false;
        if verloren > MAX_FEC_LUECKE {
            debug!(verloren, packet_id = frame.packet_id, "Zu viele Pakete verloren, Decoder-Reset");
            zuruecksetzen = true;
        } else if verloren > 0 {
            trace!(verloren, packet_id = frame.packet_id, "Rekonstruiere Vorgaenger via FEC");
            self.playback_audio_packet(ausfuehrung, frame.codec, &frame.payload, true);
        }

        // FEC laeuft noch mit dem alten Decoderzustand
        if self.zustand.lock().ist_gestoppt() {
            trace!(packet_id = frame.packet_id, "Neuer Voice-Stream");
            zuruecksetzen = true;
        }
        if zuruecksetzen {
            Self::decoder_zuruecksetzen(ausfuehrung);
        }

        self.playback_audio_packet(ausfuehrung, frame.codec, &frame.payload, false);
    }

    fn decoder_zuruecksetzen(ausfuehrung: &mut Ausfuehrung) {
        if let Some(decoder) = ausfuehrung.decoder.as_mut() {
            decoder.reset_sequence();
            ausfuehrung.decoder_initialisiert = false;
        }
    }

    /// Dekodiert ein Paket und schreibt es in den Ausgabepuffer
    fn playback_audio_packet(&self, ausfuehrung: &mut Ausfuehrung, codec_id: u8, payload: &[u8], fec: bool) {
        let Some(codec) = AudioCodec::from_protocol_id(codec_id) else {
            trace!(codec = codec_id, "Unbekannter Codec, Paket ignoriert");
            return;
        };

        if ausfuehrung.codec != Some(codec) {
            if fec {
                return;
            }
            ausfuehrung.decoder = self.factory.create(codec);
            ausfuehrung.codec = Some(codec);
            ausfuehrung.decoder_initialisiert = false;
            ausfuehrung.resampler = None;
            if ausfuehrung.decoder.is_none() {
                warn!(codec = %codec, "Codec wird nicht unterstuetzt");
            }
        }

        let Ausfuehrung {
            decoder,
            decoder_initialisiert,
            resampler,
            temp,
            ..
        } = &mut *ausfuehrung;
        let Some(decoder) = decoder.as_mut() else {
            return;
        };

        let kanaele = decoder.channel_count().max(1);
        let rate = decoder.sample_rate();
        let frame_20ms = rate as usize / 50;

        if !*decoder_initialisiert {
            if fec {
                return;
            }
            let info = DecodePayloadInfo {
                fec_decode: true,
                byte_length: payload.len(),
            };
            if let Err(e) = decoder.decode(temp.as_mut_slice(), frame_20ms, info, payload) {
                trace!(fehler = %e, "Initialer FEC-Durchlauf fehlgeschlagen");
            }
            *decoder_initialisiert = true;
        }

        let sample_count = if fec { frame_20ms } else { temp.len() / kanaele };
        let info = DecodePayloadInfo {
            fec_decode: fec,
            byte_length: payload.len(),
        };
        let dekodiert = match decoder.decode(temp.as_mut_slice(), sample_count, info, payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(codec = %codec, fec, fehler = %e, "Dekodierung fehlgeschlagen, Frame uebersprungen");
                return;
            }
        };
        if dekodiert == 0 {
            return;
        }

        let (aus_kanaele, aus_rate) = {
            let ausgabe = self.ausgabe.lock();
            (ausgabe.channel_count(), ausgabe.sample_rate())
        };

        let Some(mut samples) = merge_channels_interleaved(&temp[..], kanaele, aus_kanaele, dekodiert) else {
            warn!(kanaele, aus_kanaele, "Kanalzusammenfuehrung fehlgeschlagen");
            return;
        };

        if rate != aus_rate {
            if resampler.as_ref().map(|r| r.input_rate()) != Some(rate) {
                match LinearResampler::new(rate, aus_rate, aus_kanaele) {
                    Ok(r) => *resampler = Some(r),
                    Err(e) => {
                        warn!(fehler = %e, "Resampler konnte nicht erstellt werden");
                        return;
                    }
                }
            }
            if let Some(r) = resampler.as_mut() {
                match r.process(&samples, dekodiert) {
                    Ok(neu) => samples = neu,
                    Err(e) => {
                        warn!(fehler = %e, "Resampling fehlgeschlagen");
                        return;
                    }
                }
            }
        }

        let volume = *self.volume.lock();
        if volume == 0.0 {
            return;
        }
        if volume != 1.0 {
            apply_gain(&mut samples, volume);
        }

        let anzahl = samples.len() / aus_kanaele;
        let ergebnis = self.ausgabe.lock().enqueue_samples(&samples, anzahl);
        if ergebnis.verworfen > 0 {
            trace!(verworfen = ergebnis.verworfen, "Ausgabepuffer voll");
        }
        *self.zustand.lock() = PlaybackState::Playing;
    }

    // -----------------------------------------------------------------------
    // Ausgabe
    // -----------------------------------------------------------------------

    /// Liest Samples fuer den Mixer; `false` wenn nichts auszugeben ist
    pub fn pop_samples(&self, ziel: &mut [f32]) -> bool {
        let mut ausgabe = self.ausgabe.lock();
        ausgabe.pop_samples_mit(ziel, &mut |_fehlend: usize| self.handle_output_underflow())
    }

    /// Reaktion auf einen leergelaufenen Ausgabepuffer
    ///
    /// Fuellt nicht nach und gibt daher immer `false` zurueck.
    fn handle_output_underflow(&self) -> bool {
        let jetzt = self.clock.now();
        let letzte = self.queue.lock().last_packet_ts;
        let mut zustand = self.zustand.lock();
        match *zustand {
            PlaybackState::Stopping => *zustand = PlaybackState::Stopped,
            PlaybackState::Playing => *zustand = PlaybackState::Buffering,
            PlaybackState::Buffering => {
                if letzte.map_or(true, |ts| jetzt > ts + STREAM_TIMEOUT) {
                    *zustand = PlaybackState::Stopped;
                }
            }
            PlaybackState::Stopped => {}
        }
        false
    }

    /// Periodische Zustandspruefung
    pub fn execute_tick(&self) {
        let jetzt = self.clock.now();
        let ausgabe_zustand = self.ausgabe.lock().state();
        let letzte = self.queue.lock().last_packet_ts;
        let mut zustand = self.zustand.lock();
        match *zustand {
            PlaybackState::Buffering => {
                if letzte.map_or(true, |ts| jetzt > ts + BUFFERING_TIMEOUT) {
                    trace!("Buffering-Timeout, Stream gestoppt");
                    *zustand = PlaybackState::Stopped;
                }
            }
            PlaybackState::Stopping => {
                if matches!(ausgabe_zustand, BufferState::Fadeout | BufferState::Buffering) {
                    *zustand = PlaybackState::Stopped;
                }
            }
            PlaybackState::Playing | PlaybackState::Stopped => {}
        }
    }

    /// Bricht die Wiedergabe ab und verwirft alle wartenden Frames
    pub fn cancel_replay(&self) {
        self.ausgabe.lock().clear();
        {
            let mut q = self.queue.lock();
            q.frames.clear();
            q.force_marke = None;
        }
        *self.zustand.lock() = PlaybackState::Stopped;
    }
}

impl std::fmt::Debug for PlaybackSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSequencer")
            .field("state", &self.state())
            .field("last_packet_id", &self.last_packet_id())
            .finish()
    }
}
