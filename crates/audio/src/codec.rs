//! Decoder-Vertrag und Opus-Decoder
//!
//! Der Sequencer kennt Decoder nur ueber [`AudioDecoder`]. Welche Codecs
//! dekodierbar sind, entscheidet eine [`DecoderFactory`]; die
//! Standard-Factory liefert Opus-Decoder via audiopus.

use audiopus::{coder::Decoder, Channels, SampleRate};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use tsvoice_protocol::codec::AudioCodec;

/// Zusatzinformationen fuer einen Decode-Aufruf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodePayloadInfo {
    /// Aus den FEC-Daten des Pakets das *vorherige* Paket rekonstruieren
    pub fec_decode: bool,
    /// Laenge der Nutzdaten in Bytes
    pub byte_length: usize,
}

/// Abstrakter Audio-Decoder
pub trait AudioDecoder: Send {
    /// Dekodiert `payload` nach `output` (interleaved f32)
    ///
    /// `sample_count` ist die maximale Anzahl Samples pro Kanal. Bei
    /// `fec_decode` wird genau diese Anzahl rekonstruiert. Gibt die Anzahl
    /// dekodierter Samples pro Kanal zurueck.
    fn decode(
        &mut self,
        output: &mut [f32],
        sample_count: usize,
        info: DecodePayloadInfo,
        payload: &[u8],
    ) -> AudioResult<usize>;

    fn channel_count(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Setzt den internen Zustand zurueck (neuer Stream)
    fn reset_sequence(&mut self);
}

/// Erstellt Decoder fuer einen Codec
pub trait DecoderFactory: Send + Sync {
    /// `None` wenn der Codec nicht dekodiert werden kann
    fn create(&self, codec: AudioCodec) -> Option<Box<dyn AudioDecoder>>;
}

// ---------------------------------------------------------------------------
// OpusDecoder
// ---------------------------------------------------------------------------

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    channels: Channels,
    sample_rate: u32,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder (48 kHz, mono oder stereo)
    pub fn new(channels: usize) -> AudioResult<Self> {
        let channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(AudioError::Konfiguration(format!(
                    "Opus unterstuetzt nur 1 oder 2 Kanaele (war: {n})"
                )))
            }
        };
        let decoder = Decoder::new(SampleRate::Hz48000, channels)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!(kanaele = channels as usize, "OpusDecoder erstellt");
        Ok(Self {
            decoder,
            channels,
            sample_rate: 48_000,
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(
        &mut self,
        output: &mut [f32],
        sample_count: usize,
        info: DecodePayloadInfo,
        payload: &[u8],
    ) -> AudioResult<usize> {
        let kanaele = self.channel_count();
        let benoetigt = sample_count * kanaele;
        if output.len() < benoetigt {
            return Err(AudioError::PufferZuKlein {
                benoetigt,
                verfuegbar: output.len(),
            });
        }

        let daten = &payload[..info.byte_length.min(payload.len())];
        let ausgabe = &mut output[..benoetigt];
        let ergebnis = if daten.is_empty() {
            // Ohne Daten: Packet Loss Concealment des Decoders
            self.decoder
                .decode_float(None::<&[u8]>, ausgabe, info.fec_decode)
        } else {
            self.decoder.decode_float(Some(daten), ausgabe, info.fec_decode)
        };
        ergebnis.map_err(|e| AudioError::CodecFehler(e.to_string()))
    }

    fn channel_count(&self) -> usize {
        self.channels as usize
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn reset_sequence(&mut self) {
        // audiopus 0.2 bietet kein Reset-CTL, ein frischer Decoder ist gleichwertig
        if let Ok(neu) = Decoder::new(SampleRate::Hz48000, self.channels) {
            self.decoder = neu;
        }
    }
}

// ---------------------------------------------------------------------------
// Standard-Factory
// ---------------------------------------------------------------------------

/// Liefert Opus-Decoder; Speex und CELT werden nicht dekodiert
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDecoderFactory;

impl DecoderFactory for StandardDecoderFactory {
    fn create(&self, codec: AudioCodec) -> Option<Box<dyn AudioDecoder>> {
        match codec {
            AudioCodec::OpusVoice | AudioCodec::OpusMusic => {
                match OpusDecoder::new(codec.channels()) {
                    Ok(decoder) => Some(Box::new(decoder)),
                    Err(e) => {
                        tracing::error!(codec = %codec, fehler = %e, "Opus-Decoder konnte nicht erstellt werden");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_unterstuetzt_nur_opus() {
        let factory = StandardDecoderFactory;
        assert!(factory.create(AudioCodec::SpeexWideband).is_none());
        assert!(factory.create(AudioCodec::CeltMono).is_none());
    }

    #[test]
    fn opus_decoder_eigenschaften() {
        let decoder = StandardDecoderFactory
            .create(AudioCodec::OpusMusic)
            .expect("Opus muss unterstuetzt sein");
        assert_eq!(decoder.channel_count(), 2);
        assert_eq!(decoder.sample_rate(), 48_000);
    }

    #[test]
    fn opus_ungueltige_kanalzahl() {
        assert!(OpusDecoder::new(3).is_err());
    }

    #[test]
    fn opus_puffer_zu_klein() {
        let mut decoder = OpusDecoder::new(1).unwrap();
        let mut out = vec![0.0f32; 10];
        let info = DecodePayloadInfo {
            fec_decode: false,
            byte_length: 0,
        };
        assert!(matches!(
            decoder.decode(&mut out, 960, info, &[]),
            Err(AudioError::PufferZuKlein { .. })
        ));
    }
}
