//! Codec-Kennungen der Voice-Nutzdaten
//!
//! Das Codec-Byte jedes Voice-Pakets bestimmt, welcher Decoder die Daten
//! verarbeitet. Die Bitstream-Semantik der Codecs ist nicht Teil dieses
//! Crates; hier stehen nur Kennung, Abtastrate und Kanalzahl.

use serde::{Deserialize, Serialize};

/// Audio-Codec eines Voice-Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AudioCodec {
    /// Speex 8 kHz
    SpeexNarrowband = 0,
    /// Speex 16 kHz
    SpeexWideband = 1,
    /// Speex 32 kHz
    SpeexUltraWideband = 2,
    /// CELT mono 48 kHz
    CeltMono = 3,
    /// Opus, fuer Sprache optimiert (mono, 48 kHz)
    OpusVoice = 4,
    /// Opus, fuer Musik optimiert (stereo, 48 kHz)
    OpusMusic = 5,
}

impl AudioCodec {
    /// Konvertiert das Codec-Byte eines Voice-Pakets
    pub fn from_protocol_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::SpeexNarrowband),
            1 => Some(Self::SpeexWideband),
            2 => Some(Self::SpeexUltraWideband),
            3 => Some(Self::CeltMono),
            4 => Some(Self::OpusVoice),
            5 => Some(Self::OpusMusic),
            _ => None,
        }
    }

    pub fn protocol_id(self) -> u8 {
        self as u8
    }

    /// Abtastrate des dekodierten Signals in Hz
    pub fn sample_rate(self) -> u32 {
        match self {
            Self::SpeexNarrowband => 8_000,
            Self::SpeexWideband => 16_000,
            Self::SpeexUltraWideband => 32_000,
            Self::CeltMono | Self::OpusVoice | Self::OpusMusic => 48_000,
        }
    }

    /// Anzahl der Kanaele des dekodierten Signals
    pub fn channels(self) -> usize {
        match self {
            Self::OpusMusic => 2,
            _ => 1,
        }
    }

    /// Lesbarer Name fuer Logs
    pub fn name(self) -> &'static str {
        match self {
            Self::SpeexNarrowband => "speex_nb",
            Self::SpeexWideband => "speex_wb",
            Self::SpeexUltraWideband => "speex_uwb",
            Self::CeltMono => "celt_mono",
            Self::OpusVoice => "opus_voice",
            Self::OpusMusic => "opus_music",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_ids() {
        assert_eq!(AudioCodec::from_protocol_id(4), Some(AudioCodec::OpusVoice));
        assert_eq!(AudioCodec::from_protocol_id(5), Some(AudioCodec::OpusMusic));
        assert_eq!(AudioCodec::from_protocol_id(6), None);
        assert_eq!(AudioCodec::OpusMusic.protocol_id(), 5);
    }

    #[test]
    fn opus_eigenschaften() {
        assert_eq!(AudioCodec::OpusVoice.sample_rate(), 48_000);
        assert_eq!(AudioCodec::OpusVoice.channels(), 1);
        assert_eq!(AudioCodec::OpusMusic.channels(), 2);
        assert_eq!(AudioCodec::SpeexWideband.sample_rate(), 16_000);
    }
}
