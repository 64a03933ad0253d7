//! tsvoice-audio – Empfangsseitige Audio-Wiedergabe
//!
//! Verarbeitet die Voice-Pakete einer Session bis zum Ausgabepuffer:
//! - Umsortieren und Verlustverdeckung (PlaybackSequencer)
//! - Decoder-Vertrag, Opus-Decoder via audiopus
//! - Kanalzusammenfuehrung, Lautstaerke, Resampling
//! - Ausgabepuffer mit Ein- und Ausblenden
//! - Decode-Worker (crossbeam-channel)

pub mod codec;
pub mod error;
pub mod output;
pub mod playback;
pub mod resampler;
pub mod scheduler;
pub mod sequencer;
pub mod volume;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{AudioDecoder, DecodePayloadInfo, DecoderFactory, OpusDecoder, StandardDecoderFactory};
pub use error::{AudioError, AudioResult};
pub use output::{AudioOutputSource, BufferState, OverflowStrategy};
pub use playback::{PlaybackConfig, PlaybackState};
pub use resampler::LinearResampler;
pub use scheduler::DecodeEventLoop;
pub use sequencer::PlaybackSequencer;
