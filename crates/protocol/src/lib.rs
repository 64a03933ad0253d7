//! tsvoice-protocol – Wire-Formate des Voice-Transports
//!
//! Dieses Crate definiert die binaeren Paketstrukturen, die zwischen Client
//! und Server ueber UDP ausgetauscht werden:
//! - [`packet`] – Client-/Server-Paketheader, Pakettypen und Flags
//! - [`init`] – Umschlag und Schritte des Admission-Handshakes (`TS3INIT1`)
//! - [`packet_id`] – 16-Bit Paket-ID-Arithmetik mit Wrap-Around
//! - [`codec`] – Codec-Kennungen der Voice-Nutzdaten

pub mod codec;
pub mod error;
pub mod init;
pub mod packet;
pub mod packet_id;

pub use codec::AudioCodec;
pub use error::PacketError;
pub use init::{HandshakeStep, INIT_MAGIC};
pub use packet::{ClientPacket, OutgoingPacket, PacketFlags, PacketType, VoicePayload};
pub use packet_id::{packet_id_diff, packet_id_less, PacketIdGenerator};
