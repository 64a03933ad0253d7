//! Fehlertypen des Voice-Transports

use thiserror::Error;
use tsvoice_protocol::{PacketError, PacketType};

/// Result-Alias fuer den Voice-Transport
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Alle Fehler des Voice-Transports
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ungueltiges Paket: {0}")]
    Paket(#[from] PacketError),

    #[error("Unbekannte Paket-ID {packet_id} fuer {packet_type:?}")]
    UnbekanntePaketId {
        packet_type: PacketType,
        packet_id: u16,
    },

    #[error("Kein bestaetigbarer Pakettyp: {0:?}")]
    KeinAckTyp(PacketType),

    #[error("Eventloop-Fehler: {0}")]
    EventLoop(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Keine freie Client-ID verfuegbar")]
    ServerVoll,

    #[error("Session getrennt")]
    Getrennt,
}

impl VoiceError {
    /// Erstellt einen Eventloop-Fehler aus einer beliebigen Nachricht
    pub fn event_loop(msg: impl Into<String>) -> Self {
        Self::EventLoop(msg.into())
    }
}

impl From<VoiceError> for tsvoice_core::TsVoiceError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Io(io) => Self::Io(io),
            VoiceError::Paket(p) => Self::UngueltigesPaket(p.to_string()),
            VoiceError::ServerVoll => Self::ServerVoll,
            VoiceError::Getrennt => Self::Getrennt("Session getrennt".into()),
            VoiceError::Konfiguration(msg) => Self::Konfiguration(msg),
            andere => Self::Intern(andere.to_string()),
        }
    }
}
