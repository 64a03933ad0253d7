//! Kommando-Pfad einer Session
//!
//! Der Transport interpretiert keine Kommandos. Er reicht die Nutzdaten
//! von COMMAND/COMMAND_LOW, das im Handshake eingebettete Init-Kommando
//! und die synthetische `dummy_ipchange`-Meldung an einen
//! [`CommandHandler`] weiter.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use tsvoice_core::{ClientId, ConnectionState};
use tsvoice_protocol::PacketType;

use crate::connection::VoiceConnection;

/// Ein zugestelltes Kommando
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kommando {
    pub packet_type: PacketType,
    /// Flags des Pakets; fragmentierte oder komprimierte Kommandos bleiben roh
    pub flags: u8,
    pub daten: Bytes,
}

impl Kommando {
    pub fn neu(packet_type: PacketType, flags: u8, daten: Bytes) -> Self {
        Self {
            packet_type,
            flags,
            daten,
        }
    }

    /// Erstes Wort des Kommandos (nur bei unfragmentiertem Text sinnvoll)
    pub fn name(&self) -> &str {
        let ende = self
            .daten
            .iter()
            .position(|b| *b == b' ' || *b == b'\n')
            .unwrap_or(self.daten.len());
        std::str::from_utf8(&self.daten[..ende]).unwrap_or("")
    }
}

/// Empfaenger aller Kommandos einer Session
pub trait CommandHandler: Send + Sync {
    fn handle_command(&self, verbindung: &Arc<VoiceConnection>, kommando: Kommando);

    /// Die Session wurde entfernt
    fn client_getrennt(&self, _client_id: ClientId) {}
}

/// Minimaler Handler: protokolliert und fuehrt den Init-Ablauf weiter
///
/// `clientinitiv` hebt die Session auf `InitHigh`, `clientinit` auf
/// `Connected`. Alles andere wird nur geloggt.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtokollCommandHandler;

impl CommandHandler for ProtokollCommandHandler {
    fn handle_command(&self, verbindung: &Arc<VoiceConnection>, kommando: Kommando) {
        let name = kommando.name();
        debug!(
            client = %verbindung.client_id(),
            kommando = name,
            laenge = kommando.daten.len(),
            "Kommando empfangen"
        );

        match name {
            "clientinitiv" if verbindung.state() == ConnectionState::InitLow => {
                verbindung.zustand_setzen(ConnectionState::InitHigh);
            }
            "clientinit" if verbindung.state() == ConnectionState::InitHigh => {
                verbindung.zustand_setzen(ConnectionState::Connected);
                info!(client = %verbindung.client_id(), adresse = %verbindung.adresse(), "Client verbunden");
            }
            _ => {}
        }
    }

    fn client_getrennt(&self, client_id: ClientId) {
        info!(client = %client_id, "Client entfernt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_ist_erstes_wort() {
        let k = Kommando::neu(PacketType::Command, 0, Bytes::from_static(b"clientinit client_nickname=x"));
        assert_eq!(k.name(), "clientinit");
        let k = Kommando::neu(PacketType::Command, 0, Bytes::from_static(b"clientinitiv"));
        assert_eq!(k.name(), "clientinitiv");
        let k = Kommando::neu(PacketType::Command, 0, Bytes::from_static(&[0xFF, 0xFE]));
        assert_eq!(k.name(), "");
    }
}
