//! Gemeinsame Identifikations- und Zustandstypen
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Paket-IDs und Client-IDs zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

/// Client-ID einer Session (16 Bit, wie im Paket-Header)
///
/// Die ID `0` ist reserviert fuer "noch keine Session".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u16);

impl ClientId {
    /// Platzhalter fuer Pakete ohne zugewiesene ID
    pub const KEINE: ClientId = ClientId(0);

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u16 {
        self.0
    }

    /// Gibt true zurueck wenn eine echte ID zugewiesen ist
    pub fn ist_zugewiesen(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// Verbindungszustand einer Voice-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake abgeschlossen, Client sendet sein Init-Kommando
    InitLow,
    /// Schluesselaustausch auf Kommando-Ebene laeuft
    InitHigh,
    /// Voll verbunden
    Connected,
    /// Trennung eingeleitet, ausstehende Pakete werden noch gesendet
    Disconnecting,
    /// Getrennt, Session wird entfernt
    Disconnected,
}

impl ConnectionState {
    /// Gibt true zurueck solange die Session Pakete verarbeiten darf
    pub fn ist_aktiv(&self) -> bool {
        !matches!(self, Self::Disconnecting | Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InitLow => "init_low",
            Self::InitHigh => "init_high",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
