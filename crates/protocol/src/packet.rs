//! Session-Pakete (UDP)
//!
//! Nach dem Admission-Handshake tauschen Client und Server Pakete mit einem
//! kompakten Header aus. Die 8-Byte MAC wird vom Crypt-Handler berechnet und
//! hier nur transportiert.
//!
//! ## Client -> Server (Header = 13 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       8   MAC
//!  8       2   Paket-ID (big-endian)
//! 10       2   Client-ID (big-endian)
//! 12       1   Typ (untere 4 Bit) | Flags (obere 4 Bit)
//! 13+      N   Nutzdaten
//! ```
//!
//! ## Server -> Client (Header = 11 Bytes)
//!
//! ```text
//!  0       8   MAC
//!  8       2   Paket-ID (big-endian)
//! 10       1   Typ | Flags
//! 11+      N   Nutzdaten
//! ```

use crate::error::PacketError;
use bytes::{BufMut, Bytes, BytesMut};

/// Laenge der Paket-MAC
pub const MAC_SIZE: usize = 8;

/// Header-Laenge eines Client-Pakets (ohne MAC)
pub const CLIENT_HEADER_SIZE: usize = 5;

/// Header-Laenge eines Server-Pakets (ohne MAC)
pub const SERVER_HEADER_SIZE: usize = 3;

// ---------------------------------------------------------------------------
// Flags (obere 4 Bit des Typ-Bytes)
// ---------------------------------------------------------------------------

/// Bit-Masken fuer die Paket-Flags
pub struct PacketFlags;

impl PacketFlags {
    /// Kommando ist auf mehrere Pakete verteilt
    pub const FRAGMENTED: u8 = 0x10;
    /// Neue Protokollvariante (Kommandos mit Generation)
    pub const NEW_PROTOCOL: u8 = 0x20;
    /// Nutzdaten komprimiert, bei Voice: Stream-Beginn ("head")
    pub const COMPRESSED: u8 = 0x40;
    /// Paket ist nicht verschluesselt
    pub const UNENCRYPTED: u8 = 0x80;

    /// Maske aller Flag-Bits
    pub const MASKE: u8 = 0xF0;
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Art eines Session-Pakets (untere 4 Bit des Typ-Bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Voice = 0,
    VoiceWhisper = 1,
    Command = 2,
    CommandLow = 3,
    Ping = 4,
    Pong = 5,
    Ack = 6,
    AckLow = 7,
    Init1 = 8,
}

impl PacketType {
    /// Anzahl der Pakettypen (Groesse der ID-Zaehler-Tabelle)
    pub const ANZAHL: usize = 9;

    /// Konvertiert ein Byte (untere 4 Bit) in einen `PacketType`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0 => Some(Self::Voice),
            1 => Some(Self::VoiceWhisper),
            2 => Some(Self::Command),
            3 => Some(Self::CommandLow),
            4 => Some(Self::Ping),
            5 => Some(Self::Pong),
            6 => Some(Self::Ack),
            7 => Some(Self::AckLow),
            8 => Some(Self::Init1),
            _ => None,
        }
    }

    /// Index in ID-Zaehler-Tabellen
    pub fn index(self) -> usize {
        self as usize
    }

    /// Gibt true zurueck wenn Pakete dieses Typs bestaetigt werden muessen
    pub fn braucht_bestaetigung(self) -> bool {
        matches!(self, Self::Command | Self::CommandLow)
    }

    /// Der Kommando-Typ, den ein Ack dieses Typs bestaetigt
    pub fn bestaetigter_typ(self) -> Option<Self> {
        match self {
            Self::Ack => Some(Self::Command),
            Self::AckLow => Some(Self::CommandLow),
            _ => None,
        }
    }

    /// Der Ack-Typ, mit dem ein Kommando dieses Typs bestaetigt wird
    pub fn ack_typ(self) -> Option<Self> {
        match self {
            Self::Command => Some(Self::Ack),
            Self::CommandLow => Some(Self::AckLow),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientPacket
// ---------------------------------------------------------------------------

/// Geparstes Client-Paket (borgt den Empfangspuffer, keine Kopie)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPacket<'a> {
    daten: &'a [u8],
    packet_type: PacketType,
}

impl<'a> ClientPacket<'a> {
    /// Gesamtlaenge des Headers inklusive MAC
    pub const HEADER_SIZE: usize = MAC_SIZE + CLIENT_HEADER_SIZE;

    /// Parst ein Client-Paket
    ///
    /// # Fehler
    /// - `ZuKurz` wenn der Header nicht vollstaendig ist
    /// - `UnbekannterTyp` bei Typ-Nibble > 8
    pub fn parse(daten: &'a [u8]) -> Result<Self, PacketError> {
        PacketError::mindestens(daten.len(), Self::HEADER_SIZE)?;
        let typ_byte = daten[MAC_SIZE + 4];
        let packet_type = PacketType::from_u8(typ_byte)
            .ok_or(PacketError::UnbekannterTyp(typ_byte & 0x0F))?;
        Ok(Self { daten, packet_type })
    }

    /// Die 8-Byte MAC
    pub fn mac(&self) -> &'a [u8] {
        &self.daten[..MAC_SIZE]
    }

    /// Paket-ID (pro Pakettyp fortlaufend)
    pub fn packet_id(&self) -> u16 {
        u16::from_be_bytes([self.daten[MAC_SIZE], self.daten[MAC_SIZE + 1]])
    }

    /// Client-ID des Absenders (0 = noch nicht zugewiesen)
    pub fn client_id(&self) -> u16 {
        u16::from_be_bytes([self.daten[MAC_SIZE + 2], self.daten[MAC_SIZE + 3]])
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Flag-Bits (obere 4 Bit)
    pub fn flags(&self) -> u8 {
        self.daten[MAC_SIZE + 4] & PacketFlags::MASKE
    }

    /// Prueft ob ein bestimmtes Flag gesetzt ist
    pub fn hat_flag(&self, flag: u8) -> bool {
        self.flags() & flag != 0
    }

    /// Header-Bytes ohne MAC (fuer die MAC-Pruefung)
    pub fn header(&self) -> &'a [u8] {
        &self.daten[MAC_SIZE..Self::HEADER_SIZE]
    }

    /// Nutzdaten nach dem Header
    pub fn payload(&self) -> &'a [u8] {
        &self.daten[Self::HEADER_SIZE..]
    }

    /// Das komplette Datagramm
    pub fn roh(&self) -> &'a [u8] {
        self.daten
    }
}

// ---------------------------------------------------------------------------
// OutgoingPacket
// ---------------------------------------------------------------------------

/// Vom Server zu sendendes Paket vor der Serialisierung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub packet_type: PacketType,
    pub flags: u8,
    pub packet_id: u16,
    /// Generation des 16-Bit Zaehlers (fuer die volle ID in der Ack-Verwaltung)
    pub generation: u16,
    pub payload: Bytes,
}

impl OutgoingPacket {
    /// Volle 32-Bit ID (`generation << 16 | packet_id`)
    pub fn volle_id(&self) -> u32 {
        (u32::from(self.generation) << 16) | u32::from(self.packet_id)
    }

    /// Header-Bytes ohne MAC
    pub fn header(&self) -> [u8; SERVER_HEADER_SIZE] {
        let id = self.packet_id.to_be_bytes();
        [id[0], id[1], (self.packet_type as u8) | (self.flags & PacketFlags::MASKE)]
    }

    /// Serialisiert das Paket mit der gegebenen MAC
    pub fn encode(&self, mac: [u8; MAC_SIZE]) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAC_SIZE + SERVER_HEADER_SIZE + self.payload.len());
        buf.put_slice(&mac);
        buf.put_slice(&self.header());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Baut ein Client-Paket (Gegenstueck zu [`ClientPacket::parse`], fuer Clients und Tests)
pub fn client_paket_bauen(
    packet_type: PacketType,
    flags: u8,
    packet_id: u16,
    client_id: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ClientPacket::HEADER_SIZE + payload.len());
    buf.extend_from_slice(&[0u8; MAC_SIZE]);
    buf.extend_from_slice(&packet_id.to_be_bytes());
    buf.extend_from_slice(&client_id.to_be_bytes());
    buf.push((packet_type as u8) | (flags & PacketFlags::MASKE));
    buf.extend_from_slice(payload);
    buf
}

// ---------------------------------------------------------------------------
// Voice-Nutzdaten
// ---------------------------------------------------------------------------

/// Nutzdaten eines Voice-Pakets vom Client
///
/// ```text
/// 0  2  Voice-Paket-ID (big-endian)
/// 2  1  Codec
/// 3+ N  Codec-Daten (leer = Stream-Ende)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePayload<'a> {
    pub voice_id: u16,
    pub codec: u8,
    pub daten: &'a [u8],
}

impl<'a> VoicePayload<'a> {
    pub const HEADER_SIZE: usize = 3;

    pub fn parse(payload: &'a [u8]) -> Result<Self, PacketError> {
        PacketError::mindestens(payload.len(), Self::HEADER_SIZE)?;
        Ok(Self {
            voice_id: u16::from_be_bytes([payload[0], payload[1]]),
            codec: payload[2],
            daten: &payload[Self::HEADER_SIZE..],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_paket_parsen() {
        let roh = client_paket_bauen(
            PacketType::Command,
            PacketFlags::NEW_PROTOCOL,
            0x0102,
            0x0304,
            b"clientinit",
        );
        let paket = ClientPacket::parse(&roh).unwrap();
        assert_eq!(paket.packet_id(), 0x0102);
        assert_eq!(paket.client_id(), 0x0304);
        assert_eq!(paket.packet_type(), PacketType::Command);
        assert!(paket.hat_flag(PacketFlags::NEW_PROTOCOL));
        assert!(!paket.hat_flag(PacketFlags::UNENCRYPTED));
        assert_eq!(paket.payload(), b"clientinit");
    }

    #[test]
    fn client_paket_zu_kurz() {
        let err = ClientPacket::parse(&[0u8; 12]).unwrap_err();
        assert_eq!(err, PacketError::ZuKurz { laenge: 12, erwartet: 13 });
    }

    #[test]
    fn unbekannter_typ_wird_abgelehnt() {
        let mut roh = client_paket_bauen(PacketType::Ping, 0, 1, 1, &[]);
        roh[12] = 0x8F;
        assert_eq!(
            ClientPacket::parse(&roh).unwrap_err(),
            PacketError::UnbekannterTyp(0x0F)
        );
    }

    #[test]
    fn server_paket_layout() {
        let paket = OutgoingPacket {
            packet_type: PacketType::Pong,
            flags: PacketFlags::UNENCRYPTED,
            packet_id: 7,
            generation: 0,
            payload: Bytes::from_static(&[0x00, 0x2A]),
        };
        let roh = paket.encode([0xAB; MAC_SIZE]);
        assert_eq!(&roh[..8], &[0xAB; 8]);
        assert_eq!(&roh[8..], &[0x00, 0x07, 0x85, 0x00, 0x2A]);
    }

    #[test]
    fn volle_id_enthaelt_generation() {
        let paket = OutgoingPacket {
            packet_type: PacketType::Command,
            flags: 0,
            packet_id: 3,
            generation: 2,
            payload: Bytes::new(),
        };
        assert_eq!(paket.volle_id(), 0x0002_0003);
    }

    #[test]
    fn ack_zuordnung() {
        assert_eq!(PacketType::AckLow.bestaetigter_typ(), Some(PacketType::CommandLow));
        assert_eq!(PacketType::Ack.bestaetigter_typ(), Some(PacketType::Command));
        assert_eq!(PacketType::Command.ack_typ(), Some(PacketType::Ack));
        assert_eq!(PacketType::Voice.ack_typ(), None);
    }

    #[test]
    fn voice_nutzdaten() {
        let roh = [0x12, 0x34, 4, 0xDE, 0xAD];
        let voice = VoicePayload::parse(&roh).unwrap();
        assert_eq!(voice.voice_id, 0x1234);
        assert_eq!(voice.codec, 4);
        assert_eq!(voice.daten, &[0xDE, 0xAD]);
        assert!(VoicePayload::parse(&[1, 2]).is_err());
    }
}
