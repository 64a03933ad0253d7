//! Admission-Handshake (`TS3INIT1`)
//!
//! Bevor der Server eine Session anlegt, muss der Client ein Zeitschloss-
//! Puzzle loesen. Alle Handshake-Pakete tragen statt MAC die Magic
//! `TS3INIT1`.
//!
//! ## Client -> Server
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       8   Magic "TS3INIT1"
//!  8       2   Paket-ID (101, big-endian)
//! 10       2   Client-ID (0)
//! 12       1   Typ/Flags (INIT1 | UNENCRYPTED)
//! 13       4   Client-Version / Zeitstempel (big-endian)
//! 17       1   Schritt
//! 18+      N   Schrittabhaengige Daten
//! ```
//!
//! ## Server -> Client
//!
//! ```text
//!  0       8   Magic "TS3INIT1"
//!  8       2   Paket-ID (101, big-endian)
//! 10       1   Flags (0x88)
//! 11+      N   Antwort (beginnt mit dem Schritt)
//! ```

use crate::error::PacketError;
use crate::packet::{ClientPacket, PacketFlags, PacketType, MAC_SIZE};

/// Magic am Paketanfang
pub const INIT_MAGIC: &[u8; 8] = b"TS3INIT1";

/// Konstante Paket-ID aller Handshake-Pakete
pub const INIT_PACKET_ID: u16 = 101;

/// Flag-Byte der Server-Antworten (unverschluesselt | INIT1)
pub const INIT_FLAGS: u8 = PacketFlags::UNENCRYPTED | PacketType::Init1 as u8;

/// Laenge des Umschlags der Server-Antworten
pub const ENVELOPE_SIZE: usize = 8 + 2 + 1;

/// Mindestlaenge eines Handshake-Pakets (Header + Version + Schritt)
pub const MIN_PAKET_LAENGE: usize = ClientPacket::HEADER_SIZE + 5;

/// Laenge des Cookies
pub const COOKIE_SIZE: usize = 16;

/// Laenge einer Puzzle-Zahl (x, n, Ergebnis)
pub const PUZZLE_ZAHL_SIZE: usize = 64;

/// Mindestlaengen der Nutzdaten pro Schritt
pub const COOKIE_GET_LAENGE: usize = 21;
pub const PUZZLE_GET_LAENGE: usize = 25;
pub const PUZZLE_SOLVE_LAENGE: usize = 301;

/// Laenge der PUZZLE_SET-Antwort
pub const PUZZLE_SET_LAENGE: usize = 1 + 2 * PUZZLE_ZAHL_SIZE + 4 + 100;

/// Position des Puzzle-Ergebnisses in PUZZLE_SOLVE
pub const ERGEBNIS_OFFSET: usize = 4 + 1 + 2 * PUZZLE_ZAHL_SIZE + 4 + 100;

// ---------------------------------------------------------------------------
// HandshakeStep
// ---------------------------------------------------------------------------

/// Schritt des Admission-Handshakes (monoton steigend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HandshakeStep {
    CookieGet = 0,
    CookieSet = 1,
    PuzzleGet = 2,
    PuzzleSet = 3,
    PuzzleSolve = 4,
    PuzzleReset = 5,
    Completed = 6,
    /// Vom Server gesendet: Client muss bei `CookieGet` neu beginnen
    CommandReset = 127,
}

impl HandshakeStep {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::CookieGet),
            1 => Some(Self::CookieSet),
            2 => Some(Self::PuzzleGet),
            3 => Some(Self::PuzzleSet),
            4 => Some(Self::PuzzleSolve),
            5 => Some(Self::PuzzleReset),
            6 => Some(Self::Completed),
            127 => Some(Self::CommandReset),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// InitRequest
// ---------------------------------------------------------------------------

/// Geparstes Handshake-Paket eines Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRequest<'a> {
    /// Nutzdaten ab der Client-Version
    pub daten: &'a [u8],
}

impl<'a> InitRequest<'a> {
    /// Prueft nur die Mindestlaenge; die Magic wurde vom Aufrufer erkannt
    pub fn parse(datagramm: &'a [u8]) -> Result<Self, PacketError> {
        PacketError::mindestens(datagramm.len(), MIN_PAKET_LAENGE)?;
        Ok(Self {
            daten: &datagramm[ClientPacket::HEADER_SIZE..],
        })
    }

    /// Client-Version (bei Schritt 0 auch als Zeitstempel bezeichnet)
    pub fn client_version(&self) -> u32 {
        u32::from_be_bytes([self.daten[0], self.daten[1], self.daten[2], self.daten[3]])
    }

    /// Roh-Byte des angefragten Schritts
    pub fn schritt_byte(&self) -> u8 {
        self.daten[4]
    }

    pub fn laenge(&self) -> usize {
        self.daten.len()
    }

    /// Client-Nonce aus COOKIE_GET
    pub fn nonce(&self) -> Option<[u8; 4]> {
        self.daten.get(9..13).map(|n| [n[0], n[1], n[2], n[3]])
    }

    /// Mitgesendetes Cookie aus PUZZLE_GET
    pub fn cookie(&self) -> Option<&'a [u8]> {
        self.daten.get(5..5 + COOKIE_SIZE)
    }

    /// Eingereichtes Puzzle-Ergebnis aus PUZZLE_SOLVE
    pub fn ergebnis(&self) -> Option<&'a [u8]> {
        self.daten
            .get(ERGEBNIS_OFFSET..ERGEBNIS_OFFSET + PUZZLE_ZAHL_SIZE)
    }

    /// Eingebettetes Kommando nach dem Ergebnis
    pub fn kommando(&self) -> &'a [u8] {
        self.daten.get(PUZZLE_SOLVE_LAENGE..).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Server-Antworten
// ---------------------------------------------------------------------------

/// Verpackt eine Antwort in den Handshake-Umschlag
pub fn umschlag(inhalt: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENVELOPE_SIZE + inhalt.len());
    buf.extend_from_slice(INIT_MAGIC);
    buf.extend_from_slice(&INIT_PACKET_ID.to_be_bytes());
    buf.push(INIT_FLAGS);
    buf.extend_from_slice(inhalt);
    buf
}

/// COOKIE_SET: Schritt, Cookie, Nonce (in Netzwerk-Byte-Reihenfolge gedreht)
pub fn cookie_set(cookie: &[u8; COOKIE_SIZE], nonce: [u8; 4]) -> Vec<u8> {
    let mut inhalt = Vec::with_capacity(1 + COOKIE_SIZE + 4);
    inhalt.push(HandshakeStep::CookieSet as u8);
    inhalt.extend_from_slice(cookie);
    inhalt.extend_from_slice(&u32::from_le_bytes(nonce).to_be_bytes());
    umschlag(&inhalt)
}

/// PUZZLE_SET: Schritt, x, n, Level (little-endian), 100 Bytes reserviert
pub fn puzzle_set(
    x: &[u8; PUZZLE_ZAHL_SIZE],
    n: &[u8; PUZZLE_ZAHL_SIZE],
    level: u32,
) -> Vec<u8> {
    let mut inhalt = Vec::with_capacity(PUZZLE_SET_LAENGE);
    inhalt.push(HandshakeStep::PuzzleSet as u8);
    inhalt.extend_from_slice(x);
    inhalt.extend_from_slice(n);
    inhalt.extend_from_slice(&level.to_le_bytes());
    inhalt.resize(PUZZLE_SET_LAENGE, 0);
    umschlag(&inhalt)
}

/// COMMAND_RESET: zwingt den Client zurueck auf COOKIE_GET
pub fn command_reset() -> Vec<u8> {
    umschlag(&[HandshakeStep::CommandReset as u8, 0])
}

// ---------------------------------------------------------------------------
// Client-Seite (fuer Tests und Werkzeuge)
// ---------------------------------------------------------------------------

/// Baut ein Handshake-Paket eines Clients
pub fn client_anfrage(client_version: u32, schritt: HandshakeStep, rest: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MIN_PAKET_LAENGE + rest.len());
    buf.extend_from_slice(INIT_MAGIC);
    buf.extend_from_slice(&INIT_PACKET_ID.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.push(PacketType::Init1 as u8 | PacketFlags::UNENCRYPTED);
    buf.extend_from_slice(&client_version.to_be_bytes());
    buf.push(schritt as u8);
    buf.extend_from_slice(rest);
    buf
}

/// Gibt den Inhalt einer Server-Antwort hinter dem Umschlag zurueck
pub fn antwort_inhalt(datagramm: &[u8]) -> Option<&[u8]> {
    if datagramm.len() < ENVELOPE_SIZE || &datagramm[..MAC_SIZE] != INIT_MAGIC {
        return None;
    }
    Some(&datagramm[ENVELOPE_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn konstanten_passen_zum_wire_format() {
        assert_eq!(PUZZLE_SET_LAENGE, 233);
        assert_eq!(ERGEBNIS_OFFSET, 237);
        assert_eq!(ERGEBNIS_OFFSET + PUZZLE_ZAHL_SIZE, PUZZLE_SOLVE_LAENGE);
        assert_eq!(INIT_FLAGS, 0x88);
        assert_eq!(MIN_PAKET_LAENGE, 18);
    }

    #[test]
    fn umschlag_layout() {
        let roh = umschlag(&[1, 2, 3]);
        assert_eq!(&roh[..8], b"TS3INIT1");
        assert_eq!(&roh[8..10], &[0, 101]);
        assert_eq!(roh[10], 0x88);
        assert_eq!(&roh[11..], &[1, 2, 3]);
        assert_eq!(antwort_inhalt(&roh), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn cookie_get_felder() {
        let mut rest = vec![0u8; 16];
        rest[4..8].copy_from_slice(&[9, 8, 7, 6]);
        let roh = client_anfrage(0x1122_3344, HandshakeStep::CookieGet, &rest);
        let anfrage = InitRequest::parse(&roh).unwrap();
        assert_eq!(anfrage.client_version(), 0x1122_3344);
        assert_eq!(anfrage.schritt_byte(), 0);
        assert_eq!(anfrage.laenge(), COOKIE_GET_LAENGE);
        assert_eq!(anfrage.nonce(), Some([9, 8, 7, 6]));
    }

    #[test]
    fn cookie_set_dreht_nonce() {
        let roh = cookie_set(&[0xCC; 16], [1, 2, 3, 4]);
        let inhalt = antwort_inhalt(&roh).unwrap();
        assert_eq!(inhalt.len(), 21);
        assert_eq!(inhalt[0], HandshakeStep::CookieSet as u8);
        assert_eq!(&inhalt[1..17], &[0xCC; 16]);
        assert_eq!(&inhalt[17..21], &[4, 3, 2, 1]);
    }

    #[test]
    fn puzzle_set_layout() {
        let roh = puzzle_set(&[1; 64], &[2; 64], 0x0000_2710);
        let inhalt = antwort_inhalt(&roh).unwrap();
        assert_eq!(inhalt.len(), 233);
        assert_eq!(inhalt[0], 3);
        assert_eq!(&inhalt[1..65], &[1; 64][..]);
        assert_eq!(&inhalt[65..129], &[2; 64][..]);
        assert_eq!(&inhalt[129..133], &[0x10, 0x27, 0, 0]);
        assert!(inhalt[133..].iter().all(|b| *b == 0));
    }

    #[test]
    fn command_reset_layout() {
        assert_eq!(antwort_inhalt(&command_reset()), Some(&[127u8, 0][..]));
    }

    #[test]
    fn zu_kurzes_paket() {
        assert!(InitRequest::parse(&[0u8; 17]).is_err());
    }

    #[test]
    fn solve_ergebnis_und_kommando() {
        let mut rest = vec![0u8; PUZZLE_SOLVE_LAENGE - 5];
        rest[ERGEBNIS_OFFSET - 5..].fill(0x55);
        rest.extend_from_slice(b"clientinitiv alpha=abc");
        let roh = client_anfrage(1, HandshakeStep::PuzzleSolve, &rest);
        let anfrage = InitRequest::parse(&roh).unwrap();
        assert_eq!(anfrage.ergebnis(), Some(&[0x55u8; 64][..]));
        assert_eq!(anfrage.kommando(), b"clientinitiv alpha=abc");
    }

    #[test]
    fn schritte_sind_geordnet() {
        assert!(HandshakeStep::CookieGet < HandshakeStep::PuzzleGet);
        assert!(HandshakeStep::PuzzleSolve < HandshakeStep::Completed);
        assert_eq!(HandshakeStep::from_u8(127), Some(HandshakeStep::CommandReset));
        assert_eq!(HandshakeStep::from_u8(9), None);
    }
}
