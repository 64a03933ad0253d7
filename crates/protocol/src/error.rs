//! Fehlertypen fuer das Parsen von Wire-Formaten

use thiserror::Error;

/// Fehler beim Dekodieren eines Pakets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Paket zu kurz: {laenge} Bytes (erwartet mindestens {erwartet})")]
    ZuKurz { laenge: usize, erwartet: usize },

    #[error("Unbekannter Pakettyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Unbekannter Handshake-Schritt: {0}")]
    UnbekannterSchritt(u8),
}

impl PacketError {
    /// Prueft eine Mindestlaenge
    pub fn mindestens(laenge: usize, erwartet: usize) -> Result<(), Self> {
        if laenge < erwartet {
            Err(Self::ZuKurz { laenge, erwartet })
        } else {
            Ok(())
        }
    }
}
