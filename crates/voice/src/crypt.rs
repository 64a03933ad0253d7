//! Kryptografie-Schnittstelle des Transports
//!
//! Schluesselaustausch und Paketverschluesselung liegen ausserhalb des
//! Transports. Er braucht nur zwei Faehigkeiten: die MAC eines
//! eingehenden Pakets pruefen (Voraussetzung fuer einen Adresswechsel)
//! und ausgehende Pakete signieren.

use tsvoice_protocol::packet::MAC_SIZE;
use tsvoice_protocol::ClientPacket;

/// Pruefen und Signieren von Session-Paketen
pub trait CryptHandler: Send + Sync {
    /// `true` wenn die MAC des Pakets zur Session passt
    fn verify(&self, paket: &ClientPacket<'_>) -> bool;

    /// MAC fuer ein ausgehendes Paket
    fn mac(&self, header: &[u8], payload: &[u8]) -> [u8; MAC_SIZE];
}

/// Platzhalter ohne Schluessel: nichts ist verifiziert, MACs sind leer
#[derive(Debug, Default, Clone, Copy)]
pub struct KeinCrypt;

impl CryptHandler for KeinCrypt {
    fn verify(&self, _paket: &ClientPacket<'_>) -> bool {
        false
    }

    fn mac(&self, _header: &[u8], _payload: &[u8]) -> [u8; MAC_SIZE] {
        [0; MAC_SIZE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsvoice_protocol::packet::client_paket_bauen;
    use tsvoice_protocol::PacketType;

    #[test]
    fn ohne_schluessel_keine_verifikation() {
        let roh = client_paket_bauen(PacketType::Command, 0, 1, 1, b"x");
        let paket = ClientPacket::parse(&roh).unwrap();
        assert!(!KeinCrypt.verify(&paket));
        assert_eq!(KeinCrypt.mac(&[0, 1, 2], b"x"), [0; MAC_SIZE]);
    }
}
