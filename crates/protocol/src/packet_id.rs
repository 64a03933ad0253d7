//! 16-Bit Paket-ID-Arithmetik
//!
//! Paket-IDs laufen bei 65535 auf 0 ueber. Vergleiche und Differenzen
//! behandeln den Ueberlauf als zusammenhaengend, solange beide IDs
//! innerhalb eines festen Fensters liegen.

use crate::packet::PacketType;

/// Maximale Anzahl als verloren tolerierter Pakete beim Einsortieren
pub const MAX_LOST_PACKETS: u16 = 6;

/// Fenster, innerhalb dessen eine Reihenfolge angenommen wird
pub const ORDER_WINDOW: u16 = 10;

/// Prueft ob `lower` vor `upper` liegt
///
/// Eine Reihenfolge gilt nur innerhalb von `window` IDs hinter `lower`,
/// auch ueber den Ueberlauf hinweg (`65535` liegt vor `0`). Weiter
/// entfernte IDs sind in keiner Richtung "kleiner".
pub fn packet_id_less(lower: u16, upper: u16, window: u16) -> bool {
    let abstand = packet_id_diff(lower, upper);
    abstand != 0 && abstand <= window
}

/// Abstand von `lower` nach `upper` modulo 65536
pub fn packet_id_diff(lower: u16, upper: u16) -> u16 {
    upper.wrapping_sub(lower)
}

// ---------------------------------------------------------------------------
// PacketIdGenerator
// ---------------------------------------------------------------------------

/// Vergibt ausgehende Paket-IDs pro Pakettyp
///
/// Jeder Typ hat einen eigenen 16-Bit Zaehler; beim Ueberlauf steigt die
/// Generation, sodass `generation << 16 | id` eindeutig bleibt.
#[derive(Debug, Clone, Default)]
pub struct PacketIdGenerator {
    ids: [u16; PacketType::ANZAHL],
    generationen: [u16; PacketType::ANZAHL],
}

impl PacketIdGenerator {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Gibt die naechste `(packet_id, generation)` fuer einen Typ zurueck
    pub fn naechste(&mut self, typ: PacketType) -> (u16, u16) {
        let i = typ.index();
        let id = self.ids[i];
        let generation = self.generationen[i];
        self.ids[i] = id.wrapping_add(1);
        if self.ids[i] == 0 {
            self.generationen[i] = generation.wrapping_add(1);
        }
        (id, generation)
    }

    /// Setzt alle Zaehler zurueck
    pub fn zuruecksetzen(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn einfacher_vergleich() {
        assert!(packet_id_less(4, 5, ORDER_WINDOW));
        assert!(!packet_id_less(5, 4, ORDER_WINDOW));
        assert!(!packet_id_less(5, 5, ORDER_WINDOW));
    }

    #[test]
    fn vergleich_ueber_ueberlauf() {
        assert!(packet_id_less(65535, 0, ORDER_WINDOW));
        assert!(packet_id_less(65530, 3, ORDER_WINDOW));
        assert!(!packet_id_less(0, 65535, ORDER_WINDOW));
        assert!(!packet_id_less(3, 65530, ORDER_WINDOW));
    }

    #[test]
    fn ausserhalb_des_fensters_keine_reihenfolge() {
        // 100 liegt nicht im Fenster hinter dem Ueberlauf
        assert!(!packet_id_less(65535, 100, ORDER_WINDOW));
        assert!(!packet_id_less(100, 65535, ORDER_WINDOW));
        assert!(!packet_id_less(4, 30000, MAX_LOST_PACKETS));
        assert!(!packet_id_less(30000, 4, MAX_LOST_PACKETS));
    }

    #[test]
    fn fenstergrenze_ist_inklusiv() {
        assert!(packet_id_less(4, 10, MAX_LOST_PACKETS));
        assert!(!packet_id_less(4, 11, MAX_LOST_PACKETS));
        assert!(packet_id_less(65533, 3, MAX_LOST_PACKETS));
        assert!(!packet_id_less(65532, 3, MAX_LOST_PACKETS));
    }

    #[test]
    fn differenz_mit_ueberlauf() {
        assert_eq!(packet_id_diff(4, 7), 3);
        assert_eq!(packet_id_diff(65535, 0), 1);
        assert_eq!(packet_id_diff(65530, 4), 10);
        assert_eq!(packet_id_diff(7, 7), 0);
    }

    #[test]
    fn generator_pro_typ() {
        let mut gen = PacketIdGenerator::neu();
        assert_eq!(gen.naechste(PacketType::Command), (0, 0));
        assert_eq!(gen.naechste(PacketType::Command), (1, 0));
        assert_eq!(gen.naechste(PacketType::Ping), (0, 0));
    }

    #[test]
    fn generator_generation_bei_ueberlauf() {
        let mut gen = PacketIdGenerator::neu();
        gen.ids[PacketType::Command.index()] = u16::MAX;
        assert_eq!(gen.naechste(PacketType::Command), (u16::MAX, 0));
        assert_eq!(gen.naechste(PacketType::Command), (0, 1));
    }
}
