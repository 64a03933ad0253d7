//! Transport-Zaehler
//!
//! Lock-freie Zaehler, die Sockets, Handshake und Sessions hochzaehlen.
//! Die Observability-Schicht liest sie ueber [`TransportStatistik::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Zaehler des Voice-Transports
#[derive(Debug, Default)]
pub struct TransportStatistik {
    pub datagramme_empfangen: AtomicU64,
    pub datagramme_gesendet: AtomicU64,
    pub datagramme_verworfen: AtomicU64,
    pub handshakes_abgeschlossen: AtomicU64,
    pub handshakes_zurueckgesetzt: AtomicU64,
    pub resends: AtomicU64,
    pub zustellfehler: AtomicU64,
    pub adresswechsel: AtomicU64,
}

/// Momentaufnahme der Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatistikSnapshot {
    pub datagramme_empfangen: u64,
    pub datagramme_gesendet: u64,
    pub datagramme_verworfen: u64,
    pub handshakes_abgeschlossen: u64,
    pub handshakes_zurueckgesetzt: u64,
    pub resends: u64,
    pub zustellfehler: u64,
    pub adresswechsel: u64,
}

impl TransportStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erhoeht einen Zaehler um `n`
    #[inline]
    pub fn erhoehen(zaehler: &AtomicU64, n: u64) {
        zaehler.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatistikSnapshot {
        StatistikSnapshot {
            datagramme_empfangen: self.datagramme_empfangen.load(Ordering::Relaxed),
            datagramme_gesendet: self.datagramme_gesendet.load(Ordering::Relaxed),
            datagramme_verworfen: self.datagramme_verworfen.load(Ordering::Relaxed),
            handshakes_abgeschlossen: self.handshakes_abgeschlossen.load(Ordering::Relaxed),
            handshakes_zurueckgesetzt: self.handshakes_zurueckgesetzt.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            zustellfehler: self.zustellfehler.load(Ordering::Relaxed),
            adresswechsel: self.adresswechsel.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_spiegelt_zaehler() {
        let stats = TransportStatistik::neu();
        TransportStatistik::erhoehen(&stats.datagramme_empfangen, 3);
        TransportStatistik::erhoehen(&stats.resends, 1);
        let snap = stats.snapshot();
        assert_eq!(snap.datagramme_empfangen, 3);
        assert_eq!(snap.resends, 1);
        assert_eq!(snap.zustellfehler, 0);
    }
}
