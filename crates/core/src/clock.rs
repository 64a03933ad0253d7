//! Zeitquellen fuer zeitbegrenzte Handler und Timer
//!
//! Alle Komponenten mit Zeitbudgets oder Dead-Man-Timern lesen die Zeit
//! ueber [`Clock`]. Im Betrieb ist das [`SystemClock`], in Tests eine
//! [`ManualClock`], die explizit vorgestellt wird.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotone Zeitquelle
pub trait Clock: Send + Sync {
    /// Aktueller Zeitpunkt
    fn now(&self) -> Instant;
}

/// Systemuhr (`Instant::now()`)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manuell gesteuerte Uhr fuer deterministische Tests
///
/// Optional mit Auto-Vorschub: jeder Aufruf von `now()` stellt die Uhr um
/// den Schritt vor. Damit laesst sich ein Zeitbudget ohne echte Wartezeit
/// ausschoepfen.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Debug)]
struct ManualInner {
    jetzt: Instant,
    schritt: Duration,
}

impl ManualClock {
    /// Erstellt eine Uhr ab dem aktuellen Zeitpunkt ohne Auto-Vorschub
    pub fn neu() -> Self {
        Self::mit_schritt(Duration::ZERO)
    }

    /// Erstellt eine Uhr, die bei jedem `now()` um `schritt` vorrueckt
    pub fn mit_schritt(schritt: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                jetzt: Instant::now(),
                schritt,
            })),
        }
    }

    /// Stellt die Uhr um `dauer` vor
    pub fn vorstellen(&self, dauer: Duration) {
        self.inner.lock().jetzt += dauer;
    }

    /// Setzt den Auto-Vorschub
    pub fn schritt_setzen(&self, schritt: Duration) {
        self.inner.lock().schritt = schritt;
    }

    /// Liest die Zeit ohne Auto-Vorschub
    pub fn ansehen(&self) -> Instant {
        self.inner.lock().jetzt
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::neu()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut inner = self.inner.lock();
        let jetzt = inner.jetzt;
        let schritt = inner.schritt;
        inner.jetzt += schritt;
        jetzt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manuelle_uhr_steht_still() {
        let uhr = ManualClock::neu();
        assert_eq!(uhr.now(), uhr.now());
    }

    #[test]
    fn manuelle_uhr_vorstellen() {
        let uhr = ManualClock::neu();
        let start = uhr.now();
        uhr.vorstellen(Duration::from_millis(250));
        assert_eq!(uhr.now() - start, Duration::from_millis(250));
    }

    #[test]
    fn manuelle_uhr_auto_vorschub() {
        let uhr = ManualClock::mit_schritt(Duration::from_micros(100));
        let a = uhr.now();
        let b = uhr.now();
        assert_eq!(b - a, Duration::from_micros(100));
        assert_eq!(uhr.ansehen() - b, Duration::from_micros(100));
    }
}
