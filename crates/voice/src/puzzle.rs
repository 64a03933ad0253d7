//! Vorberechnete Zeitschloss-Puzzles fuer den Admission-Handshake
//!
//! Ein Puzzle ist `x^(2^level) mod n` mit 512-Bit-Zahlen. Der Server kennt
//! das Ergebnis vorab, der Client muss `level` Quadrierungen rechnen. Die
//! Erzeugung ist teuer und passiert daher im [`PuzzlePool`] vor dem Start,
//! nie im Empfangspfad.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;
use rand::RngCore;
use tsvoice_protocol::init::PUZZLE_ZAHL_SIZE;

/// Ab so vielen Null-Einsendungen wird ein Puzzle ersetzt
const MAX_FEHLVERSUCHE: u32 = 2;

/// Ein unveraenderliches Puzzle
#[derive(Debug)]
pub struct Puzzle {
    x: [u8; PUZZLE_ZAHL_SIZE],
    n: [u8; PUZZLE_ZAHL_SIZE],
    level: u32,
    ergebnis: [u8; PUZZLE_ZAHL_SIZE],
    fail_count: AtomicU32,
}

impl Puzzle {
    /// Erzeugt ein zufaelliges Puzzle und berechnet sein Ergebnis
    pub fn generieren(level: u32, rng: &mut impl RngCore) -> Self {
        let mut n_roh = [0u8; PUZZLE_ZAHL_SIZE];
        rng.fill_bytes(&mut n_roh);
        // Volle 512 Bit und ungerade
        n_roh[0] |= 0x80;
        n_roh[PUZZLE_ZAHL_SIZE - 1] |= 0x01;
        let n = BigUint::from_bytes_be(&n_roh);

        let mut x_roh = [0u8; PUZZLE_ZAHL_SIZE];
        rng.fill_bytes(&mut x_roh);
        let mut x = BigUint::from_bytes_be(&x_roh) % &n;
        if x < BigUint::from(2u32) {
            x = BigUint::from(2u32);
        }

        Self::aus_zahlen(&x, &n, level)
    }

    /// Baut ein Puzzle aus gegebenen Zahlen (x < n)
    pub fn aus_zahlen(x: &BigUint, n: &BigUint, level: u32) -> Self {
        let ergebnis = Self::loesen(x, n, level);
        Self {
            x: auf_breite(x),
            n: auf_breite(n),
            level,
            ergebnis: auf_breite(&ergebnis),
            fail_count: AtomicU32::new(0),
        }
    }

    /// `x^(2^level) mod n`
    pub fn loesen(x: &BigUint, n: &BigUint, level: u32) -> BigUint {
        let exponent = BigUint::from(1u32) << (level as usize);
        x.modpow(&exponent, n)
    }

    pub fn x(&self) -> &[u8; PUZZLE_ZAHL_SIZE] {
        &self.x
    }

    pub fn n(&self) -> &[u8; PUZZLE_ZAHL_SIZE] {
        &self.n
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Erwartetes Ergebnis (big-endian, links mit Nullen aufgefuellt)
    pub fn ergebnis(&self) -> &[u8; PUZZLE_ZAHL_SIZE] {
        &self.ergebnis
    }

    /// Byte-genauer Vergleich mit einer Einsendung
    pub fn pruefen(&self, eingereicht: &[u8]) -> bool {
        eingereicht == self.ergebnis.as_slice()
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count.load(Ordering::Relaxed)
    }

    /// Zaehlt eine leere Einsendung
    pub fn fehlversuch(&self) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
    }

    fn verbraucht(&self) -> bool {
        self.fail_count() > MAX_FEHLVERSUCHE
    }
}

/// Schreibt eine Zahl big-endian in genau 64 Bytes
fn auf_breite(zahl: &BigUint) -> [u8; PUZZLE_ZAHL_SIZE] {
    let bytes = zahl.to_bytes_be();
    let mut ziel = [0u8; PUZZLE_ZAHL_SIZE];
    let laenge = bytes.len().min(PUZZLE_ZAHL_SIZE);
    ziel[PUZZLE_ZAHL_SIZE - laenge..].copy_from_slice(&bytes[bytes.len() - laenge..]);
    ziel
}

// ---------------------------------------------------------------------------
// PuzzlePool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PoolInner {
    puzzles: Vec<Arc<Puzzle>>,
    index: usize,
}

/// Gemeinsamer Vorrat an Puzzles
///
/// Puzzles werden reihum vergeben. Ein Puzzle mit mehr als zwei leeren
/// Einsendungen wird beim naechsten Zugriff entfernt und durch ein neues
/// ersetzt.
#[derive(Debug)]
pub struct PuzzlePool {
    level: u32,
    groesse: usize,
    inner: Mutex<PoolInner>,
}

impl PuzzlePool {
    pub fn neu(level: u32, groesse: usize) -> Self {
        Self {
            level,
            groesse: groesse.max(1),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Fuellt den Vorrat bis zur konfigurierten Groesse auf
    pub fn vorberechnen(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut inner = self.inner.lock();
        while inner.puzzles.len() < self.groesse {
            inner.puzzles.push(Arc::new(Puzzle::generieren(self.level, &mut rng)));
        }
        tracing::info!(anzahl = inner.puzzles.len(), level = self.level, "Puzzles vorberechnet");
        inner.puzzles.len()
    }

    /// Naechstes Puzzle (reihum)
    pub fn naechstes(&self) -> Arc<Puzzle> {
        let mut inner = self.inner.lock();
        loop {
            if inner.puzzles.is_empty() {
                let neu = Arc::new(Puzzle::generieren(self.level, &mut rand::thread_rng()));
                inner.puzzles.push(neu);
            }

            let index = inner.index % inner.puzzles.len();
            inner.index = inner.index.wrapping_add(1);

            if inner.puzzles[index].verbraucht() {
                tracing::debug!(index, "Puzzle nach Fehlversuchen ersetzt");
                inner.puzzles.remove(index);
                let neu = Arc::new(Puzzle::generieren(self.level, &mut rand::thread_rng()));
                inner.puzzles.push(neu);
                continue;
            }
            return Arc::clone(&inner.puzzles[index]);
        }
    }

    pub fn anzahl(&self) -> usize {
        self.inner.lock().puzzles.len()
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}
