//! Retransmission bestaetigungspflichtiger Pakete
//!
//! Jede Session besitzt einen [`AcknowledgeManager`]. Er haelt alle
//! versendeten, aber noch nicht bestaetigten Kommandos, schaetzt die
//! Round-Trip-Time nach Jacobson/Karels und liefert beim periodischen
//! [`AcknowledgeManager::execute_resend`] die faelligen Pakete zurueck.
//!
//! Der Manager beendet nie selbst eine Session. Nicht zustellbare Pakete
//! werden als Fehlschlag gemeldet, der Besitzer entscheidet.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use tsvoice_protocol::{OutgoingPacket, PacketType};

use crate::error::{VoiceError, VoiceResult};

/// RTO vor der ersten Messung (ms)
const START_RTO_MS: f64 = 1000.0;

/// Obergrenze des RTO (ms)
const MAX_RTO_MS: f64 = 60_000.0;

/// Maximaler Abstand zwischen zwei Neuversuchen
const MAX_RESEND_ABSTAND: Duration = Duration::from_millis(1500);

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;

/// Einstellungen der Retransmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcknowledgeConfig {
    pub min_rto: Duration,
    pub max_resends: u32,
    /// Mindestdauer seit dem ersten Versand, bevor aufgegeben wird
    pub aufgabe_nach: Duration,
}

impl Default for AcknowledgeConfig {
    fn default() -> Self {
        Self {
            min_rto: Duration::ZERO,
            max_resends: 15,
            aufgabe_nach: Duration::from_secs(15),
        }
    }
}

/// Ein versendetes, noch unbestaetigtes Paket
#[derive(Debug, Clone)]
pub struct AcknowledgeEntry {
    pub packet_type: PacketType,
    pub packet_id: u16,
    pub generation: u16,
    /// Fertig serialisiertes Datagramm
    pub daten: Bytes,
    pub erster_versand: Instant,
    pub naechster_versand: Instant,
    pub resend_count: u32,
    pub send_count: u32,
}

/// Ergebnis eines Resend-Durchlaufs
#[derive(Debug, Default)]
pub struct ResendErgebnis {
    /// Erneut zu sendende Datagramme
    pub erneut: Vec<Bytes>,
    /// Aufgegebene Pakete
    pub fehlgeschlagen: Vec<AcknowledgeEntry>,
}

/// Ledger der ausstehenden Pakete einer Session mit RTO-Schaetzung
#[derive(Debug)]
pub struct AcknowledgeManager {
    eintraege: VecDeque<AcknowledgeEntry>,
    config: AcknowledgeConfig,
    rto: f64,
    srtt: Option<f64>,
    rttvar: f64,
}

impl AcknowledgeManager {
    pub fn neu(config: AcknowledgeConfig) -> Self {
        Self {
            eintraege: VecDeque::new(),
            config,
            rto: START_RTO_MS,
            srtt: None,
            rttvar: 0.0,
        }
    }

    /// Aktueller Retransmission-Timeout in Millisekunden
    pub fn rto(&self) -> f64 {
        self.rto
    }

    pub fn srtt(&self) -> Option<f64> {
        self.srtt
    }

    pub fn rttvar(&self) -> f64 {
        self.rttvar
    }

    /// Anzahl unbestaetigter Pakete
    pub fn ausstehend(&self) -> usize {
        self.eintraege.len()
    }

    fn rto_dauer(&self) -> Duration {
        Duration::from_millis(self.rto.ceil() as u64)
    }

    /// Registriert ein gerade versendetes Paket
    pub fn track(&mut self, paket: &OutgoingPacket, daten: Bytes, jetzt: Instant) {
        self.eintraege.push_back(AcknowledgeEntry {
            packet_type: paket.packet_type,
            packet_id: paket.packet_id,
            generation: paket.generation,
            daten,
            erster_versand: jetzt,
            naechster_versand: jetzt + self.rto_dauer(),
            resend_count: 0,
            send_count: 1,
        });
    }

    /// Verarbeitet ein ACK bzw. ACK_LOW
    ///
    /// Nur Pakete ohne Neuversuch liefern eine RTT-Messung (Karn).
    pub fn acknowledge(&mut self, ack_typ: PacketType, packet_id: u16, jetzt: Instant) -> VoiceResult<()> {
        let typ = match ack_typ {
            PacketType::AckLow => PacketType::CommandLow,
            _ => PacketType::Command,
        };

        let Some(pos) = self
            .eintraege
            .iter()
            .position(|e| e.packet_type == typ && e.packet_id == packet_id)
        else {
            return Err(VoiceError::UnbekanntePaketId {
                packet_type: typ,
                packet_id,
            });
        };

        let Some(eintrag) = self.eintraege.remove(pos) else {
            return Err(VoiceError::UnbekanntePaketId {
                packet_type: typ,
                packet_id,
            });
        };

        if eintrag.resend_count == 0 {
            let messung = jetzt.saturating_duration_since(eintrag.erster_versand);
            self.rtt_messen(messung.as_secs_f64() * 1000.0);
        }
        trace!(typ = ?typ, packet_id, versuche = eintrag.send_count, rto = self.rto, "Paket bestaetigt");
        Ok(())
    }

    fn rtt_messen(&mut self, messung: f64) {
        match self.srtt {
            None => {
                self.srtt = Some(messung);
                self.rttvar = messung / 2.0;
            }
            Some(srtt) => {
                self.rttvar += BETA * ((messung - srtt).abs() - self.rttvar);
                self.srtt = Some(srtt + ALPHA * (messung - srtt));
            }
        }
        let srtt = self.srtt.unwrap_or(messung);
        let min = self.config.min_rto.as_secs_f64() * 1000.0;
        self.rto = (srtt + 4.0 * self.rttvar).clamp(min, MAX_RTO_MS);
    }

    /// Sendet faellige Pakete erneut und senkt `naechster` auf den naechsten Termin
    pub fn execute_resend(&mut self, jetzt: Instant, naechster: &mut Instant) -> ResendErgebnis {
        let mut ergebnis = ResendErgebnis::default();
        let abstand = self.rto_dauer().min(MAX_RESEND_ABSTAND);
        let config = self.config;

        self.eintraege.retain_mut(|eintrag| {
            if eintrag.naechster_versand > jetzt {
                *naechster = (*naechster).min(eintrag.naechster_versand);
                return true;
            }
            if eintrag.resend_count >= config.max_resends
                && eintrag.erster_versand + config.aufgabe_nach <= jetzt
            {
                ergebnis.fehlgeschlagen.push(eintrag.clone());
                return false;
            }

            eintrag.naechster_versand = jetzt + abstand;
            eintrag.resend_count += 1;
            eintrag.send_count += 1;
            ergebnis.erneut.push(eintrag.daten.clone());
            *naechster = (*naechster).min(eintrag.naechster_versand);
            true
        });

        ergebnis
    }

    /// Verwirft alle Eintraege und meldet sie als nicht zugestellt
    pub fn reset(&mut self) -> Vec<AcknowledgeEntry> {
        self.eintraege.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paket(typ: PacketType, id: u16) -> OutgoingPacket {
        OutgoingPacket {
            packet_type: typ,
            flags: 0,
            packet_id: id,
            generation: 0,
            payload: Bytes::from_static(b"x"),
        }
    }

    fn manager() -> AcknowledgeManager {
        AcknowledgeManager::neu(AcknowledgeConfig::default())
    }

    #[test]
    fn start_rto_ist_eine_sekunde() {
        let m = manager();
        assert_eq!(m.rto(), 1000.0);
        assert!(m.srtt().is_none());
    }

    #[test]
    fn rto_konvergiert_gegen_konstante_rtt() {
        let mut m = manager();
        let t0 = Instant::now();
        for i in 0..200u16 {
            let start = t0 + Duration::from_millis(u64::from(i) * 100);
            m.track(&paket(PacketType::Command, i), Bytes::new(), start);
            m.acknowledge(PacketType::Ack, i, start + Duration::from_millis(40))
                .unwrap();
        }
        assert!((m.srtt().unwrap() - 40.0).abs() < 1e-6);
        assert!(m.rttvar() < 1e-6);
        assert!((m.rto() - 40.0).abs() < 1e-3);
    }

    #[test]
    fn erste_messung_initialisiert() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::new(), t0);
        m.acknowledge(PacketType::Ack, 1, t0 + Duration::from_millis(100))
            .unwrap();
        assert_eq!(m.srtt(), Some(100.0));
        assert_eq!(m.rttvar(), 50.0);
        assert_eq!(m.rto(), 300.0);
    }

    #[test]
    fn min_rto_begrenzt() {
        let mut m = AcknowledgeManager::neu(AcknowledgeConfig {
            min_rto: Duration::from_millis(200),
            ..AcknowledgeConfig::default()
        });
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::new(), t0);
        m.acknowledge(PacketType::Ack, 1, t0 + Duration::from_millis(10))
            .unwrap();
        assert_eq!(m.rto(), 200.0);
    }

    #[test]
    fn ack_low_bestaetigt_nur_command_low() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 3), Bytes::new(), t0);
        m.track(&paket(PacketType::CommandLow, 3), Bytes::new(), t0);

        m.acknowledge(PacketType::AckLow, 3, t0).unwrap();
        assert_eq!(m.ausstehend(), 1);
        assert!(matches!(
            m.acknowledge(PacketType::AckLow, 3, t0),
            Err(VoiceError::UnbekanntePaketId { packet_id: 3, .. })
        ));
        m.acknowledge(PacketType::Ack, 3, t0).unwrap();
        assert_eq!(m.ausstehend(), 0);
    }

    #[test]
    fn resend_vor_termin_sendet_nichts() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::from_static(b"a"), t0);

        let mut naechster = t0 + Duration::from_secs(100);
        let ergebnis = m.execute_resend(t0 + Duration::from_millis(999), &mut naechster);
        assert!(ergebnis.erneut.is_empty());
        assert!(ergebnis.fehlgeschlagen.is_empty());
        assert_eq!(naechster, t0 + Duration::from_millis(1000));
    }

    #[test]
    fn resend_nach_termin_sendet_genau_faellige() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::from_static(b"a"), t0);
        m.track(
            &paket(PacketType::Command, 2),
            Bytes::from_static(b"b"),
            t0 + Duration::from_millis(500),
        );

        let jetzt = t0 + Duration::from_millis(1200);
        let mut naechster = jetzt + Duration::from_secs(100);
        let ergebnis = m.execute_resend(jetzt, &mut naechster);
        assert_eq!(ergebnis.erneut, vec![Bytes::from_static(b"a")]);
        assert_eq!(naechster, t0 + Duration::from_millis(1500));

        let eintrag = &m.eintraege[0];
        assert_eq!(eintrag.resend_count, 1);
        assert_eq!(eintrag.send_count, 2);
        assert_eq!(eintrag.naechster_versand, jetzt + Duration::from_millis(1000));
    }

    #[test]
    fn nach_neuversuch_keine_messung() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::new(), t0);
        let mut naechster = t0;
        m.execute_resend(t0 + Duration::from_secs(1), &mut naechster);
        m.acknowledge(PacketType::Ack, 1, t0 + Duration::from_millis(1100))
            .unwrap();
        assert!(m.srtt().is_none());
        assert_eq!(m.rto(), 1000.0);
    }

    #[test]
    fn aufgabe_braucht_anzahl_und_zeitfenster() {
        let mut m = AcknowledgeManager::neu(AcknowledgeConfig {
            min_rto: Duration::ZERO,
            max_resends: 2,
            aufgabe_nach: Duration::from_secs(10),
        });
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::new(), t0);

        let mut jetzt = t0;
        let mut naechster = t0;
        for _ in 0..5 {
            jetzt += Duration::from_millis(1500);
            let ergebnis = m.execute_resend(jetzt, &mut naechster);
            assert!(ergebnis.fehlgeschlagen.is_empty());
        }
        assert_eq!(m.eintraege[0].resend_count, 5);

        let ergebnis = m.execute_resend(t0 + Duration::from_secs(10), &mut naechster);
        assert_eq!(ergebnis.fehlgeschlagen.len(), 1);
        assert_eq!(ergebnis.fehlgeschlagen[0].packet_id, 1);
        assert_eq!(m.ausstehend(), 0);
    }

    #[test]
    fn reset_meldet_alle() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::new(), t0);
        m.track(&paket(PacketType::CommandLow, 1), Bytes::new(), t0);
        assert_eq!(m.reset().len(), 2);
        assert_eq!(m.ausstehend(), 0);
    }

    #[test]
    fn bestaetigtes_paket_wird_nie_erneut_gesendet() {
        let mut m = manager();
        let t0 = Instant::now();
        m.track(&paket(PacketType::Command, 1), Bytes::from_static(b"a"), t0);
        m.track(&paket(PacketType::Command, 2), Bytes::from_static(b"b"), t0);
        m.acknowledge(PacketType::Ack, 1, t0 + Duration::from_millis(50))
            .unwrap();

        let jetzt = t0 + Duration::from_secs(5);
        let mut naechster = jetzt + Duration::from_secs(100);
        let ergebnis = m.execute_resend(jetzt, &mut naechster);
        assert_eq!(ergebnis.erneut, vec![Bytes::from_static(b"b")]);
        assert_eq!(m.ausstehend(), 1);
        assert_eq!(m.eintraege[0].packet_id, 2);
    }
}
