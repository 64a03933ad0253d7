//! Ausgabepuffer einer Audio-Quelle mit Ein- und Ausblenden
//!
//! Dekodierte Samples landen hier, der Mixer holt sie mit
//! [`AudioOutputSource::pop_samples`] ab. Der Puffer selbst ist ein
//! kleiner Zustandsautomat:
//!
//! ```text
//! Buffering --(min. Fuellstand erreicht, Fade-In)--> Playing
//! Playing   --(Unterlauf, Fade-Out ueber den Rest)--> Fadeout
//! Fadeout   --(Rest ausgespielt)--> Buffering
//! ```
//!
//! Alle Mengen sind Samples pro Kanal; gespeichert wird interleaved.

use std::collections::VecDeque;

/// Laenge des Einblendens in Millisekunden
const FADEIN_MS: usize = 20;

/// Laenge des Ausblendens in Millisekunden
const FADEOUT_MS: usize = 16;

/// Zustand des Ausgabepuffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Es wird gepuffert, nichts wird ausgegeben
    Buffering,
    /// Normale Wiedergabe
    Playing,
    /// Die letzten, ausgeblendeten Samples werden ausgespielt
    Fadeout,
}

/// Verhalten wenn mehr Samples ankommen als gepuffert werden duerfen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowStrategy {
    /// Ueberzaehlige Eingabe verwerfen, Puffer behalten
    #[default]
    Ignore,
    /// Ueberzaehlige Eingabe verwerfen und den Aufrufer darauf hinweisen
    DiscardInput,
    /// Gesamten Puffer leeren
    DiscardBufferAll,
    /// Aeltere Haelfte des Puffers verwerfen
    DiscardBufferHalf,
}

/// Ergebnis von [`AudioOutputSource::enqueue_samples`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueErgebnis {
    /// Geschriebene Samples pro Kanal
    pub geschrieben: usize,
    /// Verworfene Samples pro Kanal (Ueberlauf)
    pub verworfen: usize,
}

/// Puffer einer einzelnen Audio-Quelle
#[derive(Debug)]
pub struct AudioOutputSource {
    channel_count: usize,
    sample_rate: u32,
    puffer: VecDeque<f32>,
    state: BufferState,
    min_buffered_samples: usize,
    max_buffered_samples: usize,
    fadein_frame_samples: usize,
    fadeout_frame_samples: usize,
    fadeout_samples_left: usize,
    pub overflow_strategy: OverflowStrategy,
}

impl AudioOutputSource {
    /// Erstellt einen Puffer; Min. 40 ms, Max. 500 ms
    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        let rate = sample_rate as usize;
        let fadein = rate * FADEIN_MS / 1000;
        let mut quelle = Self {
            channel_count: channel_count.max(1),
            sample_rate,
            puffer: VecDeque::new(),
            state: BufferState::Buffering,
            min_buffered_samples: fadein,
            max_buffered_samples: (rate * 500).div_ceil(1000),
            fadein_frame_samples: fadein,
            fadeout_frame_samples: rate * FADEOUT_MS / 1000,
            fadeout_samples_left: 0,
            overflow_strategy: OverflowStrategy::Ignore,
        };
        quelle.set_min_buffered_samples((rate * 40).div_ceil(1000));
        quelle
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Gepufferte Samples pro Kanal
    pub fn currently_buffered_samples(&self) -> usize {
        self.puffer.len() / self.channel_count
    }

    pub fn min_buffered_samples(&self) -> usize {
        self.min_buffered_samples
    }

    pub fn max_buffered_samples(&self) -> usize {
        self.max_buffered_samples
    }

    pub fn fadein_frame_samples(&self) -> usize {
        self.fadein_frame_samples
    }

    pub fn fadeout_frame_samples(&self) -> usize {
        self.fadeout_frame_samples
    }

    /// Leert den Puffer und kehrt in den Buffering-Zustand zurueck
    pub fn clear(&mut self) {
        self.puffer.clear();
        self.state = BufferState::Buffering;
        self.fadeout_samples_left = 0;
    }

    /// Setzt den Mindestfuellstand (mindestens ein Fade-In-Fenster)
    ///
    /// Gibt `false` zurueck wenn der Wert ueber dem Maximum liegt.
    pub fn set_min_buffered_samples(&mut self, samples: usize) -> bool {
        let samples = samples.max(self.fadein_frame_samples);
        if samples > self.max_buffered_samples {
            return false;
        }
        self.min_buffered_samples = samples;

        if self.state != BufferState::Playing {
            let gepuffert = self.currently_buffered_samples() - self.fadeout_samples_left;
            if gepuffert > self.min_buffered_samples {
                self.apply_fadein();
                self.state = BufferState::Playing;
            }
        }
        true
    }

    /// Setzt den Hoechstfuellstand
    ///
    /// Gibt `false` zurueck wenn der Wert unter dem Minimum liegt.
    pub fn set_max_buffered_samples(&mut self, samples: usize) -> bool {
        let samples = samples.max(self.fadein_frame_samples);
        if samples < self.min_buffered_samples {
            return false;
        }
        self.max_buffered_samples = samples;
        true
    }

    // -----------------------------------------------------------------------
    // Blenden
    // -----------------------------------------------------------------------

    /// Blendet die letzten Samples des Puffers aus
    fn apply_fadeout(&mut self) {
        let fade = self
            .currently_buffered_samples()
            .min(self.fadeout_frame_samples);
        if fade == 0 {
            self.fadeout_samples_left = 0;
            return;
        }

        let start = self.puffer.len() - fade * self.channel_count;
        for index in 0..fade {
            let offset = (index + 1) as f32 / fade as f32;
            let gain = (offset.log10() / -std::f32::consts::E).min(1.0);
            for k in 0..self.channel_count {
                self.puffer[start + index * self.channel_count + k] *= gain;
            }
        }
        self.fadeout_samples_left = fade;
    }

    /// Blendet die ersten Samples nach einem noch ausstehenden Fade-Out ein
    fn apply_fadein(&mut self) {
        let verfuegbar = self.currently_buffered_samples() - self.fadeout_samples_left;
        let fade = verfuegbar.min(self.fadein_frame_samples);
        if fade == 0 {
            return;
        }

        let start = self.fadeout_samples_left * self.channel_count;
        for index in 0..fade {
            let offset = (index + 1) as f32 / fade as f32;
            let gain = ((1.0 - offset).log10() / -std::f32::consts::E).min(1.0);
            for k in 0..self.channel_count {
                self.puffer[start + index * self.channel_count + k] *= gain;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Schreiben
    // -----------------------------------------------------------------------

    /// Fuegt `sample_count` Samples (interleaved) hinzu
    pub fn enqueue_samples(&mut self, samples: &[f32], sample_count: usize) -> EnqueueErgebnis {
        let sample_count = sample_count.min(samples.len() / self.channel_count);
        let geschrieben = self.enqueue_intern(&samples[..sample_count * self.channel_count]);
        EnqueueErgebnis {
            geschrieben,
            verworfen: sample_count - geschrieben,
        }
    }

    fn enqueue_intern(&mut self, samples: &[f32]) -> usize {
        let ch = self.channel_count;
        let anzahl = samples.len() / ch;

        match self.state {
            BufferState::Buffering | BufferState::Fadeout => {
                let gepuffert = self.currently_buffered_samples() - self.fadeout_samples_left;
                let fehlend = self.min_buffered_samples.saturating_sub(gepuffert);
                let schreiben = fehlend.min(anzahl);
                self.puffer.extend(&samples[..schreiben * ch]);

                if anzahl < fehlend {
                    return anzahl;
                }

                // Puffer gefuellt: ein noch ausstehender Fade-Out zaehlt als normale Daten
                self.fadeout_samples_left = 0;
                tracing::trace!(samples = self.min_buffered_samples, "Pufferung abgeschlossen, blende ein");
                self.apply_fadein();
                self.state = BufferState::Playing;

                if anzahl > schreiben {
                    schreiben + self.enqueue_intern(&samples[schreiben * ch..])
                } else {
                    schreiben
                }
            }

            BufferState::Playing => {
                let frei = self
                    .max_buffered_samples
                    .saturating_sub(self.currently_buffered_samples());
                let schreiben = frei.min(anzahl);
                self.puffer.extend(&samples[..schreiben * ch]);

                if schreiben < anzahl {
                    tracing::debug!(
                        ueberlauf = anzahl - schreiben,
                        strategie = ?self.overflow_strategy,
                        "Audio-Pufferueberlauf"
                    );
                    match self.overflow_strategy {
                        OverflowStrategy::Ignore | OverflowStrategy::DiscardInput => {}
                        OverflowStrategy::DiscardBufferAll => self.puffer.clear(),
                        OverflowStrategy::DiscardBufferHalf => {
                            let halb = self.currently_buffered_samples() / 2;
                            self.puffer.drain(..halb * ch);
                        }
                    }
                }
                schreiben
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lesen
    // -----------------------------------------------------------------------

    /// Liest `ziel.len() / channel_count` Samples ohne Unterlauf-Behandlung
    pub fn pop_samples(&mut self, ziel: &mut [f32]) -> bool {
        self.pop_samples_mit(ziel, &mut |_| false)
    }

    /// Liest Samples in `ziel`
    ///
    /// Reicht der Puffer nicht fuer Ausgabe plus Fade-Out-Fenster, wird
    /// `unterlauf` mit der fehlenden Menge aufgerufen. Liefert der
    /// Callback `true`, wurde nachgefuellt und es wird erneut gelesen.
    /// Gibt `false` zurueck wenn nichts auszugeben ist (Buffering).
    pub fn pop_samples_mit(
        &mut self,
        ziel: &mut [f32],
        unterlauf: &mut dyn FnMut(usize) -> bool,
    ) -> bool {
        let ch = self.channel_count;
        let angefordert = ziel.len() / ch;

        match self.state {
            BufferState::Fadeout => {
                let schreiben = self.fadeout_samples_left.min(angefordert);
                self.kopieren(&mut ziel[..schreiben * ch]);
                ziel[schreiben * ch..].fill(0.0);

                self.fadeout_samples_left -= schreiben;
                if self.fadeout_samples_left == 0 {
                    tracing::trace!("Fade-Out ausgespielt");
                    self.state = BufferState::Buffering;
                }
                true
            }

            BufferState::Playing => {
                let gepuffert = self.currently_buffered_samples();
                if gepuffert >= angefordert + self.fadeout_frame_samples {
                    self.kopieren(&mut ziel[..angefordert * ch]);
                    return true;
                }

                let fehlend = angefordert + self.fadeout_frame_samples - gepuffert;
                if unterlauf(fehlend) {
                    return self.pop_samples_mit(ziel, unterlauf);
                }

                // Nach dem Lesen waere kein Fade-Out mehr moeglich: jetzt ausblenden
                self.apply_fadeout();
                let schreiben = gepuffert - self.fadeout_samples_left;
                self.kopieren(&mut ziel[..schreiben * ch]);
                self.state = BufferState::Fadeout;
                if schreiben < angefordert {
                    self.pop_samples_mit(&mut ziel[schreiben * ch..], unterlauf);
                }
                true
            }

            BufferState::Buffering => false,
        }
    }

    fn kopieren(&mut self, ziel: &mut [f32]) {
        let n = ziel.len();
        for (z, s) in ziel.iter_mut().zip(self.puffer.drain(..n)) {
            *z = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quelle() -> AudioOutputSource {
        // 1 kHz, damit die Fenster klein bleiben: Fade-In 20, Fade-Out 16, Min 40
        AudioOutputSource::new(1, 1000)
    }

    #[test]
    fn fenstergroessen() {
        let q = AudioOutputSource::new(2, 48_000);
        assert_eq!(q.fadein_frame_samples(), 960);
        assert_eq!(q.fadeout_frame_samples(), 768);
        assert_eq!(q.min_buffered_samples(), 1920);
        assert_eq!(q.max_buffered_samples(), 24_000);
    }

    #[test]
    fn buffering_bis_mindestfuellstand() {
        let mut q = quelle();
        q.enqueue_samples(&[1.0; 30], 30);
        assert_eq!(q.state(), BufferState::Buffering);
        let mut ziel = [0.5f32; 10];
        assert!(!q.pop_samples(&mut ziel));

        q.enqueue_samples(&[1.0; 30], 30);
        assert_eq!(q.state(), BufferState::Playing);
        assert_eq!(q.currently_buffered_samples(), 60);
    }

    #[test]
    fn fade_in_ist_monoton_steigend() {
        let mut q = quelle();
        q.enqueue_samples(&[1.0; 40], 40);
        let mut ziel = [0.0f32; 20];
        assert!(q.pop_samples(&mut ziel));
        assert!(ziel[0] < 0.1, "Anfang muss leise sein: {}", ziel[0]);
        for paar in ziel.windows(2) {
            assert!(paar[1] >= paar[0], "Fade-In nicht monoton: {:?}", paar);
        }
        assert!((ziel[19] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unterlauf_blendet_aus_und_puffert_neu() {
        let mut q = quelle();
        q.enqueue_samples(&[1.0; 40], 40);
        let mut erster = [0.0f32; 20];
        q.pop_samples(&mut erster);

        // 20 Samples uebrig, 20 angefordert + 16 Fade-Out > 20 -> Unterlauf
        let mut gemeldet = None;
        let mut ziel = [9.0f32; 20];
        assert!(q.pop_samples_mit(&mut ziel, &mut |fehlend: usize| {
            gemeldet = Some(fehlend);
            false
        }));
        assert_eq!(gemeldet, Some(16));
        // 4 normale Samples, danach 16 ausgeblendete, monoton fallend
        for paar in ziel[4..].windows(2) {
            assert!(paar[1] <= paar[0]);
        }
        assert!(ziel[19].abs() < 1e-6);
        assert_eq!(q.state(), BufferState::Buffering);
        assert_eq!(q.currently_buffered_samples(), 0);
    }

    #[test]
    fn fadeout_fuellt_mit_stille() {
        let mut q = quelle();
        q.enqueue_samples(&[1.0; 60], 60);
        let mut ziel = [0.0f32; 44];
        q.pop_samples(&mut ziel);
        // 16 uebrig: alles wird Fade-Out, danach Stille
        let mut ziel = [7.0f32; 30];
        assert!(q.pop_samples(&mut ziel));
        assert!(ziel[16..].iter().all(|s| *s == 0.0));
        assert!(ziel[0] > 0.0 && ziel[0] <= 1.0);
        assert_eq!(q.state(), BufferState::Buffering);
    }

    #[test]
    fn ueberlauf_verwirft_eingabe() {
        let mut q = quelle();
        q.set_max_buffered_samples(50);
        let ergebnis = q.enqueue_samples(&[1.0; 80], 80);
        assert_eq!(ergebnis.geschrieben, 50);
        assert_eq!(ergebnis.verworfen, 30);
        assert_eq!(q.currently_buffered_samples(), 50);
    }

    #[test]
    fn ueberlauf_leert_puffer() {
        let mut q = quelle();
        q.set_max_buffered_samples(50);
        q.overflow_strategy = OverflowStrategy::DiscardBufferAll;
        q.enqueue_samples(&[1.0; 80], 80);
        assert_eq!(q.currently_buffered_samples(), 0);
    }

    #[test]
    fn clear_setzt_zurueck() {
        let mut q = quelle();
        q.enqueue_samples(&[1.0; 60], 60);
        q.clear();
        assert_eq!(q.state(), BufferState::Buffering);
        assert_eq!(q.currently_buffered_samples(), 0);
    }

    #[test]
    fn min_ueber_max_wird_abgelehnt() {
        let mut q = quelle();
        assert!(!q.set_min_buffered_samples(10_000));
        assert!(!q.set_max_buffered_samples(1));
    }
}
