//! Linearer Resampler fuer die Ausgabe-Abtastrate
//!
//! Dekodierte Frames haben die Rate des Codecs, die Ausgabe eine feste
//! Rate. Zwischen Frames wird das letzte Sample pro Kanal gemerkt, damit
//! die Interpolation an Frame-Grenzen stetig bleibt.

use crate::error::{AudioError, AudioResult};

/// Resampler mit linearer Interpolation (interleaved f32)
#[derive(Debug, Clone)]
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Letztes Sample des vorherigen Frames pro Kanal
    letzte: Vec<f32>,
    /// Position im Eingabestrom (Bruchteil), relativ zum Frame-Anfang
    position: f64,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(AudioError::Resampler(format!(
                "Ungueltige Parameter: {input_rate} Hz -> {output_rate} Hz, {channels} Kanaele"
            )));
        }
        Ok(Self {
            input_rate,
            output_rate,
            channels,
            letzte: vec![0.0; channels],
            position: 0.0,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Geschaetzte Anzahl Ausgabe-Samples (pro Kanal) fuer `sample_count` Eingabe-Samples
    pub fn estimated_output_size(&self, sample_count: usize) -> usize {
        (sample_count as u64 * self.output_rate as u64).div_ceil(self.input_rate as u64) as usize
    }

    /// Resampled `sample_count` Samples pro Kanal
    pub fn process(&mut self, eingabe: &[f32], sample_count: usize) -> AudioResult<Vec<f32>> {
        let ch = self.channels;
        if eingabe.len() < sample_count * ch {
            return Err(AudioError::Resampler(format!(
                "Eingabe zu kurz: {} Werte fuer {} Samples",
                eingabe.len(),
                sample_count
            )));
        }
        if sample_count == 0 {
            return Ok(Vec::new());
        }

        let schritt = self.input_rate as f64 / self.output_rate as f64;
        let mut ausgabe = Vec::with_capacity(self.estimated_output_size(sample_count) * ch);

        // Index -1 ist das letzte Sample des vorherigen Frames (ein Sample Versatz)
        let sample = |idx: isize, k: usize, letzte: &[f32]| -> f32 {
            if idx < 0 {
                letzte[k]
            } else {
                eingabe[idx as usize * ch + k]
            }
        };

        let mut pos = self.position;
        while pos < sample_count as f64 {
            let basis = pos.floor();
            let anteil = (pos - basis) as f32;
            let i0 = basis as isize - 1;
            let i1 = basis as isize;
            for k in 0..ch {
                let a = sample(i0, k, &self.letzte);
                let b = sample(i1, k, &self.letzte);
                ausgabe.push(a + (b - a) * anteil);
            }
            pos += schritt;
        }

        self.position = pos - sample_count as f64;
        self.letzte
            .copy_from_slice(&eingabe[(sample_count - 1) * ch..sample_count * ch]);
        Ok(ausgabe)
    }
}
