//! Lautstaerke und Kanal-Anpassung
//!
//! Kleine DSP-Helfer fuer die Wiedergabe: Gain anwenden und interleaved
//! PCM auf die Kanalzahl der Ausgabe bringen.

/// Wendet einen linearen Gain auf interleaved Samples an
///
/// Ein Gain von `1.0` laesst die Daten unveraendert.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Passt interleaved PCM von `ein_kanaele` auf `aus_kanaele` an
///
/// - Mono -> N: das Signal wird auf alle Kanaele kopiert
/// - N -> Mono: Mittelwert aller Kanaele
/// - sonst: fehlende Kanaele werden mit Stille gefuellt, ueberzaehlige verworfen
///
/// Gibt `None` zurueck bei Kanalzahl 0.
pub fn merge_channels_interleaved(
    eingabe: &[f32],
    ein_kanaele: usize,
    aus_kanaele: usize,
    sample_count: usize,
) -> Option<Vec<f32>> {
    if ein_kanaele == 0 || aus_kanaele == 0 || eingabe.len() < sample_count * ein_kanaele {
        return None;
    }
    if ein_kanaele == aus_kanaele {
        return Some(eingabe[..sample_count * ein_kanaele].to_vec());
    }

    let mut ausgabe = Vec::with_capacity(sample_count * aus_kanaele);
    for frame in eingabe.chunks_exact(ein_kanaele).take(sample_count) {
        if ein_kanaele == 1 {
            ausgabe.extend(std::iter::repeat(frame[0]).take(aus_kanaele));
        } else if aus_kanaele == 1 {
            ausgabe.push(frame.iter().sum::<f32>() / ein_kanaele as f32);
        } else {
            for k in 0..aus_kanaele {
                ausgabe.push(frame.get(k).copied().unwrap_or(0.0));
            }
        }
    }
    Some(ausgabe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_halbiert() {
        let mut s = vec![1.0, -0.5];
        apply_gain(&mut s, 0.5);
        assert_eq!(s, vec![0.5, -0.25]);
    }

    #[test]
    fn gain_eins_unveraendert() {
        let mut s = vec![0.3, 0.7];
        apply_gain(&mut s, 1.0);
        assert_eq!(s, vec![0.3, 0.7]);
    }

    #[test]
    fn mono_zu_stereo() {
        let aus = merge_channels_interleaved(&[0.1, 0.2], 1, 2, 2).unwrap();
        assert_eq!(aus, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_zu_mono() {
        let aus = merge_channels_interleaved(&[0.2, 0.4, -1.0, 1.0], 2, 1, 2).unwrap();
        assert!((aus[0] - 0.3).abs() < 1e-6);
        assert!(aus[1].abs() < 1e-6);
    }

    #[test]
    fn ungueltige_kanalzahl() {
        assert!(merge_channels_interleaved(&[0.0], 0, 2, 1).is_none());
        assert!(merge_channels_interleaved(&[0.0], 2, 1, 1).is_none());
    }
}
