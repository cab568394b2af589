//! Types de données pour le système audio
//!
//! Ce module définit les unités qui circulent dans la session :
//! - RecordingFrame : bloc brut capturé au microphone (taille fixe)
//! - EncodedFrame : bloc converti en PCM16 au format du socket
//! - AudioChunk : audio décodé prêt à être joué
//! - PlaybackStats : compteurs de la file de lecture

use std::time::Instant;
use serde::{Deserialize, Serialize};

use crate::AudioError;

/// Type pour un échantillon audio
///
/// Valeurs entre -1.0 et +1.0, 0.0 = silence.
pub type Sample = f32;

/// Bloc audio brut capturé au microphone
///
/// Possédé par le pipeline de capture, transformé puis transmis au socket,
/// jamais conservé. Toujours mono : les canaux du périphérique sont mixés
/// avant la création de la frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingFrame {
    /// Échantillons mono à la fréquence du périphérique
    pub samples: Vec<Sample>,

    /// Fréquence native du périphérique de capture (Hz)
    pub sample_rate: u32,

    /// Instant de capture
    pub timestamp: Instant,

    /// Numéro de séquence, strictement croissant pendant une capture
    pub sequence_number: u64,
}

impl RecordingFrame {
    /// Crée un nouveau bloc capturé
    ///
    /// # Example
    /// ```rust
    /// use audio::RecordingFrame;
    ///
    /// let frame = RecordingFrame::new(vec![0.1, 0.2, -0.1, 0.0], 48000, 42);
    /// assert_eq!(frame.sequence_number, 42);
    /// ```
    pub fn new(samples: Vec<Sample>, sample_rate: u32, sequence_number: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp: Instant::now(),
            sequence_number,
        }
    }

    /// Crée un bloc de silence
    pub fn silence(sample_count: usize, sample_rate: u32, sequence_number: u64) -> Self {
        Self::new(vec![0.0; sample_count], sample_rate, sequence_number)
    }

    /// Durée du bloc en millisecondes
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Vérifie si ce bloc est essentiellement silencieux
    pub fn is_silence(&self, threshold: f32) -> bool {
        self.samples.iter().all(|&sample| sample.abs() < threshold)
    }

    /// Calcule le niveau sonore RMS (Root Mean Square)
    ///
    /// Retourne une valeur entre 0.0 et 1.0. Sert à la détection de parole.
    pub fn rms_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self.samples.iter()
            .map(|&s| s * s)
            .sum();

        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// Calcule le niveau maximum (peak)
    pub fn peak_level(&self) -> f32 {
        self.samples.iter()
            .map(|&s| s.abs())
            .fold(0.0, f32::max)
    }
}

/// Audio décodé prêt à être joué
///
/// Produit par le gestionnaire de messages du socket, possédé exclusivement
/// par la file de lecture jusqu'à sa lecture, puis jeté.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    /// Échantillons mono
    pub samples: Vec<Sample>,

    /// Fréquence d'échantillonnage de ces échantillons (Hz)
    pub sample_rate: u32,

    /// Ordre d'arrivée sur le socket
    pub sequence_number: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<Sample>, sample_rate: u32, sequence_number: u64) -> Self {
        Self { samples, sample_rate, sequence_number }
    }

    /// Durée du chunk en millisecondes
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() as f32 / self.sample_rate as f32) * 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Applique un gain avec écrêtage
    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        for sample in &mut self.samples {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

/// Bloc encodé en PCM16 little-endian au format du socket
///
/// Après conversion, un bloc de 20ms à 24 kHz fait 960 bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodedFrame {
    /// Données PCM16 little-endian
    pub data: Vec<u8>,

    /// Fréquence des données encodées (Hz)
    pub sample_rate: u32,

    /// Nombre d'échantillons contenus dans `data`
    pub sample_count: usize,

    /// Numéro de séquence du bloc capturé d'origine
    pub sequence_number: u64,
}

impl EncodedFrame {
    pub fn new(data: Vec<u8>, sample_rate: u32, sequence_number: u64) -> Self {
        let sample_count = data.len() / 2;
        Self { data, sample_rate, sample_count, sequence_number }
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Signal émis par une implémentation de lecture
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackSignal {
    /// La file s'est vidée : plus rien n'est en cours de lecture
    Drained,

    /// Le périphérique de sortie a lâché en cours de lecture (émis une fois)
    Failed(AudioError),
}

/// Statistiques de la file de lecture
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Chunks ajoutés à la file
    pub chunks_enqueued: u64,

    /// Chunks joués jusqu'au bout
    pub chunks_played: u64,

    /// Chunks jetés par une interruption (en attente ou en cours)
    pub chunks_discarded: u64,

    /// Nombre d'interruptions (barge-in, fermeture)
    pub interruptions: u64,

    /// Nombre de fois où le périphérique a demandé des données sans en avoir
    pub underruns: u64,
}

impl PlaybackStats {
    /// Remet les statistiques à zéro
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_frame_creation() {
        let samples = vec![0.1, -0.2, 0.3, 0.0];
        let frame = RecordingFrame::new(samples.clone(), 48000, 42);

        assert_eq!(frame.samples, samples);
        assert_eq!(frame.sequence_number, 42);
        assert!(frame.timestamp.elapsed().as_millis() < 100);
    }

    #[test]
    fn test_silence_detection() {
        let silent = RecordingFrame::new(vec![0.0, 0.001, -0.001, 0.0], 48000, 1);
        let noisy = RecordingFrame::new(vec![0.1, 0.5, -0.3, 0.2], 48000, 2);

        assert!(silent.is_silence(0.01));
        assert!(!noisy.is_silence(0.01));
    }

    #[test]
    fn test_rms_calculation() {
        let frame = RecordingFrame::new(vec![0.5, -0.5, 0.5, -0.5], 48000, 1);
        assert!((frame.rms_level() - 0.5).abs() < 0.001);
        assert_eq!(frame.peak_level(), 0.5);
    }

    #[test]
    fn test_durations() {
        let frame = RecordingFrame::silence(960, 48000, 0);
        assert!((frame.duration_ms() - 20.0).abs() < 0.001);

        let chunk = AudioChunk::new(vec![0.0; 2400], 24000, 0);
        assert!((chunk.duration_ms() - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_chunk_gain_clamps() {
        let mut chunk = AudioChunk::new(vec![0.5, -0.5, 0.8], 24000, 1);
        chunk.apply_gain(2.0);
        assert_eq!(chunk.samples, vec![1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_encoded_frame_sample_count() {
        let encoded = EncodedFrame::new(vec![0u8; 960], 24000, 7);
        assert_eq!(encoded.sample_count, 480);
        assert_eq!(encoded.len_bytes(), 960);
    }
}
