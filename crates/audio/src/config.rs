//! Configuration audio pour la session vocale
//!
//! Ce module définit les paramètres audio de la session : format attendu par le
//! backend (PCM16 à 24 kHz), taille fixe des blocs de capture, gain de sortie
//! et seuils de détection de parole utilisés pour le barge-in.

use serde::{Deserialize, Serialize};

/// Configuration principale du système audio
///
/// `#[derive(Serialize, Deserialize)]` : la configuration peut être chargée
/// depuis le fichier de préférences de l'application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage convenue avec le backend (Hz)
    ///
    /// L'audio envoyé et reçu sur le socket est du PCM16 mono à ce débit,
    /// quelle que soit la fréquence native du périphérique.
    pub wire_sample_rate: u32,

    /// Durée d'un bloc de capture en millisecondes
    ///
    /// 20ms = même découpage que le backend pour sa détection de parole
    pub frame_duration_ms: u16,

    /// Nom du microphone préféré (`None` = périphérique par défaut)
    pub input_device: Option<String>,

    /// Gain appliqué à la lecture (1.0 = inchangé)
    pub output_gain: f32,

    /// Niveau RMS au-dessus duquel un bloc capturé est considéré comme de la parole
    pub speech_threshold: f32,

    /// Nombre de blocs de parole consécutifs avant de déclencher un barge-in
    ///
    /// 3 blocs de 20ms = 60ms de parole continue, suffisant pour ignorer un clic
    pub speech_min_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            wire_sample_rate: 24000,    // PCM16 24 kHz côté backend
            frame_duration_ms: 20,      // 20ms - standard VoIP
            input_device: None,
            output_gain: 1.0,
            speech_threshold: 0.02,
            speech_min_frames: 3,
        }
    }
}

impl AudioConfig {
    /// Calcule le nombre d'échantillons par bloc pour une fréquence donnée
    ///
    /// Formule : (sample_rate * frame_duration_ms) / 1000
    /// Exemple : (48000 * 20) / 1000 = 960 échantillons
    pub fn samples_per_frame(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as usize
    }

    /// Nombre d'échantillons d'un bloc une fois converti au format du socket
    pub fn wire_samples_per_frame(&self) -> usize {
        self.samples_per_frame(self.wire_sample_rate)
    }

    /// Taille en bytes d'un bloc PCM16 au format du socket
    pub fn wire_frame_bytes(&self) -> usize {
        self.wire_samples_per_frame() * 2
    }

    /// Valide que la configuration est cohérente
    pub fn validate(&self) -> Result<(), String> {
        if self.wire_sample_rate < 8000 || self.wire_sample_rate > 48000 {
            return Err(format!("Sample rate invalide: {} (doit être entre 8000 et 48000)", self.wire_sample_rate));
        }

        if self.frame_duration_ms < 10 || self.frame_duration_ms > 60 {
            return Err(format!("Durée de bloc invalide: {}ms (doit être entre 10 et 60)", self.frame_duration_ms));
        }

        if !(0.0..=2.0).contains(&self.output_gain) {
            return Err(format!("Gain de sortie invalide: {} (doit être entre 0.0 et 2.0)", self.output_gain));
        }

        if self.speech_threshold <= 0.0 || self.speech_threshold > 1.0 {
            return Err(format!("Seuil de parole invalide: {} (doit être dans ]0, 1])", self.speech_threshold));
        }

        if self.speech_min_frames == 0 {
            return Err("speech_min_frames doit être au moins 1".to_string());
        }

        Ok(())
    }

    /// Crée une configuration optimisée pour faible latence
    pub fn low_latency() -> Self {
        Self {
            frame_duration_ms: 10,
            speech_min_frames: 4,       // Même durée minimale de parole (40ms)
            ..Default::default()
        }
    }

    /// Barge-in plus réactif, pour les environnements calmes
    pub fn sensitive_barge_in() -> Self {
        Self {
            speech_threshold: 0.01,
            speech_min_frames: 2,
            ..Default::default()
        }
    }
}
