//! Détection de parole locale pour le barge-in
//!
//! Détecteur volontairement simple : un bloc est « parlé » si son RMS dépasse
//! le seuil, et la parole est déclarée après `speech_min_frames` blocs parlés
//! consécutifs. Un seul déclenchement par prise de parole : il faut repasser
//! par un bloc silencieux pour réarmer.

use crate::{AudioConfig, RecordingFrame};

#[derive(Clone, Debug)]
pub struct SpeechDetector {
    threshold: f32,
    min_frames: u32,
    consecutive: u32,
    triggered: bool,
}

impl SpeechDetector {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            threshold: config.speech_threshold,
            min_frames: config.speech_min_frames.max(1),
            consecutive: 0,
            triggered: false,
        }
    }

    /// Analyse un bloc capturé
    ///
    /// Retourne `true` uniquement sur le bloc qui déclenche le début de parole.
    pub fn process(&mut self, frame: &RecordingFrame) -> bool {
        if frame.rms_level() < self.threshold {
            self.consecutive = 0;
            self.triggered = false;
            return false;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if !self.triggered && self.consecutive >= self.min_frames {
            self.triggered = true;
            return true;
        }
        false
    }

    /// Oublie l'historique (nouvelle capture)
    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.triggered = false;
    }

    pub fn is_speaking(&self) -> bool {
        self.triggered
    }
}
