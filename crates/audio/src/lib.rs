//! Crate audio de la session vocale
//!
//! Ce crate gère toute la chaîne audio côté client :
//! - Capture microphone avec cpal, découpée en blocs fixes
//! - Conversion PCM16 au format du socket
//! - File de lecture FIFO interruptible (barge-in)
//! - Détection de parole locale
//! - Implémentations sans matériel pour les tests

pub mod config;      // Configuration audio
pub mod types;       // Types de données (RecordingFrame, AudioChunk, ...)
pub mod traits;      // Traits abstraits
pub mod capture;     // Capture avec cpal
pub mod playback;    // Lecture avec cpal
pub mod queue;       // File de lecture
pub mod codec;       // PCM16 + rééchantillonnage
pub mod vad;         // Détection de parole
pub mod mock;        // Doublures de test
pub mod error;       // Gestion d'erreurs

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use types::*;
pub use traits::*;
pub use error::*;

// Réexports des implémentations principales
pub use capture::{list_input_devices, CpalCapture, FrameAssembler};
pub use playback::CpalPlayback;
pub use queue::{Discarded, PlaybackQueue};
pub use codec::{resample, Pcm16Codec};
pub use vad::SpeechDetector;
