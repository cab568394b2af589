//! Traits abstraits pour le système audio
//!
//! Ce module définit les interfaces que doivent implémenter la capture, la
//! lecture et le codec. La session ne connaît que ces traits, ce qui permet
//! de la tester sans matériel (voir le module `mock`).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{AudioChunk, AudioError, AudioResult, EncodedFrame, PlaybackSignal, PlaybackStats, RecordingFrame};

/// Callback appelé pour chaque bloc capturé
pub type FrameHandler = Box<dyn FnMut(RecordingFrame) + Send + 'static>;

/// Callback appelé quand le stream de capture meurt en cours de route
pub type FailureHandler = Box<dyn FnMut(AudioError) + Send + 'static>;

/// Destination des blocs produits par une capture
///
/// `on_frame` est appelé exactement une fois par bloc, dans l'ordre de capture.
/// `on_failure` est appelé au plus une fois par démarrage.
pub struct CaptureSink {
    pub on_frame: FrameHandler,
    pub on_failure: FailureHandler,
}

impl CaptureSink {
    pub fn new(
        on_frame: impl FnMut(RecordingFrame) + Send + 'static,
        on_failure: impl FnMut(AudioError) + Send + 'static,
    ) -> Self {
        Self {
            on_frame: Box::new(on_frame),
            on_failure: Box::new(on_failure),
        }
    }
}

/// Trait pour capturer l'audio depuis le microphone
///
/// Implémentations :
/// - CpalCapture : microphone réel via cpal
/// - mock::ScriptedCapture : blocs scriptés pour les tests
///
/// Le périphérique appartient exclusivement à la capture pendant toute la
/// durée de la session.
#[async_trait]
pub trait AudioCapture: Send {
    /// Démarre la capture continue
    ///
    /// L'attente de la permission système est un point de suspension :
    /// l'appelant peut abandonner le futur si l'utilisateur annule.
    ///
    /// # Erreurs
    /// - `AudioError::DeviceUnavailable` : aucun microphone utilisable
    /// - `AudioError::PermissionDenied` : accès refusé par le système
    async fn start(&mut self, sink: CaptureSink) -> AudioResult<()>;

    /// Arrête la capture et libère le périphérique
    ///
    /// Doit être idempotent : un second appel ne fait rien.
    async fn stop(&mut self) -> AudioResult<()>;

    /// Vérifie si la capture est active
    fn is_recording(&self) -> bool;

    /// Nom du périphérique utilisé
    fn device_info(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Trait pour jouer les chunks reçus du socket
///
/// La lecture est strictement FIFO. Une implémentation signale le passage
/// à vide de sa file par `PlaybackSignal::Drained`.
#[async_trait]
pub trait AudioPlayback: Send {
    /// Ouvre le périphérique de sortie
    async fn start(&mut self) -> AudioResult<()>;

    /// Ferme le périphérique de sortie (idempotent)
    async fn stop(&mut self) -> AudioResult<()>;

    /// Ajoute un chunk en fin de file
    ///
    /// La lecture démarre automatiquement si rien n'est en cours.
    async fn enqueue(&mut self, chunk: AudioChunk) -> AudioResult<()>;

    /// Coupe le chunk en cours et vide la file d'un coup
    ///
    /// Retourne le nombre de chunks jetés (en cours inclus).
    async fn interrupt(&mut self) -> usize;

    /// Vrai si un chunk est en cours de lecture
    fn is_playing(&self) -> bool;

    /// Nombre de chunks en attente (hors chunk en cours)
    fn queued(&self) -> usize;

    /// Statistiques de lecture
    fn stats(&self) -> PlaybackStats;

    /// Récupère le canal des signaux de lecture (`Drained`, ...)
    ///
    /// Ne peut être pris qu'une fois : les appels suivants retournent `None`.
    fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<PlaybackSignal>>;

    fn device_info(&self) -> String {
        "Périphérique de sortie inconnu".to_string()
    }
}

/// Trait pour convertir l'audio entre le périphérique et le socket
pub trait AudioCodec: Send + Sync {
    /// Convertit un bloc capturé au format du socket
    fn encode(&self, frame: &RecordingFrame) -> AudioResult<EncodedFrame>;

    /// Convertit des données reçues du socket en chunk jouable
    fn decode(&self, data: &[u8], sequence_number: u64) -> AudioResult<AudioChunk>;

    fn codec_info(&self) -> String {
        "Codec audio".to_string()
    }
}
