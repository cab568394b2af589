//! Gestion d'erreurs pour le système audio
//!
//! Ce module définit toutes les erreurs possibles côté capture, lecture et codec.
//! Les erreurs de capture (périphérique absent, permission refusée) sont
//! remontées telles quelles à la machine à états de la session : aucun retry
//! automatique n'est tenté.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système audio
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Le microphone ou la sortie audio demandé n'est pas disponible
    #[error("Périphérique audio indisponible: {0}")]
    DeviceUnavailable(String),

    /// Le système a refusé l'accès au microphone
    #[error("Accès au microphone refusé: {0}")]
    PermissionDenied(String),

    /// Erreur lors de la configuration des paramètres audio (sample rate, etc.)
    #[error("Erreur de configuration audio: {0}")]
    ConfigError(String),

    /// Le stream cpal a échoué pendant l'utilisation (périphérique débranché, etc.)
    #[error("Erreur du stream audio: {0}")]
    StreamError(String),

    /// Données PCM invalides lors de l'encodage/décodage
    #[error("Erreur codec: {0}")]
    CodecError(String),

    /// Opération tentée dans un état incompatible (ex: enqueue avant start)
    #[error("État invalide: {0}")]
    InvalidState(String),
}

impl AudioError {
    /// Vrai si l'erreur provient du périphérique de capture
    ///
    /// Ces erreurs font passer la session dans l'état `Error` et forcent
    /// `is_recording = false`.
    pub fn is_capture_failure(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceUnavailable(_) | AudioError::PermissionDenied(_) | AudioError::StreamError(_)
        )
    }
}

/// Conversion des erreurs de construction de stream
///
/// cpal ne distingue pas toujours le refus de permission : les backends le
/// signalent via `BackendSpecific`, on inspecte donc le message.
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable("périphérique retiré ou occupé".to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                AudioError::ConfigError("configuration de stream non supportée".to_string())
            }
            other => classify_backend_message(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable("périphérique retiré pendant le démarrage".to_string())
            }
            other => classify_backend_message(other.to_string()),
        }
    }
}

impl From<cpal::PauseStreamError> for AudioError {
    fn from(err: cpal::PauseStreamError) -> Self {
        AudioError::StreamError(format!("Erreur pause stream: {}", err))
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable("aucune configuration par défaut".to_string())
            }
            other => classify_backend_message(other.to_string()),
        }
    }
}

/// Erreur remontée par le callback d'erreur d'un stream en cours
impl From<cpal::StreamError> for AudioError {
    fn from(err: cpal::StreamError) -> Self {
        match err {
            cpal::StreamError::DeviceNotAvailable => AudioError::DeviceUnavailable("périphérique retiré".to_string()),
            other => AudioError::StreamError(other.to_string()),
        }
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::DeviceUnavailable(format!("Énumération des périphériques impossible: {}", err))
    }
}

/// Range un message d'erreur backend dans la bonne catégorie
fn classify_backend_message(message: String) -> AudioError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        AudioError::PermissionDenied(message)
    } else {
        AudioError::StreamError(message)
    }
}

/// Type Result personnalisé pour notre crate
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AudioError::DeviceUnavailable("micro USB".to_string());
        assert_eq!(error.to_string(), "Périphérique audio indisponible: micro USB");

        let error = AudioError::ConfigError("Test".to_string());
        assert_eq!(error.to_string(), "Erreur de configuration audio: Test");
    }

    #[test]
    fn test_capture_failure_classification() {
        assert!(AudioError::PermissionDenied("x".into()).is_capture_failure());
        assert!(AudioError::DeviceUnavailable("x".into()).is_capture_failure());
        assert!(!AudioError::CodecError("x".into()).is_capture_failure());
    }

    #[test]
    fn test_backend_message_classification() {
        let denied = classify_backend_message("Access denied by the OS".to_string());
        assert!(matches!(denied, AudioError::PermissionDenied(_)));

        let other = classify_backend_message("ALSA underrun".to_string());
        assert!(matches!(other, AudioError::StreamError(_)));
    }

    #[test]
    fn test_device_not_available_conversion() {
        let error: AudioError = cpal::BuildStreamError::DeviceNotAvailable.into();
        assert!(matches!(error, AudioError::DeviceUnavailable(_)));

        let error: AudioError = cpal::StreamError::DeviceNotAvailable.into();
        assert!(error.is_capture_failure());
    }
}
