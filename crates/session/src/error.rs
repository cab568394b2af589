//! Erreurs de la session vocale
//!
//! Toutes ces erreurs sont visibles par l'utilisateur. Elles sont remontées
//! une seule fois à l'observateur, puis la machine revient à `Idle`.

use audio::AudioError;
use network::NetworkError;
use thiserror::Error;

use crate::{CredentialKey, SaveError};

#[derive(Error, Debug)]
pub enum SessionError {
    /// Une clé fournisseur requise est absente
    #[error("Clé manquante: {0}")]
    CredentialMissing(CredentialKey),

    /// Micro absent, permission refusée, stream mort
    #[error("Capture audio: {0}")]
    Capture(AudioError),

    #[error("Lecture audio: {0}")]
    Playback(AudioError),

    #[error("Socket: {0}")]
    Socket(#[from] NetworkError),

    /// Le socket s'est fermé sans fermeture propre
    #[error("Connexion perdue: {0}")]
    Disconnected(String),

    /// Erreur envoyée par le backend
    #[error("Erreur serveur{}: {message}", code_suffix(.code))]
    Server { code: Option<String>, message: String },

    #[error("Enregistrement de la clé: {0}")]
    SaveCredential(#[from] SaveError),

    #[error("Préférences: {0}")]
    Preferences(String),

    #[error("Configuration invalide: {0}")]
    Config(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl SessionError {
    /// Vrai si l'erreur met fin au tour en cours (et donc à la session)
    ///
    /// Un échec d'enregistrement de clé ou de préférences n'affecte pas la
    /// session active.
    pub fn is_terminal_for_turn(&self) -> bool {
        !matches!(self, SessionError::SaveCredential(_) | SessionError::Preferences(_) | SessionError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors() {
        assert!(SessionError::Capture(AudioError::PermissionDenied("refus".into())).is_terminal_for_turn());
        assert!(SessionError::Socket(NetworkError::Closed).is_terminal_for_turn());
        assert!(!SessionError::SaveCredential(SaveError::EmptyValue(CredentialKey::OpenAi)).is_terminal_for_turn());
    }

    #[test]
    fn test_server_error_display() {
        let error = SessionError::Server {
            code: Some("rate_limited".into()),
            message: "trop de requêtes".into(),
        };
        assert_eq!(error.to_string(), "Erreur serveur (rate_limited): trop de requêtes");

        let error = SessionError::Server { code: None, message: "oops".into() };
        assert_eq!(error.to_string(), "Erreur serveur: oops");
    }
}
