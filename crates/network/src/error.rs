//! Gestion d'erreurs pour le socket de session
//!
//! Ce module définit les erreurs possibles entre le client et le backend vocal.
//! Il suit les mêmes patterns que le module audio pour la cohérence du code.
//! Aucune de ces erreurs ne déclenche de reconnexion automatique : elles
//! remontent toutes à la machine à états de la session.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Énumération de toutes les erreurs possibles côté socket
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Le handshake WebSocket a échoué (serveur injoignable, 401, ...)
    #[error("Connexion impossible à {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Le serveur n'a pas répondu dans le délai de connexion
    #[error("Timeout de connexion vers {endpoint} après {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// Opération sur un socket déjà fermé
    #[error("Socket fermé")]
    Closed,

    /// Message entrant illisible (JSON invalide, base64 corrompu, ...)
    #[error("Message malformé: {0}")]
    MalformedMessage(String),

    /// Erreur lors de la sérialisation/désérialisation JSON
    #[error("Erreur de sérialisation: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Erreur du protocole WebSocket
    #[error("Erreur WebSocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Opération tentée alors que le socket n'est pas dans le bon état
    #[error("Opération {operation} invalide: {reason}")]
    InvalidState { operation: String, reason: String },

    /// Erreur de configuration réseau
    #[error("Configuration réseau invalide: {0}")]
    ConfigError(String),

    /// URL du serveur inutilisable
    #[error("URL invalide: {0}")]
    InvalidUrl(String),
}

/// Type Result personnalisé pour notre crate network
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Fonctions utilitaires pour créer des erreurs communes
impl NetworkError {
    pub fn connect_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Vérifie si l'erreur vaut un nouvel essai automatique
    ///
    /// Toujours faux : la session ne se reconnecte jamais seule, c'est
    /// l'utilisateur qui relance le mode vocal.
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Vrai si l'erreur correspond à une fermeture normale du socket
    pub fn is_clean_close(&self) -> bool {
        match self {
            NetworkError::Closed => true,
            NetworkError::WebSocket(err) => matches!(
                err,
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
            ),
            _ => false,
        }
    }
}
