//! Types de données pour le socket de session
//!
//! Ce module définit les structures principales côté réseau :
//! - SessionTarget : le couple (flow, session) et l'adresse du backend
//! - NetworkConfig : délais et limites du socket
//! - SocketStats : compteurs de trafic
//! - InboundEvent / SocketEvent : ce que le socket remonte à la session

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use audio::AudioChunk;

use crate::{NetworkError, NetworkResult};

/// Chemin du endpoint vocal côté backend
pub const VOICE_ENDPOINT_PATH: &str = "/api/v1/voice/ws/flow_as_tool";

/// Nom du cookie portant le jeton d'accès
pub const ACCESS_TOKEN_COOKIE: &str = "access_token_lf";

/// Destination d'un socket de session
///
/// Un socket est lié à un seul couple `(flow_id, session_id)` pendant toute
/// sa durée de vie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTarget {
    /// Base du serveur, ex: `ws://localhost:7860` (http/https acceptés)
    pub server_url: String,

    /// Identifiant du flow exécuté par le backend
    pub flow_id: String,

    /// Identifiant de la session de conversation
    pub session_id: String,

    /// Jeton d'accès envoyé en cookie, si l'utilisateur est authentifié
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Ajoute `/{session_id}` au chemin, pour les backends qui routent par session
    ///
    /// Par défaut la session n'est portée que par l'enveloppe des messages.
    #[serde(default)]
    pub session_in_path: bool,
}

impl SessionTarget {
    pub fn new(server_url: impl Into<String>, flow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            flow_id: flow_id.into(),
            session_id: session_id.into(),
            access_token: None,
            session_in_path: false,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_session_in_path(mut self, enabled: bool) -> Self {
        self.session_in_path = enabled;
        self
    }

    /// Vérifie que la cible est utilisable
    pub fn validate(&self) -> NetworkResult<()> {
        let scheme_ok = ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.server_url.starts_with(scheme));
        if !scheme_ok {
            return Err(NetworkError::InvalidUrl(format!(
                "{} (schéma attendu: ws, wss, http ou https)",
                self.server_url
            )));
        }

        if self.flow_id.trim().is_empty() {
            return Err(NetworkError::ConfigError("flow_id vide".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(NetworkError::ConfigError("session_id vide".to_string()));
        }
        if self.flow_id.contains('/') || self.session_id.contains('/') {
            return Err(NetworkError::ConfigError(
                "flow_id et session_id ne doivent pas contenir de '/'".to_string(),
            ));
        }
        Ok(())
    }

    /// URL WebSocket complète du endpoint vocal
    ///
    /// Les schémas http(s) sont convertis en ws(s).
    pub fn endpoint(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        if self.session_in_path {
            format!("{}{}/{}/{}", base, VOICE_ENDPOINT_PATH, self.flow_id, self.session_id)
        } else {
            format!("{}{}/{}", base, VOICE_ENDPOINT_PATH, self.flow_id)
        }
    }

    /// Valeur du header `Cookie`, si un jeton est présent
    pub fn cookie_header(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .filter(|token| !token.is_empty())
            .map(|token| format!("{}={}", ACCESS_TOKEN_COOKIE, token))
    }
}

/// Configuration du socket de session
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    /// Délai max pour établir la connexion (défaut: 10s)
    pub connect_timeout: Duration,

    /// Délai max pour la fermeture propre (défaut: 2s)
    pub close_timeout: Duration,

    /// Taille max d'un message entrant en bytes (défaut: 16 MiB)
    pub max_message_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    /// Configuration pour un backend local
    pub fn lan_optimized() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            close_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Configuration pour tests (délais accélérés)
    pub fn test_config() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            close_timeout: Duration::from_millis(100),
            max_message_size: 1024 * 1024,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout doit être non nul".to_string());
        }
        if self.max_message_size < 1024 {
            return Err(format!("max_message_size trop petit: {} bytes", self.max_message_size));
        }
        Ok(())
    }
}

/// Statistiques de trafic d'un socket
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketStats {
    /// Messages envoyés (audio + contrôle)
    pub messages_sent: u64,

    /// Blocs audio envoyés
    pub frames_sent: u64,

    /// Volume envoyé sur le fil
    pub bytes_sent: u64,

    /// Messages reçus, y compris ignorés
    pub messages_received: u64,

    /// Chunks audio reçus
    pub chunks_received: u64,

    /// Messages de type inconnu
    pub ignored_messages: u64,

    #[serde(skip, default = "Instant::now")]
    pub opened_at: Instant,
}

impl Default for SocketStats {
    fn default() -> Self {
        Self {
            messages_sent: 0,
            frames_sent: 0,
            bytes_sent: 0,
            messages_received: 0,
            chunks_received: 0,
            ignored_messages: 0,
            opened_at: Instant::now(),
        }
    }
}

impl SocketStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Message de contrôle ou de statut reçu du backend
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    /// Valeur du champ `type`
    pub kind: String,

    /// Texte lisible, si le message en porte un
    pub message: Option<String>,

    /// Message complet (ou champ `data` pour la progression du flow)
    pub payload: serde_json::Value,
}

impl StatusUpdate {
    /// Le backend commence une nouvelle réponse
    pub fn is_response_start(&self) -> bool {
        self.kind == "response.created"
    }

    /// Le backend a détecté que l'utilisateur parle
    pub fn is_speech_started(&self) -> bool {
        self.kind == "input_audio_buffer.speech_started"
    }

    /// Progression de l'exécution du flow
    pub fn is_flow_progress(&self) -> bool {
        self.kind == "flow.build.progress"
    }

    /// Texte à afficher pour ce statut
    pub fn display_text(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => self.kind.clone(),
        }
    }
}

/// Erreur signalée par le backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerError {
    pub code: Option<String>,
    pub key_name: Option<String>,
    pub message: String,
}

impl ServerError {
    /// Code envoyé quand une clé fournisseur manque côté serveur
    pub const API_KEY_MISSING: &'static str = "api_key_missing";

    /// Code renvoyé par le modèle pour un `response.cancel` sans réponse en cours
    pub const CANCEL_NOT_ACTIVE: &'static str = "response_cancel_not_active";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            key_name: None,
            message: message.into(),
        }
    }

    /// Nom de la clé manquante, si c'est une erreur de credential
    pub fn missing_credential(&self) -> Option<&str> {
        if self.code.as_deref() == Some(Self::API_KEY_MISSING) {
            self.key_name.as_deref()
        } else {
            None
        }
    }

    /// Erreur sans conséquence pour la conversation
    pub fn is_benign(&self) -> bool {
        self.code.as_deref() == Some(Self::CANCEL_NOT_ACTIVE)
    }
}

/// Message entrant classé
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Audio à jouer
    Audio(AudioChunk),

    /// Contrôle / statut
    Status(StatusUpdate),

    /// Fin de la réponse en cours
    TurnComplete,

    /// Erreur serveur
    Error(ServerError),
}

/// Ce que le socket remonte à la session
#[derive(Debug)]
pub enum SocketEvent {
    Message(InboundEvent),

    /// Le pair a fermé la connexion
    Closed { clean: bool, reason: Option<String> },

    /// Le socket est inutilisable
    Failed(NetworkError),
}
