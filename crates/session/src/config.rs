//! Configuration d'une session vocale

use audio::AudioConfig;
use network::{NetworkConfig, SessionTarget};
use uuid::Uuid;

/// Paramètres d'une session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// URL du backend (`ws://`, `wss://`, `http://` ou `https://`)
    pub server_url: String,

    /// Flow qui répond à l'utilisateur
    pub flow_id: String,

    /// Identifiant de la conversation, généré si non fourni
    pub session_id: String,

    /// Jeton envoyé en cookie au handshake
    pub access_token: Option<String>,

    /// Ajoute l'identifiant de session au chemin du socket
    pub session_in_path: bool,

    pub audio: AudioConfig,

    pub network: NetworkConfig,

    /// Détection locale de la parole pendant que l'assistant parle
    ///
    /// Le backend détecte aussi la parole de son côté ; la détection locale
    /// coupe la lecture sans attendre l'aller-retour.
    pub local_barge_in: bool,

    /// Démarre micro coupé
    pub start_muted: bool,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            flow_id: flow_id.into(),
            session_id: Uuid::new_v4().to_string(),
            access_token: None,
            session_in_path: false,
            audio: AudioConfig::default(),
            network: NetworkConfig::default(),
            local_barge_in: true,
            start_muted: false,
        }
    }

    /// Configuration pour les tests : délais courts, identifiants fixes
    pub fn test_config(flow_id: impl Into<String>) -> Self {
        Self {
            session_id: "test-session".to_string(),
            network: NetworkConfig::test_config(),
            ..Self::new("ws://localhost:7860", flow_id)
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Cible du socket de session
    pub fn target(&self) -> SessionTarget {
        let target = SessionTarget::new(&self.server_url, &self.flow_id, &self.session_id)
            .with_session_in_path(self.session_in_path);
        match &self.access_token {
            Some(token) => target.with_access_token(token),
            None => target,
        }
    }

    /// Valide la configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.flow_id.trim().is_empty() {
            return Err("flow_id ne peut pas être vide".to_string());
        }
        if self.session_id.trim().is_empty() {
            return Err("session_id ne peut pas être vide".to_string());
        }
        self.target().validate().map_err(|e| e.to_string())?;
        self.audio.validate()?;
        self.network.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_session_ids_differ() {
        let a = SessionConfig::new("ws://localhost:7860", "flow");
        let b = SessionConfig::new("ws://localhost:7860", "flow");
        assert_ne!(a.session_id, b.session_id);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_target_carries_token() {
        let config = SessionConfig::test_config("flow").with_access_token("tok");
        let target = config.target();

        assert_eq!(target.session_id, "test-session");
        assert_eq!(target.access_token.as_deref(), Some("tok"));
        assert!(target.endpoint().ends_with("/flow_as_tool/flow"));
    }

    #[test]
    fn test_session_in_path() {
        let mut config = SessionConfig::test_config("flow");
        config.session_in_path = true;
        assert!(config.target().endpoint().ends_with("/flow_as_tool/flow/test-session"));
    }

    #[test]
    fn test_validate_rejects_empty_flow() {
        assert!(SessionConfig::test_config("  ").validate().is_err());

        let config = SessionConfig::new("ftp://host", "flow");
        assert!(config.validate().is_err());
    }
}
