//! États de la session vocale

use serde::Serialize;

/// Phase de la conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Speaking,
    Error,
}

impl SessionState {
    /// Vrai quand un socket est ouvert ou en cours d'ouverture
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Listening | SessionState::Speaking)
    }
}

/// Identité et statut d'une session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub flow_id: String,
    pub session_id: String,

    /// Libellé affiché à l'utilisateur
    pub status: String,

    /// Vrai seulement quand la capture est active
    pub is_recording: bool,
}

impl Session {
    pub fn new(flow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            session_id: session_id.into(),
            status: String::new(),
            is_recording: false,
        }
    }
}

/// Vue de la session remise aux observateurs
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session: Session,
    pub muted: bool,
    pub voice_enabled: bool,
}
