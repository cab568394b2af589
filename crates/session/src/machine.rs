//! Machine à états de la session
//!
//! `SessionMachine` ne fait aucune I/O : elle reçoit des `SessionEvent` et
//! retourne les `SessionCommand` que le runner doit exécuter, dans l'ordre.
//! Toutes les règles de la conversation vivent ici :
//!
//! - un seul socket à la fois, ouvert uniquement depuis `Idle`
//! - à la fermeture, capture et lecture sont arrêtées avant le socket
//! - après un barge-in, l'audio de la réponse annulée est jeté jusqu'au
//!   prochain début de tour
//! - une erreur passe par `Error` puis revient à `Idle` une fois signalée

use audio::{AudioChunk, AudioError};
use network::{NetworkError, ServerError, StatusUpdate};
use tracing::{debug, info, warn};

use crate::{CredentialKey, FlowSignal, SaveError, Session, SessionError, SessionSnapshot, SessionState};

const STATUS_IDLE: &str = "Inactif";
const STATUS_CONNECTING: &str = "Connexion...";
const STATUS_LISTENING: &str = "À l'écoute";
const STATUS_SPEAKING: &str = "L'assistant parle";
const STATUS_MUTED: &str = "Microphone coupé";
const STATUS_CLOSED: &str = "Session terminée";
const STATUS_ERROR: &str = "Erreur";

/// Entrées de la machine
#[derive(Debug)]
pub enum SessionEvent {
    VoiceModeEnabled,
    VoiceModeDisabled,

    /// Présence des clés recalculée (`missing` = première clé requise absente)
    CredentialChanged { missing: Option<CredentialKey> },

    MuteChanged { muted: bool },
    SocketOpened,
    SocketFailed(NetworkError),
    SocketClosed { clean: bool, reason: Option<String> },
    AudioReceived(AudioChunk),
    StatusReceived(StatusUpdate),
    TurnComplete,
    ServerError(ServerError),

    /// L'utilisateur parle (détection locale ou serveur)
    UserSpeech,

    PlaybackDrained,
    CaptureFailed(AudioError),
    PlaybackFailed(AudioError),
    CredentialSaveFailed(SaveError),

    /// L'erreur a été montrée à l'utilisateur
    ErrorAcknowledged,

    CloseRequested,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::VoiceModeEnabled => "VoiceModeEnabled",
            SessionEvent::VoiceModeDisabled => "VoiceModeDisabled",
            SessionEvent::CredentialChanged { .. } => "CredentialChanged",
            SessionEvent::MuteChanged { .. } => "MuteChanged",
            SessionEvent::SocketOpened => "SocketOpened",
            SessionEvent::SocketFailed(_) => "SocketFailed",
            SessionEvent::SocketClosed { .. } => "SocketClosed",
            SessionEvent::AudioReceived(_) => "AudioReceived",
            SessionEvent::StatusReceived(_) => "StatusReceived",
            SessionEvent::TurnComplete => "TurnComplete",
            SessionEvent::ServerError(_) => "ServerError",
            SessionEvent::UserSpeech => "UserSpeech",
            SessionEvent::PlaybackDrained => "PlaybackDrained",
            SessionEvent::CaptureFailed(_) => "CaptureFailed",
            SessionEvent::PlaybackFailed(_) => "PlaybackFailed",
            SessionEvent::CredentialSaveFailed(_) => "CredentialSaveFailed",
            SessionEvent::ErrorAcknowledged => "ErrorAcknowledged",
            SessionEvent::CloseRequested => "CloseRequested",
        }
    }
}

/// Sorties de la machine, exécutées par le runner
#[derive(Debug)]
pub enum SessionCommand {
    OpenSocket,
    CloseSocket,
    StartCapture,
    StopCapture,
    Enqueue(AudioChunk),
    InterruptPlayback,

    /// Demande au backend d'arrêter la réponse en cours
    SendPlaybackStop,

    RefreshHistory,
    ReportStatus(String),
    ReportError(SessionError),
    Notify(FlowSignal),
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::OpenSocket => "OpenSocket",
            SessionCommand::CloseSocket => "CloseSocket",
            SessionCommand::StartCapture => "StartCapture",
            SessionCommand::StopCapture => "StopCapture",
            SessionCommand::Enqueue(_) => "Enqueue",
            SessionCommand::InterruptPlayback => "InterruptPlayback",
            SessionCommand::SendPlaybackStop => "SendPlaybackStop",
            SessionCommand::RefreshHistory => "RefreshHistory",
            SessionCommand::ReportStatus(_) => "ReportStatus",
            SessionCommand::ReportError(_) => "ReportError",
            SessionCommand::Notify(_) => "Notify",
        }
    }
}

pub struct SessionMachine {
    session: Session,
    state: SessionState,
    voice_enabled: bool,
    muted: bool,
    missing_credential: Option<CredentialKey>,

    // Ressources que la machine croit actives côté runner
    socket_open: bool,
    capture_active: bool,
    playback_active: bool,

    /// Une réponse est en cours de génération côté serveur
    response_active: bool,

    /// Audio de la réponse annulée à jeter
    discard_audio: bool,
}

impl SessionMachine {
    pub fn new(flow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut session = Session::new(flow_id, session_id);
        session.status = STATUS_IDLE.to_string();

        Self {
            session,
            state: SessionState::Idle,
            voice_enabled: false,
            muted: false,
            missing_credential: None,
            socket_open: false,
            capture_active: false,
            playback_active: false,
            response_active: false,
            discard_audio: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session: self.session.clone(),
            muted: self.muted,
            voice_enabled: self.voice_enabled,
        }
    }

    /// Applique un événement et retourne les commandes à exécuter
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionCommand> {
        let before = self.state;
        let name = event.name();

        let commands = match event {
            SessionEvent::VoiceModeEnabled => {
                self.voice_enabled = true;
                self.try_connect()
            }
            SessionEvent::VoiceModeDisabled => {
                self.voice_enabled = false;
                self.teardown(STATUS_IDLE)
            }
            SessionEvent::CloseRequested => {
                self.voice_enabled = false;
                self.teardown(STATUS_CLOSED)
            }
            SessionEvent::CredentialChanged { missing } => self.credential_changed(missing),
            SessionEvent::MuteChanged { muted } => self.mute_changed(muted),
            SessionEvent::SocketOpened => self.socket_opened(),
            SessionEvent::SocketFailed(error) => self.fail_if_active(SessionError::Socket(error)),
            SessionEvent::SocketClosed { clean, reason } => self.socket_closed(clean, reason),
            SessionEvent::AudioReceived(chunk) => self.audio_received(chunk),
            SessionEvent::StatusReceived(status) => self.status_received(status),
            SessionEvent::TurnComplete => self.turn_complete(),
            SessionEvent::ServerError(error) => self.server_error(error),
            SessionEvent::UserSpeech => self.barge_in(),
            SessionEvent::PlaybackDrained => self.playback_drained(),
            SessionEvent::CaptureFailed(error) => self.fail_if_active(SessionError::Capture(error)),
            SessionEvent::PlaybackFailed(error) => self.fail_if_active(SessionError::Playback(error)),
            SessionEvent::CredentialSaveFailed(error) => {
                vec![SessionCommand::ReportError(SessionError::SaveCredential(error))]
            }
            SessionEvent::ErrorAcknowledged => {
                if self.state == SessionState::Error {
                    self.state = SessionState::Idle;
                    self.set_status(STATUS_IDLE)
                } else {
                    Vec::new()
                }
            }
        };

        if self.state != before {
            info!(from = ?before, to = ?self.state, event = name, "Transition de session");
        } else {
            debug!(state = ?self.state, event = name, commands = commands.len(), "Événement traité");
        }
        commands
    }

    fn try_connect(&mut self) -> Vec<SessionCommand> {
        if self.state != SessionState::Idle || !self.voice_enabled {
            return Vec::new();
        }
        if let Some(key) = self.missing_credential {
            warn!(key = %key, "Clé manquante, la session reste inactive");
            return vec![SessionCommand::ReportError(SessionError::CredentialMissing(key))];
        }
        if self.muted {
            return self.set_status(STATUS_MUTED);
        }

        let mut commands = Vec::new();
        if self.socket_open {
            commands.push(SessionCommand::CloseSocket);
        }
        self.socket_open = true;
        self.discard_audio = false;
        self.state = SessionState::Connecting;
        commands.push(SessionCommand::OpenSocket);
        commands.extend(self.set_status(STATUS_CONNECTING));
        commands
    }

    /// Libère capture, lecture puis socket, dans cet ordre
    fn release(&mut self) -> Vec<SessionCommand> {
        let mut commands = Vec::new();
        if self.capture_active {
            self.capture_active = false;
            commands.push(SessionCommand::StopCapture);
        }
        if self.playback_active || self.socket_open {
            self.playback_active = false;
            commands.push(SessionCommand::InterruptPlayback);
        }
        if self.socket_open {
            self.socket_open = false;
            commands.push(SessionCommand::CloseSocket);
        }
        self.response_active = false;
        self.discard_audio = false;
        self.session.is_recording = false;
        commands
    }

    fn teardown(&mut self, status: &str) -> Vec<SessionCommand> {
        let mut commands = self.release();
        if commands.is_empty() && self.state == SessionState::Idle {
            return commands;
        }
        self.state = SessionState::Idle;
        commands.extend(self.set_status(status));
        commands
    }

    fn fail(&mut self, error: SessionError) -> Vec<SessionCommand> {
        warn!(state = ?self.state, "Session en erreur : {}", error);
        let mut commands = self.release();
        self.voice_enabled = false;
        self.state = SessionState::Error;
        commands.extend(self.set_status(STATUS_ERROR));
        commands.push(SessionCommand::ReportError(error));
        commands
    }

    fn fail_if_active(&mut self, error: SessionError) -> Vec<SessionCommand> {
        if self.state.is_active() {
            self.fail(error)
        } else {
            debug!(state = ?self.state, "Erreur ignorée hors session : {}", error);
            Vec::new()
        }
    }

    fn credential_changed(&mut self, missing: Option<CredentialKey>) -> Vec<SessionCommand> {
        self.missing_credential = missing;
        match missing {
            Some(key) if self.state.is_active() => self.fail(SessionError::CredentialMissing(key)),
            _ if self.state == SessionState::Idle && self.voice_enabled => self.try_connect(),
            _ => Vec::new(),
        }
    }

    fn mute_changed(&mut self, muted: bool) -> Vec<SessionCommand> {
        if self.muted == muted {
            return Vec::new();
        }
        self.muted = muted;

        if muted {
            if self.state.is_active() {
                self.teardown(STATUS_MUTED)
            } else {
                self.set_status(STATUS_MUTED)
            }
        } else if self.state == SessionState::Idle && self.voice_enabled {
            self.try_connect()
        } else {
            self.set_status(STATUS_IDLE)
        }
    }

    fn socket_opened(&mut self) -> Vec<SessionCommand> {
        if self.state != SessionState::Connecting {
            warn!(state = ?self.state, "Socket ouvert hors connexion, fermeture");
            return vec![SessionCommand::CloseSocket];
        }

        self.state = SessionState::Listening;
        self.capture_active = true;
        self.session.is_recording = true;

        let mut commands = vec![SessionCommand::StartCapture];
        commands.extend(self.set_status(STATUS_LISTENING));
        commands
    }

    fn socket_closed(&mut self, clean: bool, reason: Option<String>) -> Vec<SessionCommand> {
        if !self.state.is_active() {
            return Vec::new();
        }
        // Pas de reconnexion : l'utilisateur relance le mode vocal
        self.voice_enabled = false;

        if clean {
            info!(reason = reason.as_deref().unwrap_or("-"), "Session fermée par le serveur");
            self.teardown(STATUS_CLOSED)
        } else {
            let reason = reason.unwrap_or_else(|| "fermeture anormale".to_string());
            self.fail(SessionError::Disconnected(reason))
        }
    }

    fn audio_received(&mut self, chunk: AudioChunk) -> Vec<SessionCommand> {
        if self.discard_audio {
            debug!(sequence = chunk.sequence_number, "Audio d'une réponse annulée, ignoré");
            return Vec::new();
        }

        match self.state {
            SessionState::Listening => {
                self.state = SessionState::Speaking;
                self.playback_active = true;
                self.response_active = true;
                let mut commands = vec![SessionCommand::Enqueue(chunk)];
                commands.extend(self.set_status(STATUS_SPEAKING));
                commands
            }
            SessionState::Speaking => {
                self.playback_active = true;
                self.response_active = true;
                vec![SessionCommand::Enqueue(chunk)]
            }
            _ => {
                debug!(state = ?self.state, "Audio reçu hors conversation, ignoré");
                Vec::new()
            }
        }
    }

    fn status_received(&mut self, status: StatusUpdate) -> Vec<SessionCommand> {
        if !self.state.is_active() {
            return Vec::new();
        }

        if status.is_flow_progress() {
            return vec![SessionCommand::Notify(FlowSignal::Progress(status.payload))];
        }

        let mut commands = Vec::new();
        if status.is_response_start() {
            self.response_active = true;
            self.discard_audio = false;
            commands.push(SessionCommand::Notify(FlowSignal::Running));
        }
        if status.is_speech_started() {
            commands.extend(self.barge_in());
        }
        commands.push(SessionCommand::ReportStatus(status.display_text()));
        commands
    }

    fn turn_complete(&mut self) -> Vec<SessionCommand> {
        if !self.state.is_active() {
            return Vec::new();
        }
        self.response_active = false;
        self.discard_audio = false;
        vec![SessionCommand::RefreshHistory, SessionCommand::Notify(FlowSignal::Built)]
    }

    fn server_error(&mut self, error: ServerError) -> Vec<SessionCommand> {
        if error.is_benign() {
            debug!(code = error.code.as_deref().unwrap_or("-"), "Erreur serveur sans effet : {}", error.message);
            return Vec::new();
        }

        let key = error
            .missing_credential()
            .and_then(|name| name.parse::<CredentialKey>().ok());

        let error = match key {
            Some(key) => {
                self.missing_credential = Some(key);
                SessionError::CredentialMissing(key)
            }
            None => SessionError::Server {
                code: error.code,
                message: error.message,
            },
        };
        self.fail_if_active(error)
    }

    fn barge_in(&mut self) -> Vec<SessionCommand> {
        if self.state != SessionState::Speaking {
            return Vec::new();
        }
        info!("Barge-in : interruption de la réponse");

        self.state = SessionState::Listening;
        self.playback_active = false;

        // Réponse déjà terminée : seul le reste de la file est jeté
        let mut commands = vec![SessionCommand::InterruptPlayback];
        if self.response_active {
            commands.push(SessionCommand::SendPlaybackStop);
        }
        self.discard_audio = self.response_active;
        self.response_active = false;

        commands.extend(self.set_status(STATUS_LISTENING));
        commands
    }

    fn playback_drained(&mut self) -> Vec<SessionCommand> {
        self.playback_active = false;
        if self.state != SessionState::Speaking {
            return Vec::new();
        }
        self.state = SessionState::Listening;
        self.set_status(STATUS_LISTENING)
    }

    fn set_status(&mut self, status: &str) -> Vec<SessionCommand> {
        self.session.status = status.to_string();
        vec![SessionCommand::ReportStatus(status.to_string())]
    }
}
