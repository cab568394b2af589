//! Boucle d'exécution d'une session
//!
//! Le runner possède tous les collaborateurs (capture, lecture, socket) et
//! une `SessionMachine`. Une seule tâche tokio attend, via `select!`, les
//! commandes utilisateur, la connexion en cours, le socket, les blocs
//! capturés et les signaux de lecture. Chaque entrée devient un
//! `SessionEvent`, et les commandes retournées par la machine sont
//! exécutées dans l'ordre avant de traiter l'entrée suivante.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use audio::{
    AudioCapture, AudioCodec, AudioError, AudioPlayback, CaptureSink, Pcm16Codec, PlaybackSignal, RecordingFrame,
    SpeechDetector,
};
use network::{
    ClientMessage, InboundEvent, NetworkResult, SessionSocket, SessionTarget, SocketConnector,
    SocketEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    first_missing, CredentialKey, CredentialResolver, FlowNotifier, NoopNotifier, SessionCommand, SessionConfig,
    SessionError, SessionEvent, SessionMachine, SessionObserver, SessionResult, SessionSnapshot, SessionState,
    VoicePreferences,
};

type ConnectFuture = Pin<Box<dyn Future<Output = NetworkResult<SessionSocket>> + Send>>;

/// Actions de l'utilisateur
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserCommand {
    EnableVoice,
    DisableVoice,
    SetMuted(bool),
    SaveCredential { key: CredentialKey, value: String },
    RemoveCredential(CredentialKey),
    Close,
}

/// Ce que le callback de capture fait parvenir à la boucle
///
/// La génération identifie le démarrage de capture d'origine : les blocs
/// d'une capture arrêtée sont jetés.
enum CaptureEvent {
    Frame(u64, RecordingFrame),
    Failed(u64, AudioError),
}

enum Input {
    User(UserCommand),
    Connected(NetworkResult<SessionSocket>),
    Socket(SocketEvent),
    Capture(CaptureEvent),
    Playback(PlaybackSignal),
}

pub struct SessionRunner {
    machine: SessionMachine,
    config: SessionConfig,
    target: SessionTarget,
    preferences: VoicePreferences,

    capture: Box<dyn AudioCapture>,
    playback: Box<dyn AudioPlayback>,
    connector: Arc<dyn SocketConnector>,
    credentials: Arc<dyn CredentialResolver>,
    notifier: Arc<dyn FlowNotifier>,
    observer: Arc<dyn SessionObserver>,
    codec: Arc<dyn AudioCodec>,
    detector: SpeechDetector,

    socket: Option<SessionSocket>,
    connecting: Option<ConnectFuture>,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    capture_generation: u64,
    playback_signals: Option<mpsc::UnboundedReceiver<PlaybackSignal>>,
    playback_started: bool,
}

impl SessionRunner {
    pub fn new(
        config: SessionConfig,
        preferences: VoicePreferences,
        capture: Box<dyn AudioCapture>,
        mut playback: Box<dyn AudioPlayback>,
        connector: Arc<dyn SocketConnector>,
        credentials: Arc<dyn CredentialResolver>,
        observer: Arc<dyn SessionObserver>,
    ) -> SessionResult<Self> {
        config.validate().map_err(SessionError::Config)?;

        let codec: Arc<dyn AudioCodec> = Arc::new(Pcm16Codec::new(&config.audio).map_err(SessionError::Capture)?);
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let playback_signals = playback.take_signals();

        Ok(Self {
            machine: SessionMachine::new(&config.flow_id, &config.session_id),
            target: config.target(),
            detector: SpeechDetector::new(&config.audio),
            config,
            preferences,
            capture,
            playback,
            connector,
            credentials,
            notifier: Arc::new(NoopNotifier),
            observer,
            codec,
            socket: None,
            connecting: None,
            capture_tx,
            capture_rx,
            capture_generation: 0,
            playback_signals,
            playback_started: false,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FlowNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.machine.snapshot()
    }

    /// Exécute la session jusqu'à `UserCommand::Close` ou la fermeture du canal
    ///
    /// Retourne l'état final. Les erreurs de session passent par
    /// l'observateur, pas par le résultat.
    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) -> SessionResult<SessionSnapshot> {
        info!(
            flow_id = %self.config.flow_id,
            session_id = %self.config.session_id,
            "Démarrage de la session vocale"
        );

        self.observer.on_state(&self.machine.snapshot());
        let missing = self.missing_credential();
        self.dispatch(SessionEvent::CredentialChanged { missing }).await;
        if self.config.start_muted {
            self.dispatch(SessionEvent::MuteChanged { muted: true }).await;
        }

        loop {
            let input = tokio::select! {
                command = commands.recv() => Input::User(command.unwrap_or(UserCommand::Close)),
                result = poll_connect(&mut self.connecting) => Input::Connected(result),
                event = next_socket_event(&mut self.socket) => Input::Socket(event),
                Some(event) = self.capture_rx.recv() => Input::Capture(event),
                Some(signal) = next_playback_signal(&mut self.playback_signals) => Input::Playback(signal),
            };

            match input {
                Input::User(UserCommand::Close) => {
                    self.dispatch(SessionEvent::CloseRequested).await;
                    break;
                }
                Input::User(command) => self.on_user_command(command).await,
                Input::Connected(result) => self.on_connected(result).await,
                Input::Socket(event) => self.on_socket_event(event).await,
                Input::Capture(event) => self.on_capture_event(event).await,
                Input::Playback(signal) => self.on_playback_signal(signal).await,
            }
        }

        self.shutdown().await;
        let snapshot = self.machine.snapshot();
        info!(state = ?snapshot.state, "Session vocale terminée");
        Ok(snapshot)
    }

    fn missing_credential(&self) -> Option<CredentialKey> {
        first_missing(self.credentials.as_ref(), &self.preferences)
    }

    async fn on_user_command(&mut self, command: UserCommand) {
        match command {
            UserCommand::EnableVoice => self.dispatch(SessionEvent::VoiceModeEnabled).await,
            UserCommand::DisableVoice => self.dispatch(SessionEvent::VoiceModeDisabled).await,
            UserCommand::SetMuted(muted) => self.dispatch(SessionEvent::MuteChanged { muted }).await,
            UserCommand::SaveCredential { key, value } => match self.credentials.save_credential(key, &value) {
                Ok(()) => {
                    debug!(key = %key, "Clé saisie");
                    let missing = self.missing_credential();
                    self.dispatch(SessionEvent::CredentialChanged { missing }).await;
                }
                Err(e) => self.dispatch(SessionEvent::CredentialSaveFailed(e)).await,
            },
            UserCommand::RemoveCredential(key) => match self.credentials.remove_credential(key) {
                Ok(removed) => {
                    debug!(key = %key, removed, "Clé révoquée");
                    let missing = self.missing_credential();
                    self.dispatch(SessionEvent::CredentialChanged { missing }).await;
                }
                Err(e) => self.dispatch(SessionEvent::CredentialSaveFailed(e)).await,
            },
            UserCommand::Close => self.dispatch(SessionEvent::CloseRequested).await,
        }
    }

    async fn on_connected(&mut self, result: NetworkResult<SessionSocket>) {
        let mut socket = match result {
            Ok(socket) => socket,
            Err(e) => return self.dispatch(SessionEvent::SocketFailed(e)).await,
        };

        let voice = &self.preferences.voice;
        let mut setup = vec![ClientMessage::VoiceConfig {
            enabled: voice.uses_eleven_labs(),
            voice_id: voice.uses_eleven_labs().then(|| voice.voice_id.clone()),
        }];
        if let Some(language) = self.preferences.transcription_language() {
            setup.push(ClientMessage::transcription_language(language));
        }

        for message in setup {
            if let Err(e) = socket.send_control(message).await {
                let _ = socket.close().await;
                return self.dispatch(SessionEvent::SocketFailed(e)).await;
            }
        }

        self.socket = Some(socket);
        self.dispatch(SessionEvent::SocketOpened).await;
    }

    async fn on_socket_event(&mut self, event: SocketEvent) {
        let event = match event {
            SocketEvent::Message(InboundEvent::Audio(chunk)) => SessionEvent::AudioReceived(chunk),
            SocketEvent::Message(InboundEvent::Status(status)) => SessionEvent::StatusReceived(status),
            SocketEvent::Message(InboundEvent::TurnComplete) => SessionEvent::TurnComplete,
            SocketEvent::Message(InboundEvent::Error(error)) => SessionEvent::ServerError(error),
            SocketEvent::Closed { clean, reason } => {
                self.drop_socket().await;
                SessionEvent::SocketClosed { clean, reason }
            }
            SocketEvent::Failed(e) => {
                self.drop_socket().await;
                SessionEvent::SocketFailed(e)
            }
        };
        self.dispatch(event).await;
    }

    async fn on_playback_signal(&mut self, signal: PlaybackSignal) {
        match signal {
            // Un chunk a pu être ajouté depuis l'émission du signal
            PlaybackSignal::Drained if self.playback.is_playing() || self.playback.queued() > 0 => {
                trace!("Signal de fin de lecture périmé, ignoré");
            }
            PlaybackSignal::Drained => self.dispatch(SessionEvent::PlaybackDrained).await,
            PlaybackSignal::Failed(e) => self.dispatch(SessionEvent::PlaybackFailed(e)).await,
        }
    }

    async fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame(generation, frame) => {
                if generation != self.capture_generation || !self.machine.session().is_recording {
                    trace!(sequence = frame.sequence_number, "Bloc d'une capture arrêtée, ignoré");
                    return;
                }
                self.on_frame(frame).await;
            }
            CaptureEvent::Failed(generation, e) => {
                if generation == self.capture_generation {
                    self.dispatch(SessionEvent::CaptureFailed(e)).await;
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: RecordingFrame) {
        if self.config.local_barge_in
            && self.detector.process(&frame)
            && self.machine.state() == SessionState::Speaking
        {
            self.dispatch(SessionEvent::UserSpeech).await;
        }

        let encoded = match self.codec.encode(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(sequence = frame.sequence_number, "Bloc non encodé : {}", e);
                return;
            }
        };

        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        if let Err(e) = socket.send_frame(&encoded).await {
            self.drop_socket().await;
            self.dispatch(SessionEvent::SocketFailed(e)).await;
        }
    }

    /// Applique un événement, puis ceux que ses commandes produisent
    async fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let before = self.machine.snapshot();
            for command in self.machine.handle(event) {
                if let Some(follow_up) = self.execute(command).await {
                    queue.push_back(follow_up);
                }
            }

            let after = self.machine.snapshot();
            if after != before {
                self.observer.on_state(&after);
            }

            // L'erreur vient d'être remontée : retour à Idle
            if queue.is_empty() && after.state == SessionState::Error {
                queue.push_back(SessionEvent::ErrorAcknowledged);
            }
        }
    }

    async fn execute(&mut self, command: SessionCommand) -> Option<SessionEvent> {
        trace!(command = command.name(), "Exécution");
        match command {
            SessionCommand::OpenSocket => {
                if self.socket.is_some() || self.connecting.is_some() {
                    warn!("Socket déjà présent, fermeture avant réouverture");
                    self.drop_socket().await;
                }
                let connector = Arc::clone(&self.connector);
                let target = self.target.clone();
                let codec = Arc::clone(&self.codec);
                self.connecting = Some(Box::pin(async move {
                    SessionSocket::open(connector.as_ref(), &target, codec).await
                }));
                None
            }
            SessionCommand::CloseSocket => {
                self.drop_socket().await;
                None
            }
            SessionCommand::StartCapture => self.start_capture().await,
            SessionCommand::StopCapture => {
                self.capture_generation += 1;
                if let Err(e) = self.capture.stop().await {
                    warn!("Arrêt de la capture : {}", e);
                }
                None
            }
            SessionCommand::Enqueue(chunk) => match self.playback.enqueue(chunk).await {
                Ok(()) => None,
                Err(e) => Some(SessionEvent::PlaybackFailed(e)),
            },
            SessionCommand::InterruptPlayback => {
                let discarded = self.playback.interrupt().await;
                if discarded > 0 {
                    debug!(discarded, "Lecture interrompue");
                }
                None
            }
            SessionCommand::SendPlaybackStop => {
                let socket = self.socket.as_mut()?;
                match socket.send_control(ClientMessage::ResponseCancel).await {
                    Ok(()) => None,
                    Err(e) => {
                        self.drop_socket().await;
                        Some(SessionEvent::SocketFailed(e))
                    }
                }
            }
            SessionCommand::RefreshHistory => {
                self.observer.on_history_refresh(&self.config.session_id);
                None
            }
            SessionCommand::ReportStatus(status) => {
                self.observer.on_status(&status);
                None
            }
            SessionCommand::ReportError(e) => {
                error!("Erreur de session : {}", e);
                self.observer.on_error(&e);
                None
            }
            SessionCommand::Notify(signal) => {
                self.notifier.notify(&self.config.flow_id, signal);
                None
            }
        }
    }

    async fn start_capture(&mut self) -> Option<SessionEvent> {
        if !self.playback_started {
            if let Err(e) = self.playback.start().await {
                return Some(SessionEvent::PlaybackFailed(e));
            }
            self.playback_started = true;
        }

        self.capture_generation += 1;
        self.detector.reset();

        let generation = self.capture_generation;
        let frames = self.capture_tx.clone();
        let failures = self.capture_tx.clone();
        let sink = CaptureSink::new(
            move |frame| {
                let _ = frames.send(CaptureEvent::Frame(generation, frame));
            },
            move |e| {
                let _ = failures.send(CaptureEvent::Failed(generation, e));
            },
        );

        match self.capture.start(sink).await {
            Ok(()) => {
                info!(device = %self.capture.device_info(), "Capture démarrée");
                None
            }
            Err(e) => Some(SessionEvent::CaptureFailed(e)),
        }
    }

    /// Abandonne une connexion en cours et ferme le socket (idempotent)
    async fn drop_socket(&mut self) {
        if self.connecting.take().is_some() {
            debug!("Connexion en cours abandonnée");
        }
        if let Some(mut socket) = self.socket.take() {
            let stats = socket.stats();
            if let Err(e) = socket.close().await {
                debug!("Fermeture du socket : {}", e);
            }
            debug!(frames_sent = stats.frames_sent, chunks = stats.chunks_received, "Socket libéré");
        }
    }

    async fn shutdown(&mut self) {
        self.capture_generation += 1;
        if let Err(e) = self.capture.stop().await {
            warn!("Arrêt de la capture : {}", e);
        }
        self.playback.interrupt().await;
        if let Err(e) = self.playback.stop().await {
            warn!("Arrêt de la lecture : {}", e);
        }
        self.playback_started = false;
        self.drop_socket().await;
    }
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> NetworkResult<SessionSocket> {
    match connecting.as_mut() {
        Some(future) => {
            let result = future.await;
            *connecting = None;
            result
        }
        None => pending().await,
    }
}

async fn next_socket_event(socket: &mut Option<SessionSocket>) -> SocketEvent {
    match socket.as_mut() {
        Some(socket) => socket.next_event().await,
        None => pending().await,
    }
}

async fn next_playback_signal(signals: &mut Option<mpsc::UnboundedReceiver<PlaybackSignal>>) -> Option<PlaybackSignal> {
    match signals.as_mut() {
        Some(signals) => signals.recv().await,
        None => pending().await,
    }
}
