//! Crate session - Conversation vocale en temps réel avec un flow
//!
//! Ce crate relie la capture micro, le socket de session et la file de
//! lecture. La logique de conversation est une machine à états pure
//! (`SessionMachine`), pilotée par une boucle tokio (`SessionRunner`).
//!
//! # Architecture
//!
//! - `state` : états et vue de la session
//! - `machine` : transitions, sans I/O
//! - `runner` : boucle `select!` qui exécute les commandes de la machine
//! - `credentials` : clés fournisseur (mémoire, environnement)
//! - `preferences` : langue, micro et voix de l'utilisateur
//! - `notifier` : signaux vers le graphe d'exécution du flow
//! - `observer` : ce que l'interface voit de la session
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audio::{AudioConfig, CpalCapture, CpalPlayback};
//! use network::{NetworkConfig, WebSocketConnector};
//! use session::{LayeredCredentials, RecordingObserver, SessionConfig, SessionRunner, UserCommand, VoicePreferences};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new("ws://localhost:7860", "my-flow");
//! let runner = SessionRunner::new(
//!     config.clone(),
//!     VoicePreferences::default(),
//!     Box::new(CpalCapture::new(AudioConfig::default())?),
//!     Box::new(CpalPlayback::new(AudioConfig::default())?),
//!     Arc::new(WebSocketConnector::new(NetworkConfig::default())?),
//!     Arc::new(LayeredCredentials::from_env()),
//!     Arc::new(RecordingObserver::new()),
//! )?;
//!
//! let (commands, rx) = mpsc::channel(16);
//! commands.send(UserCommand::EnableVoice).await?;
//! let snapshot = runner.run(rx).await?;
//! println!("{:?}", snapshot.state);
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod state;
mod machine;
mod runner;
mod config;
mod credentials;
mod preferences;
mod notifier;
mod observer;

// Réexports publics
pub use error::*;
pub use state::*;
pub use machine::{SessionCommand, SessionEvent, SessionMachine};
pub use runner::{SessionRunner, UserCommand};
pub use config::SessionConfig;
pub use credentials::*;
pub use preferences::*;
pub use notifier::*;
pub use observer::*;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use audio::mock::{CaptureController, ManualPlayback, PlaybackController, ScriptedCapture};
    use audio::AudioError;
    use network::{ConnectBehavior, SimulatedConnector, SimulatedPeer};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Instant};

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct RecordingNotifier {
        signals: Mutex<Vec<FlowSignal>>,
    }

    impl FlowNotifier for RecordingNotifier {
        fn notify(&self, _flow_id: &str, signal: FlowSignal) {
            self.signals.lock().unwrap().push(signal);
        }
    }

    struct Harness {
        commands: mpsc::Sender<UserCommand>,
        observer: Arc<RecordingObserver>,
        notifier: Arc<RecordingNotifier>,
        capture: CaptureController,
        playback: PlaybackController,
        connector: Arc<SimulatedConnector>,
        peers: mpsc::UnboundedReceiver<SimulatedPeer>,
        task: JoinHandle<SessionResult<SessionSnapshot>>,
    }

    impl Harness {
        fn start(credentials: MemoryCredentialStore) -> Self {
            Self::start_with(credentials, Vec::new())
        }

        fn start_with(credentials: MemoryCredentialStore, behaviors: Vec<ConnectBehavior>) -> Self {
            let (capture_device, capture) = ScriptedCapture::new();
            let (playback_device, playback) = ManualPlayback::new();
            let (connector, peers) = SimulatedConnector::new();
            for behavior in behaviors {
                connector.push_behavior(behavior);
            }
            let observer = Arc::new(RecordingObserver::new());
            let notifier = Arc::new(RecordingNotifier::default());

            let runner = SessionRunner::new(
                SessionConfig::test_config("flow-1"),
                VoicePreferences::default(),
                Box::new(capture_device),
                Box::new(playback_device),
                connector.clone(),
                Arc::new(credentials),
                observer.clone(),
            )
            .unwrap()
            .with_notifier(notifier.clone());

            let (commands, rx) = mpsc::channel(16);
            let task = tokio::spawn(runner.run(rx));

            Self {
                commands,
                observer,
                notifier,
                capture,
                playback,
                connector,
                peers,
                task,
            }
        }

        async fn send(&self, command: UserCommand) {
            self.commands.send(command).await.unwrap();
        }

        async fn peer(&mut self) -> SimulatedPeer {
            timeout(WAIT, self.peers.recv()).await.unwrap().unwrap()
        }

        async fn reach(&self, state: SessionState) -> bool {
            self.observer.wait_until(WAIT, |r| r.has_reached(state)).await
        }

        async fn settle(&self, state: SessionState) -> bool {
            self.observer
                .wait_until(WAIT, |r| r.last().map(|s| s.state) == Some(state))
                .await
        }

        /// Ouvre une session et attend `Listening`
        async fn listening(&mut self) -> SimulatedPeer {
            self.send(UserCommand::EnableVoice).await;
            let mut peer = self.peer().await;
            assert!(self.reach(SessionState::Listening).await);

            let config = next_of_kind(&mut peer, "elevenlabs.config").await;
            assert_eq!(config["enabled"], false);
            assert!(config.as_object().unwrap().contains_key("voice_id"));
            let update = next_of_kind(&mut peer, "session.update").await;
            assert_eq!(update["session"]["input_audio_transcription"]["language"], "en");
            peer
        }

        async fn close(self) -> SessionSnapshot {
            self.send(UserCommand::Close).await;
            tokio_test::assert_ok!(timeout(WAIT, self.task).await.unwrap().unwrap())
        }
    }

    fn with_key() -> MemoryCredentialStore {
        MemoryCredentialStore::with(CredentialKey::OpenAi, "sk-test")
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(2)).await;
        }
        condition()
    }

    /// Types de tous les messages restants jusqu'à la fermeture par le client
    async fn remaining_kinds(peer: &mut SimulatedPeer) -> Vec<String> {
        timeout(WAIT, async {
            let mut kinds = Vec::new();
            while let Some(value) = peer.recv_json().await {
                kinds.push(value["type"].as_str().unwrap_or_default().to_string());
            }
            kinds
        })
        .await
        .unwrap()
    }

    /// Prochain message du client de ce type, les autres sont sautés
    async fn next_of_kind(peer: &mut SimulatedPeer, kind: &str) -> Value {
        timeout(WAIT, async {
            loop {
                let value = peer.recv_json().await.expect("client fermé");
                if value["type"] == kind {
                    return value;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_conversation_with_barge_in() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;
        assert!(h.capture.is_recording());

        // Parole de l'assistant
        peer.send_audio(&[1000; 480]);
        peer.send_audio(&[2000; 480]);
        assert!(h.reach(SessionState::Speaking).await);
        assert!(eventually(|| h.playback.is_playing() && h.playback.queued() == 1).await);

        // L'utilisateur coupe la parole
        for _ in 0..3 {
            assert!(h.capture.push_speech());
        }
        assert!(h.settle(SessionState::Listening).await);
        assert!(!h.playback.is_playing());
        assert_eq!(h.playback.queued(), 0);
        assert_eq!(next_of_kind(&mut peer, "response.cancel").await["session_id"], "test-session");

        // Fin de la réponse annulée : jamais jouée
        peer.send_audio(&[3000; 480]);
        sleep(Duration::from_millis(50)).await;
        assert!(!h.playback.is_playing());
        assert_eq!(h.observer.states().last(), Some(&SessionState::Listening));

        // Nouvelle réponse
        peer.send_status("response.created");
        peer.send_audio(&[4000; 480]);
        assert!(eventually(|| h.playback.is_playing()).await);
        assert!(h.settle(SessionState::Speaking).await);

        assert_eq!(
            h.observer.states(),
            vec![
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::Listening,
                SessionState::Speaking,
                SessionState::Listening,
                SessionState::Speaking,
            ]
        );
        assert!(h.observer.errors().is_empty());
        assert!(h.notifier.signals.lock().unwrap().contains(&FlowSignal::Running));

        let snapshot = h.close().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(!snapshot.session.is_recording);
    }

    #[tokio::test]
    async fn test_playback_plays_in_arrival_order() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        peer.send_audio(&[100; 240]);
        peer.send_audio(&[200; 240]);
        assert!(eventually(|| h.playback.queued() == 1).await);
        assert_eq!(h.playback.current_sequence(), Some(0));

        // B ne commence qu'à la fin de A
        assert_eq!(h.playback.finish_current(), Some(1));
        assert_eq!(h.playback.played(), vec![0]);
        h.playback.finish_current();
        assert_eq!(h.playback.played(), vec![0, 1]);

        // File vide : retour à l'écoute
        assert!(h.settle(SessionState::Listening).await);
        h.close().await;
    }

    #[tokio::test]
    async fn test_frames_sent_in_capture_order() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        for _ in 0..5 {
            assert!(h.capture.push_silence());
        }
        for expected in 0..5u64 {
            let frame = next_of_kind(&mut peer, "input_audio_buffer.append").await;
            assert_eq!(frame["buffer_id"], expected);
            assert_eq!(frame["flow_id"], "flow-1");
        }
        h.close().await;
    }

    #[tokio::test]
    async fn test_server_error_surfaced_once() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        peer.send_error(Some("internal"), None, "boom");
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);

        let recorded = h.observer.recorded();
        assert_eq!(recorded.errors.len(), 1);
        assert!(recorded.errors[0].contains("boom"));
        assert!(!recorded.last().unwrap().session.is_recording);
        assert!(!h.capture.is_recording());

        next_of_kind(&mut peer, "end_stream").await;
        assert!(eventually(|| peer.is_client_closed()).await);

        // Aucune reconnexion automatique
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.attempts(), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn test_missing_credential_never_connects() {
        let mut h = Harness::start(MemoryCredentialStore::new());

        h.send(UserCommand::EnableVoice).await;
        assert!(h.observer.wait_until(WAIT, |r| !r.errors.is_empty()).await);
        assert!(h.observer.errors()[0].contains("OPENAI_API_KEY"));
        assert_eq!(h.connector.attempts(), 0);
        assert_eq!(h.observer.states(), vec![SessionState::Idle]);

        // Clé invalide : refusée, rien ne change
        h.send(UserCommand::SaveCredential {
            key: CredentialKey::OpenAi,
            value: "  ".to_string(),
        })
        .await;
        assert!(h.observer.wait_until(WAIT, |r| r.errors.len() == 2).await);
        assert_eq!(h.connector.attempts(), 0);

        // La clé arrive : la session démarre
        h.send(UserCommand::SaveCredential {
            key: CredentialKey::OpenAi,
            value: "sk-live".to_string(),
        })
        .await;
        let _peer = h.peer().await;
        assert!(h.reach(SessionState::Listening).await);
        h.close().await;
    }

    #[tokio::test]
    async fn test_double_close_is_idempotent() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        h.send(UserCommand::DisableVoice).await;
        h.send(UserCommand::DisableVoice).await;
        assert!(h.settle(SessionState::Idle).await);

        next_of_kind(&mut peer, "end_stream").await;
        assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());

        let capture = h.capture.clone();
        let snapshot = h.close().await;
        assert_eq!(capture.stops(), 1);
        assert_eq!(snapshot.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let h = Harness::start_with(with_key(), vec![ConnectBehavior::Hang]);

        h.send(UserCommand::EnableVoice).await;
        assert!(h.reach(SessionState::Connecting).await);
        assert!(eventually(|| h.connector.attempts() == 1).await);

        let capture = h.capture.clone();
        let snapshot = h.close().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(capture.starts(), 0);
    }

    #[tokio::test]
    async fn test_dropping_commands_closes_session() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        drop(h.commands);
        let snapshot = tokio_test::assert_ok!(timeout(WAIT, h.task).await.unwrap().unwrap());
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(eventually(|| peer.is_client_closed()).await);
        assert!(!h.capture.is_recording());
    }

    #[tokio::test]
    async fn test_capture_failure_mid_session() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        assert!(h.capture.fail(AudioError::DeviceUnavailable("débranché".into())));
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);

        assert_eq!(h.observer.errors().len(), 1);
        next_of_kind(&mut peer, "end_stream").await;
        h.close().await;
    }

    #[tokio::test]
    async fn test_capture_start_failure() {
        let mut h = Harness::start(with_key());
        h.capture.fail_next_start(AudioError::PermissionDenied("refusé".into()));

        h.send(UserCommand::EnableVoice).await;
        let peer = h.peer().await;
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);

        let errors = h.observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("refusé"));
        assert!(eventually(|| peer.is_client_closed()).await);
        h.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let h = Harness::start_with(with_key(), vec![ConnectBehavior::Refuse("401".to_string())]);

        h.send(UserCommand::EnableVoice).await;
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);
        assert_eq!(h.observer.errors().len(), 1);
        assert!(!h.capture.is_recording());
        h.close().await;
    }

    #[tokio::test]
    async fn test_api_key_missing_from_server() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        peer.send_json(json!({
            "type": "error",
            "code": "api_key_missing",
            "key_name": "ELEVENLABS_API_KEY",
            "message": "ElevenLabs API key not found"
        }));
        assert!(h.settle(SessionState::Idle).await);
        assert!(h.reach(SessionState::Error).await);

        let errors = h.observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ELEVENLABS_API_KEY"));
        h.close().await;
    }

    #[tokio::test]
    async fn test_mute_closes_and_unmute_reopens() {
        let mut h = Harness::start(with_key());
        let first = h.listening().await;

        h.send(UserCommand::SetMuted(true)).await;
        assert!(h.settle(SessionState::Idle).await);
        assert!(eventually(|| first.is_client_closed()).await);
        assert!(!h.capture.is_recording());

        h.send(UserCommand::SetMuted(false)).await;
        let _second = h.peer().await;
        assert!(h.settle(SessionState::Listening).await);
        assert_eq!(h.connector.attempts(), 2);
        assert!(h.observer.errors().is_empty());
        h.close().await;
    }

    #[tokio::test]
    async fn test_server_close_returns_to_idle() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        peer.close();
        assert!(h.settle(SessionState::Idle).await);
        assert!(h.observer.errors().is_empty());
        assert!(!h.capture.is_recording());
        h.close().await;
    }

    #[tokio::test]
    async fn test_abnormal_close_is_error() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        peer.fail("connection reset");
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);
        assert_eq!(h.observer.errors().len(), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn test_turn_complete_refreshes_history() {
        let mut h = Harness::start(with_key());
        let peer = h.listening().await;

        peer.send_json(json!({"type": "flow.build.progress", "data": {"step": 1}}));
        peer.send_audio(&[500; 240]);
        peer.send_turn_complete();

        assert!(h.observer.wait_until(WAIT, |r| r.history_refreshes == vec!["test-session"]).await);
        let signals = h.notifier.signals.lock().unwrap().clone();
        assert_eq!(signals, vec![FlowSignal::Progress(json!({"step": 1})), FlowSignal::Built]);

        // La lecture continue jusqu'au bout après la fin du tour
        assert_eq!(h.observer.states().last(), Some(&SessionState::Speaking));
        h.playback.finish_all();
        assert!(h.settle(SessionState::Listening).await);
        h.close().await;
    }

    #[tokio::test]
    async fn test_playback_failure_mid_session() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        peer.send_audio(&[1000; 480]);
        assert!(h.reach(SessionState::Speaking).await);

        h.playback.fail(AudioError::DeviceUnavailable("casque débranché".into()));
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);

        let errors = h.observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("casque débranché"));
        assert!(!h.capture.is_recording());
        assert!(!h.playback.is_playing());
        next_of_kind(&mut peer, "end_stream").await;
        h.close().await;
    }

    #[tokio::test]
    async fn test_late_drained_signal_keeps_speaking() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        peer.send_audio(&[1000; 240]);
        peer.send_audio(&[2000; 240]);
        assert!(eventually(|| h.playback.queued() == 1).await);
        assert!(h.reach(SessionState::Speaking).await);

        // Fin de lecture signalée alors qu'un chunk joue encore
        h.playback.emit_drained();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.observer.states().last(), Some(&SessionState::Speaking));

        // La parole de l'utilisateur coupe toujours la réponse
        for _ in 0..3 {
            assert!(h.capture.push_speech());
        }
        assert!(h.settle(SessionState::Listening).await);
        assert!(!h.playback.is_playing());
        next_of_kind(&mut peer, "response.cancel").await;
        h.close().await;
    }

    #[tokio::test]
    async fn test_credential_revoked_mid_session() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        h.send(UserCommand::RemoveCredential(CredentialKey::OpenAi)).await;
        assert!(h.reach(SessionState::Error).await);
        assert!(h.settle(SessionState::Idle).await);

        let errors = h.observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("OPENAI_API_KEY"));
        assert!(!h.capture.is_recording());
        next_of_kind(&mut peer, "end_stream").await;
        assert!(eventually(|| peer.is_client_closed()).await);

        // Révoquer une clé absente hors session ne change rien
        h.send(UserCommand::RemoveCredential(CredentialKey::OpenAi)).await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(h.observer.errors().len(), 1);
        assert_eq!(h.connector.attempts(), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn test_barge_in_after_turn_complete_sends_no_cancel() {
        let mut h = Harness::start(with_key());
        let mut peer = h.listening().await;

        peer.send_audio(&[1000; 240]);
        peer.send_audio(&[2000; 240]);
        peer.send_turn_complete();
        assert!(h.observer.wait_until(WAIT, |r| r.history_refreshes.len() == 1).await);
        assert!(eventually(|| h.playback.queued() == 1).await);

        for _ in 0..3 {
            assert!(h.capture.push_speech());
        }
        assert!(h.settle(SessionState::Listening).await);
        assert!(!h.playback.is_playing());

        let snapshot = h.close().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        let kinds = remaining_kinds(&mut peer).await;
        assert!(!kinds.iter().any(|kind| kind == "response.cancel"));
        assert_eq!(kinds.last().map(String::as_str), Some("end_stream"));
    }
}
