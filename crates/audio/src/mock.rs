//! Implémentations sans matériel pour les tests
//!
//! `ScriptedCapture` et `ManualPlayback` se pilotent depuis le test via leur
//! contrôleur : on pousse des blocs « parlés » ou silencieux, on simule la
//! mort du micro ou de la sortie, on termine la lecture d'un chunk à la main.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    AudioCapture, AudioChunk, AudioError, AudioPlayback, AudioResult, CaptureSink, PlaybackQueue,
    PlaybackSignal, PlaybackStats, RecordingFrame, Sample,
};

/// Fréquence des blocs produits par les helpers du contrôleur
pub const MOCK_SAMPLE_RATE: u32 = 24000;

/// Taille des blocs produits par les helpers (20ms à 24 kHz)
pub const MOCK_FRAME_LEN: usize = 480;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct CaptureState {
    sink: Option<CaptureSink>,
    start_error: Option<AudioError>,
    next_sequence: u64,
    starts: usize,
    stops: usize,
    delivered: u64,
}

/// Capture pilotée par un `CaptureController`
pub struct ScriptedCapture {
    state: Arc<Mutex<CaptureState>>,
}

/// Poignée de test d'une `ScriptedCapture`
#[derive(Clone)]
pub struct CaptureController {
    state: Arc<Mutex<CaptureState>>,
}

impl ScriptedCapture {
    pub fn new() -> (Self, CaptureController) {
        let state = Arc::new(Mutex::new(CaptureState::default()));
        (
            Self { state: Arc::clone(&state) },
            CaptureController { state },
        )
    }
}

impl CaptureController {
    /// Pousse un bloc vers le sink actif
    ///
    /// Retourne `false` si la capture n'est pas démarrée (bloc perdu).
    pub fn push_samples(&self, samples: Vec<Sample>) -> bool {
        let mut state = lock(&self.state);
        let sequence = state.next_sequence;

        let Some(sink) = state.sink.as_mut() else {
            return false;
        };
        (sink.on_frame)(RecordingFrame::new(samples, MOCK_SAMPLE_RATE, sequence));

        state.next_sequence += 1;
        state.delivered += 1;
        true
    }

    /// Pousse un bloc au-dessus de tous les seuils de parole raisonnables
    pub fn push_speech(&self) -> bool {
        self.push_samples(vec![0.3; MOCK_FRAME_LEN])
    }

    pub fn push_silence(&self) -> bool {
        self.push_samples(vec![0.0; MOCK_FRAME_LEN])
    }

    /// Simule la mort du périphérique en cours de capture
    pub fn fail(&self, error: AudioError) -> bool {
        let sink = lock(&self.state).sink.take();
        match sink {
            Some(mut sink) => {
                (sink.on_failure)(error);
                true
            }
            None => false,
        }
    }

    /// Le prochain `start()` échouera avec cette erreur
    pub fn fail_next_start(&self, error: AudioError) {
        lock(&self.state).start_error = Some(error);
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    /// Blocs effectivement remis au sink
    pub fn delivered(&self) -> u64 {
        lock(&self.state).delivered
    }
}

#[async_trait]
impl AudioCapture for ScriptedCapture {
    async fn start(&mut self, sink: CaptureSink) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.start_error.take() {
            return Err(error);
        }
        if state.sink.is_some() {
            return Err(AudioError::InvalidState("capture déjà démarrée".to_string()));
        }

        state.starts += 1;
        state.next_sequence = 0;
        state.sink = Some(sink);
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if state.sink.take().is_some() {
            state.stops += 1;
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    fn device_info(&self) -> String {
        "Microphone scripté".to_string()
    }
}

struct PlaybackState {
    queue: PlaybackQueue,
    started: bool,
    start_error: Option<AudioError>,
    signal_tx: mpsc::UnboundedSender<PlaybackSignal>,
}

/// Lecture dont l'avancement est piloté par un `PlaybackController`
pub struct ManualPlayback {
    state: Arc<Mutex<PlaybackState>>,
    signal_rx: Option<mpsc::UnboundedReceiver<PlaybackSignal>>,
}

/// Poignée de test d'une `ManualPlayback`
#[derive(Clone)]
pub struct PlaybackController {
    state: Arc<Mutex<PlaybackState>>,
}

impl ManualPlayback {
    pub fn new() -> (Self, PlaybackController) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(PlaybackState {
            queue: PlaybackQueue::new(),
            started: false,
            start_error: None,
            signal_tx,
        }));

        (
            Self { state: Arc::clone(&state), signal_rx: Some(signal_rx) },
            PlaybackController { state },
        )
    }
}

impl PlaybackController {
    /// Termine le chunk en cours, comme si le périphérique l'avait joué
    ///
    /// Émet `Drained` quand la file passe à vide.
    pub fn finish_current(&self) -> Option<u64> {
        let mut state = lock(&self.state);
        if !state.queue.is_playing() {
            return None;
        }

        let next = state.queue.play_next();
        if state.queue.take_drained() {
            let _ = state.signal_tx.send(PlaybackSignal::Drained);
        }
        next
    }

    /// Joue tout ce qui est en file
    pub fn finish_all(&self) {
        while self.finish_current().is_some() {}
    }

    pub fn fail_next_start(&self, error: AudioError) {
        lock(&self.state).start_error = Some(error);
    }

    /// Émet `Drained` sans toucher à la file, comme un signal encore en vol
    /// quand un nouveau chunk arrive
    pub fn emit_drained(&self) {
        let _ = lock(&self.state).signal_tx.send(PlaybackSignal::Drained);
    }

    /// Simule la perte de la sortie audio pendant la lecture
    pub fn fail(&self, error: AudioError) {
        let _ = lock(&self.state).signal_tx.send(PlaybackSignal::Failed(error));
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).queue.is_playing()
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn current_sequence(&self) -> Option<u64> {
        lock(&self.state).queue.current_sequence()
    }

    /// Séquences jouées jusqu'au bout, dans l'ordre
    pub fn played(&self) -> Vec<u64> {
        lock(&self.state).queue.played()
    }

    pub fn stats(&self) -> PlaybackStats {
        lock(&self.state).queue.stats()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }
}

#[async_trait]
impl AudioPlayback for ManualPlayback {
    async fn start(&mut self) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.start_error.take() {
            return Err(error);
        }
        state.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        let mut state = lock(&self.state);
        state.queue.interrupt();
        state.started = false;
        Ok(())
    }

    async fn enqueue(&mut self, chunk: AudioChunk) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if !state.started {
            return Err(AudioError::InvalidState("lecture non démarrée".to_string()));
        }
        state.queue.enqueue(chunk);
        Ok(())
    }

    async fn interrupt(&mut self) -> usize {
        lock(&self.state).queue.interrupt()
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).queue.is_playing()
    }

    fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    fn stats(&self) -> PlaybackStats {
        lock(&self.state).queue.stats()
    }

    fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<PlaybackSignal>> {
        self.signal_rx.take()
    }

    fn device_info(&self) -> String {
        "Sortie manuelle".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_capture_delivers_in_order() {
        let (mut capture, controller) = ScriptedCapture::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(!controller.push_speech());

        capture
            .start(CaptureSink::new(move |frame: RecordingFrame| {
                let _ = tx.send(frame.sequence_number);
            }, |_| {}))
            .await
            .unwrap();

        controller.push_speech();
        controller.push_silence();
        controller.push_speech();

        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(controller.delivered(), 3);

        capture.stop().await.unwrap();
        capture.stop().await.unwrap();
        assert_eq!(controller.stops(), 1);
        assert!(!controller.push_speech());
    }

    #[tokio::test]
    async fn test_scripted_capture_failure() {
        let (mut capture, controller) = ScriptedCapture::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        capture
            .start(CaptureSink::new(|_| {}, move |error| {
                let _ = tx.send(error);
            }))
            .await
            .unwrap();

        assert!(controller.fail(AudioError::DeviceUnavailable("débranché".into())));
        assert!(matches!(rx.recv().await, Some(AudioError::DeviceUnavailable(_))));
        assert!(!capture.is_recording());
    }

    #[tokio::test]
    async fn test_scripted_capture_start_error() {
        let (mut capture, controller) = ScriptedCapture::new();
        controller.fail_next_start(AudioError::PermissionDenied("refusé".into()));

        let result = capture.start(CaptureSink::new(|_| {}, |_| {})).await;
        assert!(matches!(result, Err(AudioError::PermissionDenied(_))));
        assert!(!controller.is_recording());
    }

    #[tokio::test]
    async fn test_manual_playback_drained_signal() {
        let (mut playback, controller) = ManualPlayback::new();
        let mut signals = playback.take_signals().unwrap();
        playback.start().await.unwrap();

        playback.enqueue(AudioChunk::new(vec![0.1; 4], 24000, 1)).await.unwrap();
        playback.enqueue(AudioChunk::new(vec![0.1; 4], 24000, 2)).await.unwrap();

        assert_eq!(controller.finish_current(), Some(2));
        assert!(signals.try_recv().is_err());
        assert_eq!(controller.finish_current(), None);
        assert_eq!(signals.recv().await, Some(PlaybackSignal::Drained));
        assert_eq!(controller.played(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_manual_playback_interrupt_no_signal() {
        let (mut playback, controller) = ManualPlayback::new();
        let mut signals = playback.take_signals().unwrap();
        playback.start().await.unwrap();

        for sequence in 0..5 {
            playback.enqueue(AudioChunk::new(vec![0.1; 4], 24000, sequence)).await.unwrap();
        }
        assert_eq!(playback.interrupt().await, 5);
        assert!(!controller.is_playing());
        assert_eq!(controller.queued(), 0);
        assert!(signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_playback_failure_signal() {
        let (mut playback, controller) = ManualPlayback::new();
        let mut signals = playback.take_signals().unwrap();

        controller.fail(AudioError::DeviceUnavailable("casque débranché".into()));
        assert!(matches!(
            signals.recv().await,
            Some(PlaybackSignal::Failed(AudioError::DeviceUnavailable(_)))
        ));
    }
}
