//! Capture microphone avec cpal
//!
//! Le callback cpal reçoit des buffers entrelacés de taille variable. On les
//! mixe en mono puis on les découpe en blocs de taille fixe
//! (`samples_per_frame(device_rate)`), chacun devenant une `RecordingFrame`
//! remise au `CaptureSink`. Aucun bloc n'est perdu ni dupliqué : le sink est
//! appelé directement depuis le callback, sans canal borné intermédiaire.
//!
//! cpal supporte Windows (WASAPI), macOS (CoreAudio) et Linux (ALSA/PulseAudio).

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, SampleFormat, SizedSample, Stream, StreamConfig};
use cpal::Sample as _;
use tracing::{debug, error, info, warn};

use crate::{
    AudioCapture, AudioConfig, AudioError, AudioResult, CaptureSink, FailureHandler, FrameHandler,
    RecordingFrame, Sample,
};

/// Nom lisible d'un périphérique cpal
pub(crate) fn device_name(device: &Device) -> String {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
        .unwrap_or_else(|| "Périphérique inconnu".to_string())
}

/// Liste les microphones disponibles
pub fn list_input_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    Ok(host.input_devices()?.map(|device| device_name(&device)).collect())
}

/// Choisit le microphone : celui demandé par nom s'il existe, sinon le défaut
fn select_input_device(host: &Host, preferred: Option<&str>) -> AudioResult<Device> {
    if let Some(wanted) = preferred {
        let found = host
            .input_devices()?
            .find(|device| device_name(device) == wanted);

        match found {
            Some(device) => return Ok(device),
            None => warn!(device = wanted, "Microphone demandé introuvable, utilisation du défaut"),
        }
    }

    host.default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("aucun microphone par défaut".to_string()))
}

/// Découpe un flux entrelacé en blocs mono de taille fixe
///
/// Structure pure, utilisée dans le callback cpal et testable sans matériel.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<Sample>,
    frame_len: usize,
    channels: usize,
    sample_rate: u32,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_len),
            frame_len: frame_len.max(1),
            channels: channels.max(1),
            sample_rate,
            next_sequence: 0,
        }
    }

    /// Ajoute des échantillons entrelacés, émet chaque bloc complet
    pub fn push<T>(&mut self, data: &[T], mut emit: impl FnMut(RecordingFrame))
    where
        T: SizedSample,
        Sample: FromSample<T>,
    {
        for group in data.chunks(self.channels) {
            let sum: Sample = group.iter().map(|&s| Sample::from_sample(s)).sum();
            self.buffer.push(sum / group.len() as Sample);

            if self.buffer.len() == self.frame_len {
                let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_len));
                emit(RecordingFrame::new(samples, self.sample_rate, self.next_sequence));
                self.next_sequence += 1;
            }
        }
    }

    /// Échantillons en attente d'un bloc complet
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Capture audio via cpal
///
/// Le périphérique est ouvert à `start()` et libéré à `stop()`. Entre les
/// deux, la capture en est l'unique propriétaire.
pub struct CpalCapture {
    config: AudioConfig,
    stream: Option<Stream>,
    device_name: String,
}

impl CpalCapture {
    /// Prépare une capture sans ouvrir le périphérique
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la configuration est invalide
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;

        Ok(Self {
            config,
            stream: None,
            device_name: String::new(),
        })
    }

    fn build_stream(&mut self, sink: CaptureSink) -> AudioResult<Stream> {
        let host = cpal::default_host();
        let device = select_input_device(&host, self.config.input_device.as_deref())?;
        self.device_name = device_name(&device);

        let supported = device.default_input_config()?;
        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();
        let frame_len = self.config.samples_per_frame(stream_config.sample_rate);

        info!(
            device = %self.device_name,
            sample_rate = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            frame_len,
            "Ouverture du microphone"
        );

        let CaptureSink { on_frame, on_failure } = sink;

        match sample_format {
            SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, frame_len, on_frame, on_failure),
            SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, frame_len, on_frame, on_failure),
            SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, frame_len, on_frame, on_failure),
            other => Err(AudioError::ConfigError(format!("Format d'échantillon non supporté : {:?}", other))),
        }
    }
}

fn build_typed<T>(
    device: &Device,
    stream_config: &StreamConfig,
    frame_len: usize,
    mut on_frame: FrameHandler,
    mut on_failure: FailureHandler,
) -> AudioResult<Stream>
where
    T: SizedSample,
    Sample: FromSample<T>,
{
    let mut assembler = FrameAssembler::new(
        frame_len,
        stream_config.channels as usize,
        stream_config.sample_rate,
    );
    let mut failed = false;

    let stream = device.build_input_stream(
        stream_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            assembler.push(data, |frame| on_frame(frame));
        },
        move |err: cpal::StreamError| {
            error!("Erreur stream de capture : {}", err);
            if failed {
                return;
            }
            failed = true;
            on_failure(AudioError::from(err));
        },
        None,
    )?;

    Ok(stream)
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self, sink: CaptureSink) -> AudioResult<()> {
        if self.stream.is_some() {
            return Err(AudioError::InvalidState("capture déjà démarrée".to_string()));
        }

        let stream = self.build_stream(sink)?;
        stream.play()?;
        self.stream = Some(stream);

        info!(device = %self.device_name, "Capture audio démarrée");
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        // Le drop du stream libère le périphérique, même si pause échoue
        if let Err(e) = stream.pause() {
            debug!("Pause du stream de capture impossible : {}", e);
        }
        drop(stream);

        info!(device = %self.device_name, "Capture audio arrêtée");
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.stream.is_some()
    }

    fn device_info(&self) -> String {
        if self.device_name.is_empty() {
            self.config
                .input_device
                .clone()
                .unwrap_or_else(|| "Microphone par défaut".to_string())
        } else {
            self.device_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_fixed_blocks() {
        let mut assembler = FrameAssembler::new(4, 1, 48000);
        let mut frames = Vec::new();

        assembler.push(&[0.1f32, 0.2, 0.3], |f| frames.push(f));
        assert!(frames.is_empty());
        assert_eq!(assembler.pending(), 3);

        assembler.push(&[0.4f32, 0.5, 0.6, 0.7, 0.8, 0.9], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_assembler_sequence_increases() {
        let mut assembler = FrameAssembler::new(2, 1, 24000);
        let mut sequences = Vec::new();

        assembler.push(&[0.0f32; 10], |f| sequences.push(f.sequence_number));

        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_assembler_mixes_down_stereo() {
        let mut assembler = FrameAssembler::new(2, 2, 48000);
        let mut frames = Vec::new();

        assembler.push(&[0.2f32, 0.4, -0.5, 0.5], |f| frames.push(f));

        assert_eq!(frames.len(), 1);
        assert!((frames[0].samples[0] - 0.3).abs() < 1e-6);
        assert!(frames[0].samples[1].abs() < 1e-6);
        assert_eq!(frames[0].sample_rate, 48000);
    }

    #[test]
    fn test_assembler_converts_i16() {
        let mut assembler = FrameAssembler::new(1, 1, 16000);
        let mut frames = Vec::new();

        assembler.push(&[i16::MIN], |f| frames.push(f));

        assert_eq!(frames[0].samples, vec![-1.0]);
    }

    #[test]
    fn test_capture_creation() {
        let capture = CpalCapture::new(AudioConfig::default()).unwrap();
        assert!(!capture.is_recording());
        assert_eq!(capture.device_info(), "Microphone par défaut");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut capture = CpalCapture::new(AudioConfig::default()).unwrap();
        assert!(capture.stop().await.is_ok());
        assert!(capture.stop().await.is_ok());
    }

    // Nécessite un vrai microphone
    #[tokio::test]
    #[ignore]
    async fn test_capture_real_device() {
        use std::sync::{Arc, Mutex};
        use tokio::time::{sleep, Duration};

        let config = AudioConfig::default();
        let mut capture = CpalCapture::new(config).unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let frames_clone = Arc::clone(&frames);

        capture
            .start(CaptureSink::new(
                move |frame: RecordingFrame| frames_clone.lock().unwrap().push(frame),
                |e| panic!("Erreur de capture: {}", e),
            ))
            .await
            .unwrap();
        sleep(Duration::from_millis(500)).await;
        capture.stop().await.unwrap();

        let frames = frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert!(!capture.is_recording());
    }
}
