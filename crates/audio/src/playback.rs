//! Lecture audio avec cpal
//!
//! Le thread async ajoute des chunks via `enqueue()`. Le callback cpal (thread
//! temps réel) vide la `PlaybackQueue` partagée vers le périphérique. Quand la
//! file passe à vide, un `PlaybackSignal::Drained` est émis vers la session ;
//! une panne du périphérique part en `PlaybackSignal::Failed`.
//!
//! Les chunks arrivent à la fréquence du socket : ils sont rééchantillonnés à
//! la fréquence du périphérique au moment de l'ajout, pas dans le callback.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::capture::device_name;
use crate::codec::resample;
use crate::{
    AudioChunk, AudioConfig, AudioError, AudioPlayback, AudioResult, PlaybackQueue, PlaybackSignal,
    PlaybackStats, Sample,
};

type SharedQueue = Arc<Mutex<PlaybackQueue>>;

/// Verrouille la file même si un thread a paniqué en la tenant
fn lock(queue: &SharedQueue) -> MutexGuard<'_, PlaybackQueue> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lecture audio via cpal
pub struct CpalPlayback {
    config: AudioConfig,
    stream: Option<Stream>,
    queue: SharedQueue,
    device_rate: u32,
    device_name: String,
    signal_tx: mpsc::UnboundedSender<PlaybackSignal>,
    signal_rx: Option<mpsc::UnboundedReceiver<PlaybackSignal>>,
}

impl CpalPlayback {
    /// Prépare la lecture sans ouvrir le périphérique
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        Ok(Self {
            device_rate: config.wire_sample_rate,
            config,
            stream: None,
            queue: Arc::new(Mutex::new(PlaybackQueue::new())),
            device_name: String::new(),
            signal_tx,
            signal_rx: Some(signal_rx),
        })
    }

    fn build_stream(&mut self) -> AudioResult<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("aucune sortie audio par défaut".to_string()))?;
        self.device_name = device_name(&device);

        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();
        self.device_rate = stream_config.sample_rate;

        info!(
            device = %self.device_name,
            sample_rate = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            "Ouverture de la sortie audio"
        );

        let queue = Arc::clone(&self.queue);
        let signals = self.signal_tx.clone();

        match sample_format {
            SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, queue, signals),
            SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, queue, signals),
            SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, queue, signals),
            other => Err(AudioError::ConfigError(format!("Format d'échantillon non supporté : {:?}", other))),
        }
    }
}

fn build_typed<T>(
    device: &Device,
    stream_config: &StreamConfig,
    queue: SharedQueue,
    signals: mpsc::UnboundedSender<PlaybackSignal>,
) -> AudioResult<Stream>
where
    T: SizedSample + FromSample<Sample>,
{
    let channels = (stream_config.channels as usize).max(1);
    let mut scratch: Vec<Sample> = Vec::new();
    let failures = signals.clone();
    let mut failed = false;

    let stream = device.build_output_stream(
        stream_config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len() / channels, 0.0);

            // Jamais bloquer le thread audio : en cas de contention, silence
            let drained = match queue.try_lock() {
                Ok(mut guard) => {
                    guard.fill(&mut scratch);
                    guard.take_drained()
                }
                Err(_) => {
                    scratch.fill(0.0);
                    false
                }
            };

            for (frame, &sample) in data.chunks_mut(channels).zip(scratch.iter()) {
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }

            if drained {
                let _ = signals.send(PlaybackSignal::Drained);
            }
        },
        move |err: cpal::StreamError| {
            error!("Erreur stream de lecture : {}", err);
            if failed {
                return;
            }
            failed = true;
            let _ = failures.send(PlaybackSignal::Failed(AudioError::from(err)));
        },
        None,
    )?;

    Ok(stream)
}

#[async_trait]
impl AudioPlayback for CpalPlayback {
    async fn start(&mut self) -> AudioResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play()?;
        self.stream = Some(stream);

        info!(device = %self.device_name, "Lecture audio démarrée");
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        if let Err(e) = stream.pause() {
            debug!("Pause du stream de lecture impossible : {}", e);
        }
        drop(stream);
        let discarded = lock(&self.queue).detach();
        drop(discarded);

        info!(device = %self.device_name, "Lecture audio arrêtée");
        Ok(())
    }

    async fn enqueue(&mut self, chunk: AudioChunk) -> AudioResult<()> {
        if self.stream.is_none() {
            return Err(AudioError::InvalidState("lecture non démarrée".to_string()));
        }

        let samples = resample(&chunk.samples, chunk.sample_rate, self.device_rate);
        let mut chunk = AudioChunk::new(samples, self.device_rate, chunk.sequence_number);
        chunk.apply_gain(self.config.output_gain);

        let started = lock(&self.queue).enqueue(chunk);
        if started {
            debug!("Début de lecture");
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> usize {
        // Libérés hors verrou : le callback audio ne doit pas attendre
        let discarded = lock(&self.queue).detach();
        let count = discarded.len();
        drop(discarded);

        debug!(discarded = count, "Lecture interrompue");
        count
    }

    fn is_playing(&self) -> bool {
        lock(&self.queue).is_playing()
    }

    fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    fn stats(&self) -> PlaybackStats {
        lock(&self.queue).stats()
    }

    fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<PlaybackSignal>> {
        self.signal_rx.take()
    }

    fn device_info(&self) -> String {
        if self.device_name.is_empty() {
            "Sortie par défaut".to_string()
        } else {
            self.device_name.clone()
        }
    }
}
