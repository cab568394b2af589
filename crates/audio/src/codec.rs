//! Conversion PCM16 entre le périphérique et le socket
//!
//! Le backend échange du PCM16 little-endian mono à fréquence fixe (24 kHz
//! par défaut). Les périphériques tournent à leur fréquence native (souvent
//! 44.1 ou 48 kHz) : ce module rééchantillonne et convertit dans les deux sens.
//!
//! Le rééchantillonnage est linéaire. Pour de la voix à 24 kHz c'est
//! inaudible et ça tient dans le budget d'un callback temps réel.

use crate::{AudioChunk, AudioCodec, AudioConfig, AudioError, AudioResult, EncodedFrame, RecordingFrame, Sample};

/// Codec PCM16 little-endian à fréquence fixe
#[derive(Clone, Debug)]
pub struct Pcm16Codec {
    /// Fréquence des données sur le socket (Hz)
    wire_sample_rate: u32,
}

impl Pcm16Codec {
    /// Crée un codec à partir de la configuration audio
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la configuration est invalide
    pub fn new(config: &AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;
        Ok(Self {
            wire_sample_rate: config.wire_sample_rate,
        })
    }

    pub fn wire_sample_rate(&self) -> u32 {
        self.wire_sample_rate
    }
}

impl AudioCodec for Pcm16Codec {
    fn encode(&self, frame: &RecordingFrame) -> AudioResult<EncodedFrame> {
        if frame.sample_rate == 0 {
            return Err(AudioError::CodecError("fréquence de capture nulle".to_string()));
        }

        let resampled = resample(&frame.samples, frame.sample_rate, self.wire_sample_rate);
        let mut data = Vec::with_capacity(resampled.len() * 2);
        for sample in resampled {
            data.extend_from_slice(&to_i16(sample).to_le_bytes());
        }

        Ok(EncodedFrame::new(data, self.wire_sample_rate, frame.sequence_number))
    }

    fn decode(&self, data: &[u8], sequence_number: u64) -> AudioResult<AudioChunk> {
        if data.len() % 2 != 0 {
            return Err(AudioError::CodecError(format!(
                "PCM16 tronqué: {} bytes (nombre impair)",
                data.len()
            )));
        }

        let samples = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as Sample / 32768.0)
            .collect();

        Ok(AudioChunk::new(samples, self.wire_sample_rate, sequence_number))
    }

    fn codec_info(&self) -> String {
        format!("PCM16 LE mono {} Hz", self.wire_sample_rate)
    }
}

/// Convertit un échantillon flottant en i16 avec écrêtage
fn to_i16(sample: Sample) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Rééchantillonnage linéaire de `from` Hz vers `to` Hz
///
/// La longueur de sortie est `round(len * to / from)`.
pub fn resample(samples: &[Sample], from: u32, to: u32) -> Vec<Sample> {
    if from == to || samples.is_empty() || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64 * to as u64 + from as u64 / 2) / from as u64) as usize;
    let step = from as f64 / to as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * step;
            let index = (position as usize).min(last);
            let next = (index + 1).min(last);
            let fraction = (position - index as f64) as f32;
            samples[index] + (samples[next] - samples[index]) * fraction
        })
        .collect()
}
