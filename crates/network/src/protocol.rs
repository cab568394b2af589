//! Format des messages échangés avec le backend vocal
//!
//! Sortant : JSON avec un champ `type`, enrichi de `flow_id` et `session_id`.
//! Entrant : JSON classé par `type` en audio / statut / fin de tour / erreur,
//! ou trame binaire contenant directement du PCM16.
//!
//! ```text
//! {"type":"input_audio_buffer.append","audio":"<base64 pcm16>","buffer_id":12,
//!  "flow_id":"...","session_id":"..."}
//! ```

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use audio::{AudioCodec, EncodedFrame};

use crate::{InboundEvent, NetworkError, NetworkResult, ServerError, StatusUpdate};

/// Trame brute au niveau du transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages envoyés par le client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Un bloc capturé, PCM16 encodé en base64
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String, buffer_id: u64 },

    /// Demande au backend d'arrêter la réponse en cours (barge-in)
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Choix du fournisseur de voix en début de session
    ///
    /// `voice_id` est toujours présent (`null` hors ElevenLabs) : le backend
    /// le lit sans valeur par défaut.
    #[serde(rename = "elevenlabs.config")]
    VoiceConfig {
        enabled: bool,
        #[serde(default)]
        voice_id: Option<String>,
    },

    /// Mise à jour partielle de la session du modèle, relayée telle quelle
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPatch },

    /// Fin propre de la session avant fermeture
    #[serde(rename = "end_stream")]
    EndStream,
}

impl ClientMessage {
    pub fn audio_append(frame: &EncodedFrame) -> Self {
        ClientMessage::AudioAppend {
            audio: BASE64.encode(&frame.data),
            buffer_id: frame.sequence_number,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::AudioAppend { .. } => "input_audio_buffer.append",
            ClientMessage::ResponseCancel => "response.cancel",
            ClientMessage::VoiceConfig { .. } => "elevenlabs.config",
            ClientMessage::SessionUpdate { .. } => "session.update",
            ClientMessage::EndStream => "end_stream",
        }
    }

    /// Indique la langue parlée au transcripteur (code ISO 639-1, ex: `fr`)
    pub fn transcription_language(language: impl Into<String>) -> Self {
        ClientMessage::SessionUpdate {
            session: SessionPatch {
                input_audio_transcription: Some(TranscriptionSettings {
                    model: TRANSCRIPTION_MODEL.to_string(),
                    language: Some(language.into()),
                }),
            },
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, ClientMessage::AudioAppend { .. })
    }
}

/// Modèle de transcription utilisé par le backend
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Champs de session modifiés par un `session.update`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_audio_transcription: Option<TranscriptionSettings>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
}

/// Identité ajoutée à chaque message sortant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub flow_id: String,
    pub session_id: String,
}

impl Envelope {
    pub fn new(flow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Sérialise un message avec l'identité de la session
    pub fn wrap(&self, message: &ClientMessage) -> NetworkResult<WireMessage> {
        let mut value = serde_json::to_value(message)?;
        let Some(object) = value.as_object_mut() else {
            return Err(NetworkError::MalformedMessage(format!(
                "{} ne se sérialise pas en objet",
                message.kind()
            )));
        };
        object.insert("flow_id".to_string(), Value::String(self.flow_id.clone()));
        object.insert("session_id".to_string(), Value::String(self.session_id.clone()));

        Ok(WireMessage::Text(serde_json::to_string(&value)?))
    }
}

/// Types de messages traités comme statut
const STATUS_KINDS: &[&str] = &[
    "status",
    "session.created",
    "session.updated",
    "response.created",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.committed",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "conversation.item.input_audio_transcription.completed",
    "flow.build.progress",
];

/// Classe les messages entrants et décode l'audio
///
/// Numérote les chunks audio dans leur ordre d'arrivée.
pub struct InboundDecoder {
    codec: Arc<dyn AudioCodec>,
    next_sequence: u64,
}

impl InboundDecoder {
    pub fn new(codec: Arc<dyn AudioCodec>) -> Self {
        Self { codec, next_sequence: 0 }
    }

    /// Classe une trame entrante
    ///
    /// `Ok(None)` pour un type inconnu (ignoré). Une trame illisible est une
    /// erreur `MalformedMessage`.
    pub fn decode(&mut self, message: WireMessage) -> NetworkResult<Option<InboundEvent>> {
        match message {
            WireMessage::Binary(data) => self.decode_audio_bytes(&data).map(Some),
            WireMessage::Text(text) => {
                let value: Value = serde_json::from_str(&text)
                    .map_err(|e| NetworkError::MalformedMessage(format!("JSON invalide: {}", e)))?;
                self.classify(value)
            }
        }
    }

    fn classify(&mut self, value: Value) -> NetworkResult<Option<InboundEvent>> {
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            // Certaines erreurs du backend arrivent sans type : {"error": "..."}
            if let Some(error) = value.get("error") {
                return Ok(Some(InboundEvent::Error(parse_error(&value, error))));
            }
            return Err(NetworkError::MalformedMessage("champ `type` absent".to_string()));
        };

        let event = match kind {
            "audio" | "response.audio.delta" => {
                let encoded = value
                    .get("delta")
                    .or_else(|| value.get("audio"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| NetworkError::MalformedMessage(format!("{} sans données audio", kind)))?;
                let data = BASE64
                    .decode(encoded)
                    .map_err(|e| NetworkError::MalformedMessage(format!("base64 invalide: {}", e)))?;
                self.decode_audio_bytes(&data)?
            }
            "turn_complete" | "response.done" => InboundEvent::TurnComplete,
            "error" => {
                let nested = value.get("error").cloned().unwrap_or(Value::Null);
                InboundEvent::Error(parse_error(&value, &nested))
            }
            kind if STATUS_KINDS.contains(&kind) => InboundEvent::Status(parse_status(kind, &value)),
            other => {
                trace!(kind = other, "Message ignoré");
                return Ok(None);
            }
        };

        Ok(Some(event))
    }

    fn decode_audio_bytes(&mut self, data: &[u8]) -> NetworkResult<InboundEvent> {
        let chunk = self
            .codec
            .decode(data, self.next_sequence)
            .map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
        self.next_sequence += 1;
        Ok(InboundEvent::Audio(chunk))
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Les champs peuvent être à plat ou dans un objet `error` imbriqué
fn parse_error(value: &Value, nested: &Value) -> ServerError {
    let message = string_field(value, "message")
        .or_else(|| string_field(nested, "message"))
        .or_else(|| nested.as_str().map(str::to_string))
        .unwrap_or_else(|| "erreur serveur".to_string());

    ServerError {
        code: string_field(value, "code").or_else(|| string_field(nested, "code")),
        key_name: string_field(value, "key_name").or_else(|| string_field(nested, "key_name")),
        message,
    }
}

fn parse_status(kind: &str, value: &Value) -> StatusUpdate {
    let message = string_field(value, "message")
        .or_else(|| string_field(value, "status"))
        .or_else(|| string_field(value, "delta"))
        .or_else(|| string_field(value, "transcript"));

    let payload = if kind == "flow.build.progress" {
        value.get("data").cloned().unwrap_or(Value::Null)
    } else {
        value.clone()
    };

    StatusUpdate {
        kind: kind.to_string(),
        message,
        payload,
    }
}
