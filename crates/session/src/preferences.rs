//! Préférences vocales de l'utilisateur, persistées en JSON

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{SessionError, SessionResult};

/// Voix par défaut du fournisseur OpenAI
pub const DEFAULT_OPENAI_VOICE: &str = "echo";

/// Voix par défaut du fournisseur ElevenLabs
pub const DEFAULT_ELEVENLABS_VOICE: &str = "JBFqnCBsd6RMkjVDRZzb";

const PREFERENCES_FILE: &str = "voice-session/preferences.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

/// Fournisseur et voix utilisés pour la synthèse
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSelection {
    pub provider: VoiceProvider,
    pub voice_id: String,
}

impl VoiceSelection {
    pub fn openai() -> Self {
        Self {
            provider: VoiceProvider::OpenAi,
            voice_id: DEFAULT_OPENAI_VOICE.to_string(),
        }
    }

    pub fn eleven_labs(voice_id: impl Into<String>) -> Self {
        Self {
            provider: VoiceProvider::ElevenLabs,
            voice_id: voice_id.into(),
        }
    }

    pub fn uses_eleven_labs(&self) -> bool {
        self.provider == VoiceProvider::ElevenLabs
    }
}

impl Default for VoiceSelection {
    fn default() -> Self {
        Self::openai()
    }
}

impl fmt::Display for VoiceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            VoiceProvider::OpenAi => write!(f, "openai:{}", self.voice_id),
            VoiceProvider::ElevenLabs => write!(f, "elevenlabs:{}", self.voice_id),
        }
    }
}

/// `openai`, `openai:<voix>`, `elevenlabs` ou `elevenlabs:<voix>`
impl FromStr for VoiceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, voice_id) = match s.split_once(':') {
            Some((provider, voice_id)) => (provider, Some(voice_id.trim())),
            None => (s, None),
        };

        let voice_id = voice_id.filter(|id| !id.is_empty());
        match provider.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self {
                provider: VoiceProvider::OpenAi,
                voice_id: voice_id.unwrap_or(DEFAULT_OPENAI_VOICE).to_string(),
            }),
            "elevenlabs" => Ok(Self::eleven_labs(voice_id.unwrap_or(DEFAULT_ELEVENLABS_VOICE))),
            other => Err(format!("Fournisseur de voix inconnu: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicePreferences {
    /// Langue de la transcription (BCP 47)
    pub language: String,

    /// Microphone préféré, `None` pour celui par défaut
    pub microphone: Option<String>,

    pub voice: VoiceSelection,
}

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            microphone: None,
            voice: VoiceSelection::default(),
        }
    }
}

impl VoicePreferences {
    /// Code ISO 639-1 attendu par le transcripteur (`fr-FR` donne `fr`)
    pub fn transcription_language(&self) -> Option<String> {
        let primary = self.language.split(['-', '_']).next()?.trim();
        let valid = (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic());
        valid.then(|| primary.to_ascii_lowercase())
    }

    /// Emplacement par défaut sous le dossier de configuration de la plateforme
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(PREFERENCES_FILE))
    }

    /// Charge les préférences, ou les valeurs par défaut si le fichier n'existe pas
    pub fn load(path: &Path) -> SessionResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Pas de préférences, valeurs par défaut");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SessionError::Preferences(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| SessionError::Preferences(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> SessionResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SessionError::Preferences(format!("{}: {}", parent.display(), e)))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SessionError::Preferences(e.to_string()))?;
        fs::write(path, content).map_err(|e| SessionError::Preferences(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Préférences enregistrées");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let preferences = VoicePreferences::load(&dir.path().join("absent.json")).unwrap();

        assert_eq!(preferences, VoicePreferences::default());
        assert_eq!(preferences.language, "en-US");
        assert_eq!(preferences.voice.provider, VoiceProvider::OpenAi);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/prefs.json");
        let preferences = VoicePreferences {
            language: "fr-FR".to_string(),
            microphone: Some("USB Mic".to_string()),
            voice: VoiceSelection::eleven_labs("abc"),
        };

        preferences.save(&path).unwrap();
        assert_eq!(VoicePreferences::load(&path).unwrap(), preferences);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{"language": "de-DE"}"#).unwrap();

        let preferences = VoicePreferences::load(&path).unwrap();
        assert_eq!(preferences.language, "de-DE");
        assert_eq!(preferences.voice, VoiceSelection::openai());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{").unwrap();

        assert!(matches!(VoicePreferences::load(&path), Err(SessionError::Preferences(_))));
    }

    #[test]
    fn test_parse_voice_selection() {
        assert_eq!("openai".parse::<VoiceSelection>().unwrap(), VoiceSelection::openai());
        assert_eq!(
            "elevenlabs:xyz".parse::<VoiceSelection>().unwrap(),
            VoiceSelection::eleven_labs("xyz")
        );
        assert_eq!(
            "ElevenLabs".parse::<VoiceSelection>().unwrap().voice_id,
            DEFAULT_ELEVENLABS_VOICE
        );
        assert!("azure".parse::<VoiceSelection>().is_err());
    }

    #[test]
    fn test_transcription_language() {
        let mut preferences = VoicePreferences::default();
        assert_eq!(preferences.transcription_language().as_deref(), Some("en"));

        preferences.language = "FR_fr".to_string();
        assert_eq!(preferences.transcription_language().as_deref(), Some("fr"));

        preferences.language = String::new();
        assert_eq!(preferences.transcription_language(), None);
    }
}
