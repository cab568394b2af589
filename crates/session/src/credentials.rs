//! Clés fournisseur nécessaires au mode vocal
//!
//! La session ne lit jamais les clés elle-même : elle demande seulement si
//! elles sont présentes, et les enregistre quand l'utilisateur en saisit une.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{VoicePreferences, VoiceProvider};

/// Valeur factice que certains déploiements mettent à la place d'une vraie clé
const PLACEHOLDER_VALUE: &str = "dummy";

/// Clés connues
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKey {
    #[serde(rename = "OPENAI_API_KEY")]
    OpenAi,
    #[serde(rename = "ELEVENLABS_API_KEY")]
    ElevenLabs,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 2] = [CredentialKey::OpenAi, CredentialKey::ElevenLabs];

    /// Nom de la variable, tel que le backend l'emploie
    pub fn name(&self) -> &'static str {
        match self {
            CredentialKey::OpenAi => "OPENAI_API_KEY",
            CredentialKey::ElevenLabs => "ELEVENLABS_API_KEY",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CredentialKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CredentialKey::ALL
            .into_iter()
            .find(|key| key.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Clé inconnue: {}", s))
    }
}

/// Échec d'enregistrement ou de révocation d'une clé
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("Valeur vide pour {0}")]
    EmptyValue(CredentialKey),

    #[error("Magasin en lecture seule: {0}")]
    ReadOnly(String),

    #[error("Enregistrement impossible: {0}")]
    Backend(String),
}

/// Accès aux clés fournisseur
///
/// Implémentations :
/// - MemoryCredentialStore : clés saisies pendant l'exécution
/// - EnvCredentialStore : variables d'environnement, lecture seule
/// - LayeredCredentials : mémoire puis environnement
pub trait CredentialResolver: Send + Sync {
    fn get_credential(&self, key: CredentialKey) -> Option<String>;

    fn save_credential(&self, key: CredentialKey, value: &str) -> Result<(), SaveError>;

    /// Révoque une clé. `Ok(false)` si elle n'était pas enregistrée ici.
    fn remove_credential(&self, key: CredentialKey) -> Result<bool, SaveError>;

    fn has_credential(&self, key: CredentialKey) -> bool {
        self.get_credential(key).is_some()
    }
}

/// Clés requises pour ces préférences, dans l'ordre où elles sont vérifiées
pub fn required_credentials(preferences: &VoicePreferences) -> Vec<CredentialKey> {
    let mut keys = vec![CredentialKey::OpenAi];
    if preferences.voice.provider == VoiceProvider::ElevenLabs {
        keys.push(CredentialKey::ElevenLabs);
    }
    keys
}

/// Première clé requise absente
pub fn first_missing(resolver: &dyn CredentialResolver, preferences: &VoicePreferences) -> Option<CredentialKey> {
    required_credentials(preferences)
        .into_iter()
        .find(|key| !resolver.has_credential(*key))
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: CredentialKey, value: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.write() {
            values.insert(key, value.into());
        }
        store
    }

    /// Retire une clé (révocation)
    pub fn remove(&self, key: CredentialKey) -> bool {
        match self.values.write() {
            Ok(mut values) => values.remove(&key).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&key).is_some(),
        }
    }
}

impl CredentialResolver for MemoryCredentialStore {
    fn get_credential(&self, key: CredentialKey) -> Option<String> {
        let values = match self.values.read() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.get(&key).cloned()
    }

    fn save_credential(&self, key: CredentialKey, value: &str) -> Result<(), SaveError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SaveError::EmptyValue(key));
        }

        let mut values = self
            .values
            .write()
            .map_err(|_| SaveError::Backend("verrou empoisonné".to_string()))?;
        values.insert(key, value.to_string());
        info!(key = %key, "Clé enregistrée");
        Ok(())
    }

    fn remove_credential(&self, key: CredentialKey) -> Result<bool, SaveError> {
        let removed = self.remove(key);
        if removed {
            info!(key = %key, "Clé révoquée");
        }
        Ok(removed)
    }
}

/// Lecture des clés dans l'environnement du processus
#[derive(Clone, Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialResolver for EnvCredentialStore {
    fn get_credential(&self, key: CredentialKey) -> Option<String> {
        let value = std::env::var(key.name()).ok()?;
        let value = value.trim();
        if value.is_empty() || value == PLACEHOLDER_VALUE {
            debug!(key = %key, "Variable absente ou factice");
            return None;
        }
        Some(value.to_string())
    }

    fn save_credential(&self, key: CredentialKey, _value: &str) -> Result<(), SaveError> {
        Err(SaveError::ReadOnly(format!("{} est lue depuis l'environnement", key)))
    }

    fn remove_credential(&self, key: CredentialKey) -> Result<bool, SaveError> {
        Err(SaveError::ReadOnly(format!("{} est lue depuis l'environnement", key)))
    }
}

/// Clés saisies en priorité, environnement ensuite
pub struct LayeredCredentials {
    overlay: Arc<MemoryCredentialStore>,
    fallback: Arc<dyn CredentialResolver>,
}

impl LayeredCredentials {
    pub fn new(overlay: Arc<MemoryCredentialStore>, fallback: Arc<dyn CredentialResolver>) -> Self {
        Self { overlay, fallback }
    }

    /// Mémoire par-dessus l'environnement
    pub fn from_env() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()), Arc::new(EnvCredentialStore))
    }

    pub fn overlay(&self) -> &Arc<MemoryCredentialStore> {
        &self.overlay
    }
}

impl CredentialResolver for LayeredCredentials {
    fn get_credential(&self, key: CredentialKey) -> Option<String> {
        self.overlay
            .get_credential(key)
            .or_else(|| self.fallback.get_credential(key))
    }

    fn save_credential(&self, key: CredentialKey, value: &str) -> Result<(), SaveError> {
        self.overlay.save_credential(key, value)
    }

    /// Seule la clé saisie est retirée : une variable d'environnement reste visible
    fn remove_credential(&self, key: CredentialKey) -> Result<bool, SaveError> {
        self.overlay.remove_credential(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoiceSelection;

    #[test]
    fn test_key_names_round_trip() {
        for key in CredentialKey::ALL {
            assert_eq!(key.name().parse::<CredentialKey>().unwrap(), key);
        }
        assert_eq!("openai_api_key".parse::<CredentialKey>().unwrap(), CredentialKey::OpenAi);
        assert!("AWS_KEY".parse::<CredentialKey>().is_err());
    }

    #[test]
    fn test_memory_store_rejects_empty() {
        let store = MemoryCredentialStore::new();
        assert_eq!(
            store.save_credential(CredentialKey::OpenAi, "  "),
            Err(SaveError::EmptyValue(CredentialKey::OpenAi))
        );
        assert!(!store.has_credential(CredentialKey::OpenAi));

        store.save_credential(CredentialKey::OpenAi, " sk-test ").unwrap();
        assert_eq!(store.get_credential(CredentialKey::OpenAi).as_deref(), Some("sk-test"));

        assert_eq!(store.remove_credential(CredentialKey::OpenAi), Ok(true));
        assert!(!store.has_credential(CredentialKey::OpenAi));
        assert!(!store.remove(CredentialKey::OpenAi));
    }

    #[test]
    fn test_env_store_is_read_only() {
        let store = EnvCredentialStore;
        assert!(matches!(
            store.save_credential(CredentialKey::ElevenLabs, "x"),
            Err(SaveError::ReadOnly(_))
        ));
        assert!(matches!(
            store.remove_credential(CredentialKey::ElevenLabs),
            Err(SaveError::ReadOnly(_))
        ));
    }

    struct Fixed(Option<&'static str>);

    impl CredentialResolver for Fixed {
        fn get_credential(&self, _key: CredentialKey) -> Option<String> {
            self.0.map(str::to_string)
        }

        fn save_credential(&self, _key: CredentialKey, _value: &str) -> Result<(), SaveError> {
            Err(SaveError::ReadOnly("fixe".to_string()))
        }

        fn remove_credential(&self, _key: CredentialKey) -> Result<bool, SaveError> {
            Err(SaveError::ReadOnly("fixe".to_string()))
        }
    }

    #[test]
    fn test_layered_prefers_overlay() {
        let layered = LayeredCredentials::new(Arc::new(MemoryCredentialStore::new()), Arc::new(Fixed(Some("env"))));
        assert_eq!(layered.get_credential(CredentialKey::OpenAi).as_deref(), Some("env"));

        layered.save_credential(CredentialKey::OpenAi, "saisie").unwrap();
        assert_eq!(layered.get_credential(CredentialKey::OpenAi).as_deref(), Some("saisie"));

        // La révocation retire la saisie, l'environnement reste visible
        assert_eq!(layered.remove_credential(CredentialKey::OpenAi), Ok(true));
        assert_eq!(layered.get_credential(CredentialKey::OpenAi).as_deref(), Some("env"));
        assert_eq!(layered.remove_credential(CredentialKey::OpenAi), Ok(false));
    }

    #[test]
    fn test_required_credentials_follow_provider() {
        let mut preferences = VoicePreferences::default();
        assert_eq!(required_credentials(&preferences), vec![CredentialKey::OpenAi]);

        preferences.voice = VoiceSelection::eleven_labs("voice-1");
        assert_eq!(
            required_credentials(&preferences),
            vec![CredentialKey::OpenAi, CredentialKey::ElevenLabs]
        );

        let resolver = Fixed(None);
        assert_eq!(first_missing(&resolver, &preferences), Some(CredentialKey::OpenAi));
    }
}
