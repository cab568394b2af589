// Client vocal en ligne de commande
//
// Ouvre une session vocale avec un flow : le micro part vers le backend,
// la réponse synthétisée est jouée sur la sortie par défaut. On peut couper
// la parole à l'assistant simplement en parlant.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use audio::{list_input_devices, AudioConfig, CpalCapture, CpalPlayback};
use clap::Parser;
use network::WebSocketConnector;
use session::{
    CredentialKey, LayeredCredentials, LoggingNotifier, SessionConfig, SessionError, SessionObserver, SessionRunner,
    SessionSnapshot, UserCommand, VoicePreferences, VoiceSelection,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Conversation vocale en temps réel avec un flow")]
struct Cli {
    /// URL du backend (ws://, wss://, http:// ou https://)
    #[arg(short, long, default_value = "ws://localhost:7860")]
    server: String,

    /// Flow à interroger
    #[arg(short, long)]
    flow_id: Option<String>,

    /// Identifiant de session (généré sinon)
    #[arg(long)]
    session_id: Option<String>,

    /// Jeton d'accès envoyé en cookie
    #[arg(long, env = "VOICE_SESSION_TOKEN")]
    token: Option<String>,

    /// Voix : `openai[:voix]` ou `elevenlabs[:voice_id]`
    #[arg(long)]
    voice: Option<VoiceSelection>,

    /// Langue de transcription (ex: fr-FR)
    #[arg(long)]
    language: Option<String>,

    /// Nom du microphone
    #[arg(long)]
    mic: Option<String>,

    /// Fichier de préférences
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Liste les microphones et quitte
    #[arg(long)]
    list_devices: bool,

    /// Démarre micro coupé
    #[arg(long)]
    muted: bool,

    /// Ajoute l'identifiant de session au chemin du socket
    #[arg(long)]
    session_path: bool,
}

/// Affiche la session dans le terminal
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_state(&self, snapshot: &SessionSnapshot) {
        let icon = if snapshot.session.is_recording { "🎤" } else { "⏸️ " };
        println!("{} {:?} - {}", icon, snapshot.state, snapshot.session.status);
    }

    fn on_status(&self, status: &str) {
        debug!(status, "Statut");
    }

    fn on_error(&self, error: &SessionError) {
        println!("❌ {}", error);
        if let SessionError::CredentialMissing(key) = error {
            println!("   Saisissez la clé : k {} <valeur>", key);
        }
    }

    fn on_history_refresh(&self, session_id: &str) {
        info!(session_id, "Tour terminé");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.list_devices {
        println!("🎤 Microphones disponibles :");
        for name in list_input_devices()? {
            println!("   • {}", name);
        }
        return Ok(());
    }

    let flow_id = cli.flow_id.clone().context("--flow-id est requis")?;

    let prefs_path = cli
        .prefs
        .clone()
        .or_else(VoicePreferences::default_path)
        .context("dossier de configuration introuvable, utilisez --prefs")?;
    let mut preferences = VoicePreferences::load(&prefs_path)?;
    if apply_overrides(&mut preferences, &cli) {
        preferences.save(&prefs_path)?;
    }

    let mut config = SessionConfig::new(&cli.server, flow_id);
    if let Some(session_id) = &cli.session_id {
        config = config.with_session_id(session_id);
    }
    if let Some(token) = &cli.token {
        config = config.with_access_token(token);
    }
    config.audio = AudioConfig {
        input_device: preferences.microphone.clone(),
        ..AudioConfig::default()
    };
    config.start_muted = cli.muted;
    config.session_in_path = cli.session_path;

    println!("🚀 Session vocale");
    println!("   Flow : {}", config.flow_id);
    println!("   Session : {}", config.session_id);
    println!("   Voix : {} ({})", preferences.voice, preferences.language);
    println!("\n📋 Commandes : m = couper/rétablir le micro, v = relancer le mode vocal, k <CLÉ> <valeur> = saisir une clé, r <CLÉ> = révoquer une clé, q = quitter");

    let runner = SessionRunner::new(
        config.clone(),
        preferences,
        Box::new(CpalCapture::new(config.audio.clone())?),
        Box::new(CpalPlayback::new(config.audio.clone())?),
        Arc::new(WebSocketConnector::new(config.network.clone())?),
        Arc::new(LayeredCredentials::from_env()),
        Arc::new(ConsoleObserver),
    )?
    .with_notifier(Arc::new(LoggingNotifier));

    let (commands, rx) = mpsc::channel(16);
    commands.send(UserCommand::EnableVoice).await?;
    let stdin_commands = commands.clone();
    let muted = cli.muted;
    std::thread::spawn(move || read_commands(stdin_commands, muted));
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Arrêt demandé");
            let _ = commands.send(UserCommand::Close).await;
        }
    });

    let snapshot = runner.run(rx).await?;
    println!("👋 Session terminée ({:?})", snapshot.state);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Reporte les options de la ligne de commande dans les préférences
///
/// Retourne `true` si quelque chose a changé.
fn apply_overrides(preferences: &mut VoicePreferences, cli: &Cli) -> bool {
    let before = preferences.clone();
    if let Some(voice) = &cli.voice {
        preferences.voice = voice.clone();
    }
    if let Some(language) = &cli.language {
        preferences.language = language.clone();
    }
    if let Some(mic) = &cli.mic {
        preferences.microphone = Some(mic.clone());
    }
    *preferences != before
}

/// Lit les commandes au clavier (thread dédié, la lecture est bloquante)
fn read_commands(commands: mpsc::Sender<UserCommand>, mut muted: bool) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let command = match parse_command(&line, &mut muted) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("❌ {}", message);
                continue;
            }
        };

        let closing = command == UserCommand::Close;
        if commands.blocking_send(command).is_err() || closing {
            break;
        }
    }
}

/// Traduit une ligne saisie en commande
fn parse_command(line: &str, muted: &mut bool) -> Result<Option<UserCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };

    match verb {
        "m" => {
            *muted = !*muted;
            Ok(Some(UserCommand::SetMuted(*muted)))
        }
        "k" => {
            let key: CredentialKey = parts.next().ok_or("usage : k <CLÉ> <valeur>")?.parse()?;
            let value = parts.next().ok_or("usage : k <CLÉ> <valeur>")?;
            Ok(Some(UserCommand::SaveCredential {
                key,
                value: value.to_string(),
            }))
        }
        "r" => {
            let key: CredentialKey = parts.next().ok_or("usage : r <CLÉ>")?.parse()?;
            Ok(Some(UserCommand::RemoveCredential(key)))
        }
        "v" => Ok(Some(UserCommand::EnableVoice)),
        "q" | "Q" => Ok(Some(UserCommand::Close)),
        other => Err(format!("Commande inconnue : {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_toggles() {
        let mut muted = false;
        assert_eq!(parse_command("m", &mut muted), Ok(Some(UserCommand::SetMuted(true))));
        assert_eq!(parse_command(" m ", &mut muted), Ok(Some(UserCommand::SetMuted(false))));
    }

    #[test]
    fn test_save_credential_command() {
        let mut muted = false;
        assert_eq!(
            parse_command("k OPENAI_API_KEY sk-123", &mut muted),
            Ok(Some(UserCommand::SaveCredential {
                key: CredentialKey::OpenAi,
                value: "sk-123".to_string(),
            }))
        );
        assert!(parse_command("k OPENAI_API_KEY", &mut muted).is_err());
        assert!(parse_command("k NOPE x", &mut muted).is_err());
    }

    #[test]
    fn test_remove_credential_command() {
        let mut muted = false;
        assert_eq!(
            parse_command("r ELEVENLABS_API_KEY", &mut muted),
            Ok(Some(UserCommand::RemoveCredential(CredentialKey::ElevenLabs)))
        );
        assert!(parse_command("r", &mut muted).is_err());
    }

    #[test]
    fn test_other_commands() {
        let mut muted = false;
        assert_eq!(parse_command("", &mut muted), Ok(None));
        assert_eq!(parse_command("q", &mut muted), Ok(Some(UserCommand::Close)));
        assert!(parse_command("dance", &mut muted).is_err());
    }

    #[test]
    fn test_overrides_detect_changes() {
        let cli = Cli::parse_from(["voice-session", "--flow-id", "f", "--voice", "elevenlabs:abc"]);
        let mut preferences = VoicePreferences::default();

        assert!(apply_overrides(&mut preferences, &cli));
        assert_eq!(preferences.voice, VoiceSelection::eleven_labs("abc"));
        assert!(!apply_overrides(&mut preferences, &cli));
    }
}
