//! Traits abstraits pour le socket de session
//!
//! La session ne parle qu'à ces deux traits. En production ils sont
//! implémentés par tokio-tungstenite, en test par un transport en mémoire.

use async_trait::async_trait;

use crate::{NetworkResult, SessionTarget, WireMessage};

/// Transport bidirectionnel de trames
///
/// Implémentations :
/// - WebSocketTransport : WebSocket réel avec tokio-tungstenite
/// - SimulatedTransport : paire en mémoire pour les tests
#[async_trait]
pub trait SessionTransport: Send {
    /// Envoie une trame
    ///
    /// # Erreurs
    /// - `NetworkError::Closed` : le transport est fermé
    async fn send(&mut self, message: WireMessage) -> NetworkResult<()>;

    /// Attend la prochaine trame
    ///
    /// `None` signifie que le pair a fermé proprement. Les trames de
    /// contrôle du protocole (ping/pong) ne remontent pas.
    async fn receive(&mut self) -> Option<NetworkResult<WireMessage>>;

    /// Ferme le transport (idempotent)
    async fn close(&mut self) -> NetworkResult<()>;

    fn is_open(&self) -> bool;
}

/// Fabrique de transports
///
/// Partagée entre sessions via `Arc<dyn SocketConnector>`.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Ouvre un transport vers la cible
    ///
    /// # Erreurs
    /// - `NetworkError::InvalidUrl` / `ConfigError` : cible invalide
    /// - `NetworkError::ConnectFailed` : handshake refusé
    /// - `NetworkError::ConnectTimeout` : pas de réponse dans le délai
    async fn connect(&self, target: &SessionTarget) -> NetworkResult<Box<dyn SessionTransport>>;
}
