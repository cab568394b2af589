//! Crate network - Socket de session vers le backend vocal
//!
//! Ce crate fournit le canal bidirectionnel entre le client et le backend :
//! blocs audio capturés vers le serveur, audio synthétisé et messages de
//! contrôle vers le client.
//!
//! # Architecture
//!
//! - `error` : erreurs réseau
//! - `types` : cible de session, configuration, statistiques, événements
//! - `protocol` : format JSON des messages et classification des entrants
//! - `traits` : `SessionTransport` et `SocketConnector`
//! - `transport` : implémentation WebSocket (tokio-tungstenite)
//! - `simulated` : paire en mémoire pour les tests
//! - `socket` : `SessionSocket`, ce que la session manipule
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audio::{AudioConfig, Pcm16Codec};
//! use network::{NetworkConfig, SessionSocket, SessionTarget, SocketEvent, WebSocketConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = WebSocketConnector::new(NetworkConfig::default())?;
//! let target = SessionTarget::new("ws://localhost:7860", "my-flow", "my-session");
//! let codec = Arc::new(Pcm16Codec::new(&AudioConfig::default())?);
//!
//! let mut socket = SessionSocket::open(&connector, &target, codec).await?;
//! while let SocketEvent::Message(event) = socket.next_event().await {
//!     println!("{:?}", event);
//! }
//! socket.close().await?;
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod types;
mod protocol;
mod traits;
mod transport;
mod simulated;
mod socket;

// Réexports publics
pub use error::*;
pub use types::*;
pub use protocol::*;
pub use traits::*;
pub use transport::{WebSocketConnector, WebSocketTransport};
pub use simulated::{simulated_pair, ConnectBehavior, SimulatedConnector, SimulatedPeer, SimulatedTransport};
pub use socket::SessionSocket;
