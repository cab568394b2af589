//! Transport en mémoire pour les tests
//!
//! `SimulatedConnector` remplace le backend : chaque connexion acceptée crée
//! une paire `SimulatedTransport` (côté client) / `SimulatedPeer` (côté test).
//! Le test joue le rôle du serveur à travers le `SimulatedPeer`.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::{NetworkError, NetworkResult, SessionTarget, SessionTransport, SocketConnector, WireMessage};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn reset_error(reason: &str) -> NetworkError {
    NetworkError::WebSocket(tungstenite::Error::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        reason.to_string(),
    )))
}

/// Ce que le pair fait parvenir au client
#[derive(Debug)]
enum PeerFrame {
    Message(WireMessage),
    Close,
    Fail(String),
}

/// Côté client d'une paire simulée
pub struct SimulatedTransport {
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
    is_open: bool,
}

/// Côté serveur d'une paire simulée, piloté par le test
pub struct SimulatedPeer {
    to_client: mpsc::UnboundedSender<PeerFrame>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
    target: SessionTarget,
}

/// Crée une paire connectée
pub fn simulated_pair(target: SessionTarget) -> (SimulatedTransport, SimulatedPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();

    (
        SimulatedTransport {
            outbound: Some(outbound),
            inbound,
            is_open: true,
        },
        SimulatedPeer {
            to_client,
            from_client,
            target,
        },
    )
}

#[async_trait]
impl SessionTransport for SimulatedTransport {
    async fn send(&mut self, message: WireMessage) -> NetworkResult<()> {
        let Some(outbound) = self.outbound.as_ref().filter(|_| self.is_open) else {
            return Err(NetworkError::Closed);
        };
        // Le pair peut avoir disparu : le message est perdu comme sur un vrai réseau
        let _ = outbound.send(message);
        Ok(())
    }

    async fn receive(&mut self) -> Option<NetworkResult<WireMessage>> {
        if !self.is_open {
            return None;
        }

        match self.inbound.recv().await {
            Some(PeerFrame::Message(message)) => Some(Ok(message)),
            Some(PeerFrame::Close) => {
                self.is_open = false;
                None
            }
            Some(PeerFrame::Fail(reason)) => {
                self.is_open = false;
                Some(Err(reset_error(&reason)))
            }
            None => {
                self.is_open = false;
                Some(Err(reset_error("pair disparu")))
            }
        }
    }

    async fn close(&mut self) -> NetworkResult<()> {
        self.is_open = false;
        self.outbound = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

impl SimulatedPeer {
    /// Cible demandée par le client
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(PeerFrame::Message(WireMessage::Text(text.into())));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.to_client.send(PeerFrame::Message(WireMessage::Binary(data)));
    }

    /// Envoie un `response.audio.delta` contenant ces échantillons PCM16
    pub fn send_audio(&self, samples: &[i16]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.send_json(json!({"type": "response.audio.delta", "delta": BASE64.encode(bytes)}));
    }

    pub fn send_turn_complete(&self) {
        self.send_json(json!({"type": "response.done"}));
    }

    pub fn send_status(&self, kind: &str) {
        self.send_json(json!({"type": kind}));
    }

    pub fn send_error(&self, code: Option<&str>, key_name: Option<&str>, message: &str) {
        self.send_json(json!({"type": "error", "code": code, "key_name": key_name, "message": message}));
    }

    /// Fermeture propre côté serveur
    pub fn close(&self) {
        let _ = self.to_client.send(PeerFrame::Close);
    }

    /// Coupure brutale côté serveur
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(PeerFrame::Fail(reason.to_string()));
    }

    /// Prochain message du client, `None` quand le client a fermé
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    /// Prochain message texte du client, décodé en JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.recv().await? {
                WireMessage::Text(text) => return serde_json::from_str(&text).ok(),
                WireMessage::Binary(_) => continue,
            }
        }
    }

    /// Messages JSON déjà envoyés par le client, sans attendre
    pub fn drain_json(&mut self) -> Vec<Value> {
        let mut values = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            if let WireMessage::Text(text) = message {
                if let Ok(value) = serde_json::from_str(&text) {
                    values.push(value);
                }
            }
        }
        values
    }

    /// Vrai quand le client a fermé son côté
    pub fn is_client_closed(&self) -> bool {
        self.from_client.is_closed()
    }
}

/// Comportement d'une tentative de connexion
#[derive(Clone, Debug)]
pub enum ConnectBehavior {
    Accept,
    Refuse(String),
    /// Ne répond jamais : le client doit abandonner la tentative
    Hang,
    Delay(Duration),
}

/// Connecteur scripté
///
/// Sans script, toutes les connexions sont acceptées. Les pairs créés sont
/// remis au test par le canal retourné par `new()`.
pub struct SimulatedConnector {
    script: Mutex<VecDeque<ConnectBehavior>>,
    targets: Mutex<Vec<SessionTarget>>,
    peers: mpsc::UnboundedSender<SimulatedPeer>,
}

impl SimulatedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SimulatedPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            targets: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peer_rx)
    }

    /// Ajoute un comportement pour la prochaine tentative
    pub fn push_behavior(&self, behavior: ConnectBehavior) {
        lock(&self.script).push_back(behavior);
    }

    /// Nombre de tentatives reçues
    pub fn attempts(&self) -> usize {
        lock(&self.targets).len()
    }

    pub fn targets(&self) -> Vec<SessionTarget> {
        lock(&self.targets).clone()
    }
}

#[async_trait]
impl SocketConnector for SimulatedConnector {
    async fn connect(&self, target: &SessionTarget) -> NetworkResult<Box<dyn SessionTransport>> {
        target.validate()?;
        lock(&self.targets).push(target.clone());
        let behavior = lock(&self.script).pop_front().unwrap_or(ConnectBehavior::Accept);

        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Refuse(reason) => {
                return Err(NetworkError::connect_failed(target.endpoint(), reason));
            }
            ConnectBehavior::Hang => return std::future::pending().await,
            ConnectBehavior::Delay(delay) => tokio::time::sleep(delay).await,
        }

        let (transport, peer) = simulated_pair(target.clone());
        let _ = self.peers.send(peer);
        Ok(Box::new(transport))
    }
}
