//! Socket de session
//!
//! Un `SessionSocket` possède un transport pour un seul couple
//! `(flow_id, session_id)`. Il ajoute l'identité de session aux messages
//! sortants, classe les messages entrants et tient les compteurs de trafic.

use std::sync::Arc;

use audio::{AudioCodec, EncodedFrame};
use tracing::{debug, info, trace, warn};

use crate::{
    ClientMessage, Envelope, InboundDecoder, InboundEvent, NetworkResult, SessionTarget, SessionTransport,
    SocketConnector, SocketEvent, SocketStats,
};

pub struct SessionSocket {
    transport: Box<dyn SessionTransport>,
    envelope: Envelope,
    decoder: InboundDecoder,
    stats: SocketStats,
    closed: bool,
}

impl SessionSocket {
    /// Enveloppe un transport déjà connecté
    pub fn new(transport: Box<dyn SessionTransport>, target: &SessionTarget, codec: Arc<dyn AudioCodec>) -> Self {
        Self {
            transport,
            envelope: Envelope::new(target.flow_id.clone(), target.session_id.clone()),
            decoder: InboundDecoder::new(codec),
            stats: SocketStats::new(),
            closed: false,
        }
    }

    /// Connecte un nouveau socket via le connecteur
    pub async fn open(
        connector: &dyn SocketConnector,
        target: &SessionTarget,
        codec: Arc<dyn AudioCodec>,
    ) -> NetworkResult<Self> {
        let transport = connector.connect(target).await?;
        info!(flow_id = %target.flow_id, session_id = %target.session_id, "Socket de session ouvert");
        Ok(Self::new(transport, target, codec))
    }

    /// Envoie un bloc capturé
    pub async fn send_frame(&mut self, frame: &EncodedFrame) -> NetworkResult<()> {
        let message = ClientMessage::audio_append(frame);
        self.send(&message).await?;
        self.stats.frames_sent += 1;
        trace!(sequence = frame.sequence_number, bytes = frame.len_bytes(), "Bloc envoyé");
        Ok(())
    }

    /// Envoie un message de contrôle
    pub async fn send_control(&mut self, message: ClientMessage) -> NetworkResult<()> {
        debug!(kind = message.kind(), "Message de contrôle");
        self.send(&message).await
    }

    async fn send(&mut self, message: &ClientMessage) -> NetworkResult<()> {
        let wire = self.envelope.wrap(message)?;
        let size = wire.len() as u64;
        self.transport.send(wire).await?;
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += size;
        Ok(())
    }

    /// Attend le prochain événement utile
    ///
    /// Les messages de type inconnu sont comptés puis sautés. Après un
    /// `Closed` ou un `Failed`, le socket ne produit plus que `Closed`.
    pub async fn next_event(&mut self) -> SocketEvent {
        loop {
            if self.closed {
                return SocketEvent::Closed { clean: true, reason: None };
            }

            let message = match self.transport.receive().await {
                None => {
                    self.closed = true;
                    return SocketEvent::Closed { clean: true, reason: None };
                }
                Some(Err(e)) if e.is_clean_close() => {
                    self.closed = true;
                    return SocketEvent::Closed { clean: true, reason: Some(e.to_string()) };
                }
                Some(Err(e)) => {
                    self.closed = true;
                    warn!("Socket de session en échec : {}", e);
                    return SocketEvent::Failed(e);
                }
                Some(Ok(message)) => message,
            };

            self.stats.messages_received += 1;
            match self.decoder.decode(message) {
                Ok(Some(event)) => {
                    if matches!(event, InboundEvent::Audio(_)) {
                        self.stats.chunks_received += 1;
                    }
                    return SocketEvent::Message(event);
                }
                Ok(None) => self.stats.ignored_messages += 1,
                Err(e) => {
                    self.closed = true;
                    warn!("Message entrant illisible : {}", e);
                    return SocketEvent::Failed(e);
                }
            }
        }
    }

    /// Termine la session côté serveur puis ferme le transport
    ///
    /// Idempotent : les appels suivants ne font rien.
    pub async fn close(&mut self) -> NetworkResult<()> {
        if self.closed && !self.transport.is_open() {
            return Ok(());
        }
        self.closed = true;

        if self.transport.is_open() {
            if let Err(e) = self.send(&ClientMessage::EndStream).await {
                debug!("end_stream non envoyé : {}", e);
            }
            self.transport.close().await?;
        }

        info!(
            session_id = %self.envelope.session_id,
            sent = self.stats.messages_sent,
            received = self.stats.messages_received,
            "Socket de session fermé"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.closed && self.transport.is_open()
    }

    pub fn stats(&self) -> SocketStats {
        self.stats.clone()
    }

    pub fn flow_id(&self) -> &str {
        &self.envelope.flow_id
    }

    pub fn session_id(&self) -> &str {
        &self.envelope.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulated_pair, NetworkError, SimulatedPeer};
    use audio::{AudioConfig, Pcm16Codec};

    fn socket() -> (SessionSocket, SimulatedPeer) {
        let target = SessionTarget::new("ws://localhost:7860", "flow-a", "sess-a");
        let (transport, peer) = simulated_pair(target.clone());
        let codec = Arc::new(Pcm16Codec::new(&AudioConfig::default()).unwrap());
        (SessionSocket::new(Box::new(transport), &target, codec), peer)
    }

    #[tokio::test]
    async fn test_frames_carry_session_identity() {
        let (mut socket, mut peer) = socket();

        socket.send_frame(&EncodedFrame::new(vec![0; 960], 24000, 4)).await.unwrap();

        let value = peer.recv_json().await.unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["flow_id"], "flow-a");
        assert_eq!(value["session_id"], "sess-a");
        assert_eq!(value["buffer_id"], 4);
        assert_eq!(socket.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_unknown_messages_skipped() {
        let (mut socket, peer) = socket();
        peer.send_status("response.text.delta");
        peer.send_turn_complete();

        assert!(matches!(socket.next_event().await, SocketEvent::Message(InboundEvent::TurnComplete)));
        let stats = socket.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.ignored_messages, 1);
    }

    #[tokio::test]
    async fn test_malformed_message_fails() {
        let (mut socket, peer) = socket();
        peer.send_text("not json");

        assert!(matches!(
            socket.next_event().await,
            SocketEvent::Failed(NetworkError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_close_sends_end_stream_once() {
        let (mut socket, mut peer) = socket();

        tokio_test::assert_ok!(socket.close().await);
        tokio_test::assert_ok!(socket.close().await);

        assert_eq!(peer.recv_json().await.unwrap()["type"], "end_stream");
        assert!(peer.recv().await.is_none());
        assert!(!socket.is_open());
        assert!(matches!(socket.next_event().await, SocketEvent::Closed { clean: true, .. }));
    }

    #[tokio::test]
    async fn test_peer_close_and_failure() {
        let (mut socket, peer) = socket();
        peer.close();
        assert!(matches!(socket.next_event().await, SocketEvent::Closed { clean: true, .. }));

        let (mut socket, peer) = self::socket();
        peer.fail("boom");
        assert!(matches!(socket.next_event().await, SocketEvent::Failed(_)));
    }
}
