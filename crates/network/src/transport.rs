//! Transport WebSocket vers le backend vocal
//!
//! Implémentation de `SessionTransport` avec tokio-tungstenite. TLS via
//! native-tls pour les URLs `wss://`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    NetworkConfig, NetworkError, NetworkResult, SessionTarget, SessionTransport, SocketConnector, WireMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport WebSocket connecté
pub struct WebSocketTransport {
    stream: WsStream,
    config: NetworkConfig,
    endpoint: String,
    is_open: bool,
}

impl WebSocketTransport {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SessionTransport for WebSocketTransport {
    async fn send(&mut self, message: WireMessage) -> NetworkResult<()> {
        if !self.is_open {
            return Err(NetworkError::Closed);
        }

        let frame = match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(data) => Message::Binary(data.into()),
        };

        if let Err(e) = self.stream.send(frame).await {
            self.is_open = false;
            return Err(e.into());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Option<NetworkResult<WireMessage>> {
        if !self.is_open {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(WireMessage::Text(text.as_str().to_owned()))),
                Some(Ok(Message::Binary(data))) => return Some(Ok(WireMessage::Binary(data.to_vec()))),
                Some(Ok(Message::Close(frame))) => {
                    self.is_open = false;
                    match frame {
                        Some(frame) => info!(code = ?frame.code, reason = frame.reason.as_str(), "Fermeture par le serveur"),
                        None => info!("Fermeture par le serveur"),
                    }
                    return None;
                }
                // Ping/Pong gérés par tungstenite
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    self.is_open = false;
                    return None;
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    async fn close(&mut self) -> NetworkResult<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        match timeout(self.config.close_timeout, self.stream.close(None)).await {
            Ok(Ok(())) => debug!(endpoint = %self.endpoint, "WebSocket fermé"),
            Ok(Err(e)) => debug!("Fermeture WebSocket incomplète : {}", e),
            Err(_) => warn!(endpoint = %self.endpoint, "Timeout de fermeture WebSocket"),
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Ouvre des `WebSocketTransport`
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector {
    config: NetworkConfig,
}

impl WebSocketConnector {
    pub fn new(config: NetworkConfig) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::ConfigError)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl SocketConnector for WebSocketConnector {
    async fn connect(&self, target: &SessionTarget) -> NetworkResult<Box<dyn SessionTransport>> {
        target.validate()?;
        let endpoint = target.endpoint();

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", endpoint, e)))?;

        if let Some(cookie) = target.cookie_header() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| NetworkError::ConfigError(format!("jeton d'accès invalide: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);

        info!(endpoint = %endpoint, "Connexion au backend vocal");

        let connecting = connect_async_with_config(request, Some(ws_config), false);
        let (stream, response) = match timeout(self.config.connect_timeout, connecting).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(NetworkError::connect_failed(endpoint, e)),
            Err(_) => {
                return Err(NetworkError::ConnectTimeout {
                    endpoint,
                    timeout_ms: self.config.connect_timeout.as_millis() as u64,
                });
            }
        };

        debug!(status = %response.status(), "Handshake WebSocket terminé");

        Ok(Box::new(WebSocketTransport {
            stream,
            config: self.config.clone(),
            endpoint,
            is_open: true,
        }))
    }
}
