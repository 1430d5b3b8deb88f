//! WebSocket transport
//!
//! Dials the hub with a bearer token and a bounded handshake, then splits the
//! socket into a [`FrameWriter`] owned by the writer loop and a
//! [`FrameReader`] owned by the reader loop.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use taibai_core::ClientConfig;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for an intentional shutdown
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the peer sent a close frame without a code
const CLOSE_NO_STATUS: u16 = 1005;

/// A frame read from the socket
#[derive(Debug)]
pub enum Inbound {
    /// Text or binary payload, expected to hold one envelope
    Data(Vec<u8>),
    /// Transport-level ping or pong; tungstenite answers pings itself
    Keepalive,
    Close { code: u16, reason: String },
}

/// Write half of a hub connection
pub struct FrameWriter {
    sink: SplitSink<WsStream, Message>,
}

impl FrameWriter {
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    /// Transport-level ping, independent of the heartbeat envelope
    pub async fn send_ping(&mut self) -> Result<()> {
        self.sink.send(Message::Ping(Default::default())).await?;
        Ok(())
    }

    /// Send a normal close frame and shut the sink
    pub async fn close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half of a hub connection
pub struct FrameReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader {
    /// Next frame, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            let inbound = match msg {
                Message::Text(text) => Inbound::Data(text.as_bytes().to_vec()),
                Message::Binary(data) => Inbound::Data(data.to_vec()),
                Message::Ping(_) | Message::Pong(_) => Inbound::Keepalive,
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    Inbound::Close { code, reason }
                }
                Message::Frame(_) => continue,
            };
            return Some(Ok(inbound));
        }
    }
}

/// Perform the websocket upgrade against `config.url`.
///
/// Fails with [`Error::DialTimeout`] if the TCP connect plus upgrade takes
/// longer than `config.dial_timeout`, and with [`Error::Rejected`] if the
/// hub answers the upgrade with an HTTP error (e.g. 401 for a bad token).
pub async fn connect(config: &ClientConfig) -> Result<(FrameWriter, FrameReader)> {
    let url = config.ws_url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Handshake(format!("invalid url {}: {}", url, e)))?;

    if !config.token.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| Error::Handshake("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let dial = tokio_tungstenite::connect_async(request);
    let (ws, _response) = match tokio::time::timeout(config.dial_timeout, dial).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(tungstenite::Error::Http(response))) => {
            return Err(Error::Rejected {
                status: response.status().as_u16(),
            })
        }
        Ok(Err(e)) => return Err(Error::Handshake(e.to_string())),
        Err(_) => return Err(Error::DialTimeout(config.dial_timeout)),
    };

    let (sink, stream) = ws.split();
    Ok((FrameWriter { sink }, FrameReader { stream }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unreachable_hub_fails_fast() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new(format!("ws://{}/ws", addr), "t")
            .with_dial_timeout(Duration::from_secs(2));
        let result = connect(&config).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }

    #[tokio::test]
    async fn test_silent_server_hits_dial_timeout() {
        // Accepts TCP but never answers the upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = ClientConfig::new(format!("ws://{}/ws", addr), "t")
            .with_dial_timeout(Duration::from_millis(200));
        let result = connect(&config).await;
        assert!(matches!(result, Err(Error::DialTimeout(_))));
    }
}
