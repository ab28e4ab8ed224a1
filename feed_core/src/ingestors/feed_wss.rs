//! # Feed WSS Connector
//!
//! tokio-tungstenite transport for the live detection feed. The backend sends
//! one JSON detection per text frame. Binary frames are read as UTF-8 text,
//! ping/pong is answered by tungstenite itself, and both close frames and read
//! errors end the link so the connection manager can schedule a reconnect.

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use super::link::{Connector, FeedLink, LinkFuture, TransportEvent};
use crate::error::TransportError;

/// Default limit for the opening handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a polite close may take before the socket is simply dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> LinkFuture {
        let url = url.to_string();
        let limit = self.connect_timeout;
        async move {
            log::info!("Connecting to detection feed: {}", url);
            match tokio::time::timeout(limit, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => {
                    let link: Box<dyn FeedLink> = Box::new(WsLink { stream });
                    Ok(link)
                }
                Ok(Err(e)) => Err(TransportError::Open {
                    url,
                    reason: e.to_string(),
                }),
                Err(_) => Err(TransportError::Open {
                    url,
                    reason: format!("handshake timed out after {}ms", limit.as_millis()),
                }),
            }
        }
        .boxed()
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedLink for WsLink {
    fn next_event(&mut self) -> BoxFuture<'_, Option<TransportEvent>> {
        async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        log::trace!("Received binary frame from feed: {} bytes", bin.len());
                        return Some(TransportEvent::Message(String::from_utf8_lossy(&bin).into_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        return Some(TransportEvent::Closed(reason));
                    }
                    // Ping, pong and raw frames carry no detections.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some(TransportEvent::Failed(e.to_string())),
                    None => return None,
                }
            }
        }
        .boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let WsLink { mut stream } = *self;
        async move {
            match tokio::time::timeout(CLOSE_GRACE, stream.close(None)).await {
                Ok(Ok(())) => log::debug!("Feed socket closed"),
                Ok(Err(e)) => log::debug!("Feed socket close failed: {}", e),
                Err(_) => log::debug!("Feed socket close timed out; dropping it"),
            }
        }
        .boxed()
    }
}
