use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::WAIT;

/// WebSocket feed server on an ephemeral port. Stops when dropped.
pub struct MockFeed {
    pub url: String,
    peers: mpsc::UnboundedReceiver<FeedPeer>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockFeed {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, peers) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match accept_async(stream).await {
                    Ok(ws) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if tx.send(FeedPeer { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("mock feed handshake failed: {e}"),
                }
            }
        });

        Ok(Self {
            url: format!("ws://{addr}/ws"),
            peers,
            accepted,
            task,
        })
    }

    /// The next client that completed the handshake.
    pub async fn next_peer(&mut self) -> anyhow::Result<FeedPeer> {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .map_err(|_| anyhow!("no client connected in time"))?
            .ok_or_else(|| anyhow!("mock feed stopped"))
    }

    /// Handshakes completed so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server side of one accepted feed connection.
pub struct FeedPeer {
    ws: WebSocketStream<TcpStream>,
}

impl FeedPeer {
    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn send_json(&mut self, value: &Value) -> anyhow::Result<()> {
        self.send_text(&value.to_string()).await
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.ws.send(Message::Binary(bytes.to_vec().into())).await?;
        Ok(())
    }

    /// Sends a close frame and drops the connection.
    pub async fn close(mut self, reason: &str) -> anyhow::Result<()> {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: reason.into(),
            }))
            .await?;
        Ok(())
    }

    /// Waits for the client to go away: a close frame, an error, or EOF.
    pub async fn closed_by_client(&mut self) -> anyhow::Result<()> {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .map_err(|_| anyhow!("client kept the connection open"))
    }
}
