//! Message transport to the remote.
//!
//! The connector only needs an ordered, bidirectional stream of text frames.
//! [`Transport::open`] returns once the socket is open, so nothing can be
//! written to a half-open connection.

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::TransportError;

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(String),
    /// The socket closed, with the remote's reason when one was given
    Closed(Option<String>),
}

/// Both halves of an open socket. Dropping `outbound` closes it.
pub struct Link {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(
        outbound: UnboundedSender<String>,
        inbound: UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Link, TransportError>;
}

/// Websocket transport using tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url) -> Result<Link, TransportError> {
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Open {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        tracing::info!("socket open to {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = unbounded::<String>();
        let (inbound_tx, inbound) = unbounded::<TransportEvent>();

        // Read task
        let events = inbound_tx.clone();
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::trace!("socket received: {}", text.as_str());
                        if events
                            .unbounded_send(TransportEvent::Message(text.to_string()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string());
                        tracing::info!("socket received close frame");
                        break;
                    }
                    Ok(Message::Ping(_)) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(_) => {
                        // Ignore binary, pong, etc.
                    }
                    Err(e) => {
                        tracing::warn!("socket read error: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            let _ = events.unbounded_send(TransportEvent::Closed(reason));
        });

        // Write task
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.next().await {
                tracing::trace!("socket sending: {}", frame);
                if let Err(e) = write.send(Message::text(frame)).await {
                    tracing::warn!("socket send failed: {}", e);
                    let _ = inbound_tx
                        .unbounded_send(TransportEvent::Closed(Some(e.to_string())));
                    return;
                }
            }
            // Sender dropped
            tracing::debug!("outbound queue closed, closing socket");
            let _ = write.close().await;
        });

        Ok(Link::new(outbound, inbound))
    }
}
