use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::config::redacted_endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Error(String),
    /// Always the last event of a channel.
    Closed(Option<String>),
}

pub struct PushChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, endpoint: Url) -> Result<PushChannel>;
}

pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, endpoint: Url) -> Result<PushChannel> {
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .with_context(|| {
                format!(
                    "failed to connect websocket: {}",
                    redacted_endpoint(&endpoint)
                )
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    debug!("push: websocket send failed: {err}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            let mut close_reason = None;
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = inbound_tx.send(TransportEvent::Frame(text));
                    }
                    Ok(Message::Close(frame)) => {
                        close_reason = frame
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = inbound_tx.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed(close_reason));
        });

        Ok(PushChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
