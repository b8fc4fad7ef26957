//! WebSocket transport for DevTools frames.
//!
//! The transport owns the socket and exposes it as a pair of string channels:
//! writes go through `outbound_tx`, text frames arrive on `inbound_rx`. The
//! inbound channel closes when the socket does, which is how the connection
//! learns that the browser went away.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};

/// Channel halves of a connected transport.
pub struct TransportParts {
	pub outbound_tx: mpsc::UnboundedSender<String>,
	pub inbound_rx: mpsc::UnboundedReceiver<String>,
}

/// DevTools WebSocket transport.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Connects to a `ws://` DevTools endpoint and spawns the reader/writer tasks.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let (stream, _) = connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
		let (mut sink, mut source) = stream.split();

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

		tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if let Err(err) = sink.send(WsMessage::Text(frame)).await {
					tracing::debug!(target = "dashctl.cdp", error = %err, "devtools write failed");
					break;
				}
			}
			let _ = sink.close().await;
		});

		tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				match frame {
					Ok(WsMessage::Text(text)) => {
						if inbound_tx.send(text).is_err() {
							break;
						}
					}
					Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
						Ok(text) => {
							if inbound_tx.send(text).is_err() {
								break;
							}
						}
						Err(_) => tracing::warn!(target = "dashctl.cdp", "dropping non-utf8 devtools frame"),
					},
					Ok(WsMessage::Close(_)) => break,
					Ok(_) => {}
					Err(err) => {
						tracing::debug!(target = "dashctl.cdp", error = %err, "devtools read failed");
						break;
					}
				}
			}
		});

		Ok(TransportParts {
			outbound_tx,
			inbound_rx,
		})
	}
}
