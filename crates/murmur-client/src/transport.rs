//! WebSocket transport for the client.
//!
//! Provides [`ConnectedLink`] which handles WebSocket I/O for wire events.
//! This is a thin layer that just sends/receives events - protocol logic
//! remains in the Sans-IO [`MessagingClient`](crate::MessagingClient).

use futures_util::{SinkExt, StreamExt};
use murmur_proto::WireEvent;
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Inbound notifications from the link.
#[derive(Debug)]
pub enum LinkEvent {
    /// A wire event arrived from the relay.
    Event(WireEvent),
    /// The link closed; feed `LinkLost` into the client.
    Closed,
}

/// Handle to an open relay link.
///
/// Wire events are sent/received via the channels; an internal task handles
/// the WebSocket I/O.
pub struct ConnectedLink {
    /// Send events to the relay.
    pub to_relay: mpsc::Sender<WireEvent>,
    /// Receive events and link notifications.
    pub from_relay: mpsc::Receiver<LinkEvent>,
    /// Abort handle to stop the link task.
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedLink {
    /// Stop the link task. The relay sees an abrupt close.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Open a WebSocket link to a relay.
///
/// Returns a [`ConnectedLink`] with channels for event transport. The caller
/// feeds [`crate::ClientEvent::LinkOpened`] into the client on success.
///
/// # Errors
///
/// - [`TransportError::Connection`] when the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<ConnectedLink, TransportError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let (to_relay_tx, to_relay_rx) = mpsc::channel::<WireEvent>(32);
    let (from_relay_tx, from_relay_rx) = mpsc::channel::<LinkEvent>(32);

    let handle = tokio::spawn(run_link(socket, to_relay_rx, from_relay_tx));

    Ok(ConnectedLink {
        to_relay: to_relay_tx,
        from_relay: from_relay_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Run the link, bridging between channels and the WebSocket.
async fn run_link(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut to_relay: mpsc::Receiver<WireEvent>,
    from_relay: mpsc::Sender<LinkEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = to_relay.recv() => {
                let Some(event) = outbound else { break };
                let bytes = match event.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unencodable event");
                        continue;
                    },
                };
                if sink.send(Message::Binary(bytes.into())).await.is_err() {
                    let _ = from_relay.send(LinkEvent::Closed).await;
                    break;
                }
            },

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Binary(bytes))) => {
                        match WireEvent::decode(&bytes) {
                            Ok(event) => {
                                if from_relay.send(LinkEvent::Event(event)).await.is_err() {
                                    break;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping undecodable event");
                            },
                        }
                    },
                    // Control frames are handled by the library.
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "link stream error");
                        let _ = from_relay.send(LinkEvent::Closed).await;
                        break;
                    },
                    None => {
                        let _ = from_relay.send(LinkEvent::Closed).await;
                        break;
                    },
                }
            },
        }
    }
}
