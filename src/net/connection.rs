//! Transport abstraction (spec §4.5's `Connection`, 6% of the core). Keeps
//! `Handler`/`Room` transport-agnostic, mirroring the teacher framework's
//! split between `NetworkProtocol` (concrete transport) and the rest of the
//! session stack, which only ever sees a connection id and a byte channel.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;

/// One live transport connection: send an encoded frame, or tear it down.
/// Implementors own a writer task so callers never block on I/O.
pub trait Connection: Send + Sync {
    fn send(&self, frame: Vec<u8>);
    fn disconnect(&self);
}

/// A `tokio-tungstenite` websocket split into a reader loop (owned by the
/// caller, spec'd to run inline in the Handler's task) and a writer task fed
/// by an unbounded channel, the way the teacher's `protocol::ws` module
/// pairs a `notification_channel` with a dedicated send loop per connection.
pub struct WebSocketConnection {
    outbound: std::sync::Mutex<Option<UnboundedSender<Vec<u8>>>>,
}

impl WebSocketConnection {
    /// Splits `stream`, spawns the writer task, and returns the connection
    /// handle plus the raw frame receiver for the caller's reader loop.
    pub fn spawn(stream: WebSocketStream<TcpStream>) -> (Self, UnboundedReceiver<Result<Vec<u8>, ()>>) {
        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<Vec<u8>, ()>>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match Utf8Bytes::try_from(Bytes::from(frame)) {
                    Ok(text) => Message::Text(text),
                    Err(_) => break,
                };
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(item) = read.next().await {
                let sent = match item {
                    Ok(Message::Text(text)) => inbound_tx.send(Ok(Bytes::from(text).into())),
                    Ok(Message::Binary(bytes)) => inbound_tx.send(Ok(bytes.into())),
                    Ok(Message::Close(_)) => {
                        let _ = inbound_tx.send(Err(()));
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        let _ = inbound_tx.send(Err(()));
                        break;
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
        });

        (Self { outbound: std::sync::Mutex::new(Some(outbound_tx)) }, inbound_rx)
    }
}

impl Connection for WebSocketConnection {
    fn send(&self, frame: Vec<u8>) {
        if let Some(tx) = self.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    fn disconnect(&self) {
        // Taking and dropping the sender closes the channel, which ends the
        // writer task's recv loop and drops its half of the socket. The
        // reader task ends on its own once the peer closes or errors out.
        self.outbound.lock().unwrap().take();
    }
}

/// In-memory `Connection` used by `net` unit tests: captures every frame
/// sent to it instead of touching a real socket.
#[cfg(test)]
pub struct RecordingConnection {
    pub sent: std::sync::Mutex<Vec<Vec<u8>>>,
    pub disconnected: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            disconnected: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl Connection for RecordingConnection {
    fn send(&self, frame: Vec<u8>) {
        self.sent.lock().unwrap().push(frame);
    }

    fn disconnect(&self) {
        self.disconnected.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}
