//! Connection layer: each remote component is reached through a [`Connection`]
//! for outbound messages and a channel inbox for inbound ones. A dedicated
//! reader thread decodes frames off the socket and pushes them into the
//! inbox; when the stream fails or desynchronises the thread exits and drops
//! its sender, so every blocking receive observes the closure instead of
//! hanging.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use rescue_proto::{Message, ProtoError, Registry};

use crate::error::ConnectionError;

/// Outbound half of a component connection. Delivery is in issuance order;
/// the matching inbox yields the peer's messages in arrival order.
pub trait Connection: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), ConnectionError>;
    fn close(&self);
    fn peer(&self) -> &str;
}

/// TCP-backed connection. The writer half lives behind a mutex; the reader
/// half is consumed by a decoder thread feeding the returned inbox.
pub struct TcpConnection {
    peer: String,
    stream: Mutex<TcpStream>,
}

impl TcpConnection {
    pub fn spawn(
        stream: TcpStream,
        registry: Arc<Registry>,
    ) -> std::io::Result<(Self, Receiver<Message>)> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(err) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, err);
        }
        let reader = stream.try_clone()?;
        let (sender, receiver) = unbounded();
        let reader_peer = peer.clone();
        thread::spawn(move || read_loop(reader, registry, sender, reader_peer));
        Ok((
            Self {
                peer,
                stream: Mutex::new(stream),
            },
            receiver,
        ))
    }
}

fn read_loop(
    mut stream: TcpStream,
    registry: Arc<Registry>,
    sender: Sender<Message>,
    peer: String,
) {
    loop {
        match Message::read_stream(&mut stream, &registry) {
            Ok(message) => {
                if sender.send(message).is_err() {
                    break;
                }
            }
            Err(ProtoError::Io(err)) => {
                debug!(
                    target: "rescue_kernel::connection",
                    %peer,
                    %err,
                    "connection closed"
                );
                break;
            }
            Err(err) => {
                warn!(
                    target: "rescue_kernel::connection",
                    %peer,
                    %err,
                    "protocol desynchronisation, dropping connection"
                );
                let _ = stream.shutdown(Shutdown::Both);
                break;
            }
        }
    }
    // Dropping the sender closes the inbox and unblocks any pending receive.
}

impl Connection for TcpConnection {
    fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let frame = message.encode();
        let mut stream = self.stream.lock().expect("connection writer mutex poisoned");
        stream
            .write_all(&frame)
            .map_err(|source| ConnectionError::Send {
                peer: self.peer.clone(),
                source,
            })
    }

    fn close(&self) {
        let stream = self.stream.lock().expect("connection writer mutex poisoned");
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// In-memory duplex connection. Frames still pass through the real codec, so
/// in-process wiring and tests exercise the exact wire format.
pub struct ChannelConnection {
    peer: String,
    outbound: Mutex<Option<Sender<Vec<u8>>>>,
}

/// One endpoint of an in-memory duplex link: the connection to send on and
/// the inbox of decoded messages from the other side.
pub type ChannelEndpoint = (ChannelConnection, Receiver<Message>);

/// Build a connected pair of in-memory endpoints.
pub fn channel_pair(registry: Arc<Registry>) -> (ChannelEndpoint, ChannelEndpoint) {
    let left = spawn_decoder("left", Arc::clone(&registry));
    let right = spawn_decoder("right", registry);
    let (left_frames, left_inbox) = left;
    let (right_frames, right_inbox) = right;
    (
        (
            ChannelConnection {
                peer: "right".to_string(),
                outbound: Mutex::new(Some(right_frames)),
            },
            left_inbox,
        ),
        (
            ChannelConnection {
                peer: "left".to_string(),
                outbound: Mutex::new(Some(left_frames)),
            },
            right_inbox,
        ),
    )
}

fn spawn_decoder(side: &'static str, registry: Arc<Registry>) -> (Sender<Vec<u8>>, Receiver<Message>) {
    let (frame_tx, frame_rx) = unbounded::<Vec<u8>>();
    let (message_tx, message_rx) = unbounded::<Message>();
    thread::spawn(move || {
        for frame in frame_rx.iter() {
            match Message::decode(&frame, &registry) {
                Ok(message) => {
                    if message_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        target: "rescue_kernel::connection",
                        peer = side,
                        %err,
                        "protocol desynchronisation, dropping connection"
                    );
                    break;
                }
            }
        }
    });
    (frame_tx, message_rx)
}

impl Connection for ChannelConnection {
    fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let guard = self.outbound.lock().expect("channel connection mutex poisoned");
        let sender = guard.as_ref().ok_or_else(|| ConnectionError::Closed {
            peer: self.peer.clone(),
        })?;
        sender
            .send(message.encode())
            .map_err(|_| ConnectionError::Closed {
                peer: self.peer.clone(),
            })
    }

    fn close(&self) {
        self.outbound
            .lock()
            .expect("channel connection mutex poisoned")
            .take();
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
