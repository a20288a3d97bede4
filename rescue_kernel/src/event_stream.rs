//! TCP broadcast of per-round kernel events as JSON envelopes, for external
//! monitors that do not speak the binary protocol. Purely observational: a
//! slow or dead subscriber is dropped, never waited on.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use rescue_proto::EntityId;

use crate::listener::KernelListener;
use crate::timestep::Timestep;

/// One event envelope on the stream.
#[derive(Debug, Clone, Serialize)]
pub struct KernelEvent {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_entities: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_entities: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl KernelEvent {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            round: None,
            score: None,
            commands: None,
            changed_entities: None,
            deleted_entities: None,
            component: None,
        }
    }

    fn component(event: &'static str, name: &str) -> Self {
        Self {
            component: Some(name.to_string()),
            ..Self::bare(event)
        }
    }
}

pub struct EventStreamHandle {
    sender: Sender<KernelEvent>,
    local_addr: SocketAddr,
}

/// Bind the event stream server. Returns `None` (with a warning) when the
/// address cannot be bound; the kernel runs fine without observers.
pub fn start_event_stream(bind_addr: SocketAddr) -> Option<EventStreamHandle> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(
                "Event stream bind failed at {}: {}. Broadcasting disabled.",
                bind_addr, err
            );
            return None;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            warn!("Event stream local_addr failed: {}. Broadcasting disabled.", err);
            return None;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        warn!("set_nonblocking failed for event stream listener: {}", err);
        return None;
    }

    let (sender, receiver) = unbounded::<KernelEvent>();
    let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
    let accept_clients = Arc::clone(&clients);

    thread::spawn(move || run_event_stream(listener, accept_clients, receiver));

    Some(EventStreamHandle { sender, local_addr })
}

fn run_event_stream(
    listener: TcpListener,
    clients: Arc<Mutex<Vec<TcpStream>>>,
    receiver: Receiver<KernelEvent>,
) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for event client {}: {}", addr, err);
                }
                clients
                    .lock()
                    .expect("event clients mutex poisoned")
                    .push(stream);
                info!("Event stream client connected: {}", addr);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                error!("Error accepting event client: {}", err);
                thread::sleep(Duration::from_millis(200));
            }
        }

        while let Ok(event) = receiver.try_recv() {
            if let Ok(bytes) = serde_json::to_vec(&event) {
                broadcast_payload(&clients, &bytes);
            }
        }

        thread::sleep(Duration::from_millis(16));
    }
}

fn broadcast_payload(clients: &Arc<Mutex<Vec<TcpStream>>>, payload: &[u8]) {
    let mut guard = clients.lock().expect("event clients mutex poisoned");
    guard.retain_mut(|stream| {
        let len = payload.len() as u32;
        let mut buffer = Vec::with_capacity(4 + payload.len());
        buffer.extend_from_slice(&len.to_be_bytes());
        buffer.extend_from_slice(payload);
        match stream.write_all(&buffer) {
            Ok(_) => true,
            Err(err) => {
                warn!("Dropping event stream client: {}", err);
                false
            }
        }
    });
}

impl EventStreamHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A kernel listener that feeds this stream.
    pub fn listener(&self) -> EventStreamListener {
        EventStreamListener {
            sender: self.sender.clone(),
        }
    }
}

pub struct EventStreamListener {
    sender: Sender<KernelEvent>,
}

impl KernelListener for EventStreamListener {
    fn simulation_started(&self) {
        let _ = self.sender.send(KernelEvent::bare("simulation-started"));
    }

    fn timestep_completed(&self, timestep: &Timestep) {
        let _ = self.sender.send(KernelEvent {
            round: Some(timestep.round()),
            score: timestep.score(),
            commands: Some(timestep.commands().len()),
            changed_entities: Some(timestep.changes().changed_entity_count()),
            deleted_entities: Some(timestep.changes().deleted_entity_count()),
            ..KernelEvent::bare("round-completed")
        });
    }

    fn simulation_ended(&self) {
        let _ = self.sender.send(KernelEvent::bare("simulation-ended"));
    }

    fn agent_added(&self, name: &str, _entity: EntityId) {
        let _ = self.sender.send(KernelEvent::component("agent-added", name));
    }

    fn agent_removed(&self, name: &str, _entity: EntityId) {
        let _ = self
            .sender
            .send(KernelEvent::component("agent-removed", name));
    }

    fn simulator_added(&self, name: &str) {
        let _ = self
            .sender
            .send(KernelEvent::component("simulator-added", name));
    }

    fn simulator_removed(&self, name: &str) {
        let _ = self
            .sender
            .send(KernelEvent::component("simulator-removed", name));
    }

    fn viewer_added(&self, name: &str) {
        let _ = self
            .sender
            .send(KernelEvent::component("viewer-added", name));
    }

    fn viewer_removed(&self, name: &str) {
        let _ = self
            .sender
            .send(KernelEvent::component("viewer-removed", name));
    }
}
