//! Component proxies: the kernel-side blocking facades over asynchronous
//! connections. Each proxy owns its connection and inbox; blocking pulls
//! route inbound messages into round-keyed buffers so a late-arriving
//! response for a future round is never lost. A proxy whose connection fails
//! is flagged closed and swept out of the kernel after the current phase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use rescue_proto::{ChangeSet, Command, EntityId, Message};

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::timestep::Timestep;

/// Handle for an agent connected over the network. The kernel pushes
/// perception each round and the collector pulls the agent's command batch.
pub struct AgentProxy {
    name: String,
    entity: EntityId,
    connection: Box<dyn Connection>,
    inbox: Receiver<Message>,
    pending: Mutex<HashMap<u32, Vec<Command>>>,
    closed: AtomicBool,
}

impl AgentProxy {
    pub fn new(
        name: impl Into<String>,
        entity: EntityId,
        connection: Box<dyn Connection>,
        inbox: Receiver<Message>,
    ) -> Self {
        Self {
            name: name.into(),
            entity,
            connection,
            inbox,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entity this agent controls.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn mark_closed(&self) -> ConnectionError {
        self.closed.store(true, Ordering::Relaxed);
        ConnectionError::Closed {
            peer: self.connection.peer().to_string(),
        }
    }

    /// One-way perception push; does not wait for any acknowledgement.
    pub fn send_perception_update(
        &self,
        round: u32,
        visible: &ChangeSet,
        heard: &[Command],
    ) -> Result<(), ConnectionError> {
        let result = self.connection.send(&Message::PerceptionPush {
            agent: self.entity,
            round,
            visible: visible.clone(),
            heard: heard.to_vec(),
        });
        if result.is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Block until this agent's command batch for `round` arrives, or the
    /// connection fails.
    pub fn wait_for_commands(&self, round: u32) -> Result<Vec<Command>, ConnectionError> {
        if let Some(commands) = self.pending.lock().expect("agent pending mutex poisoned").remove(&round) {
            return Ok(commands);
        }
        loop {
            let message = self.inbox.recv().map_err(|_| self.mark_closed())?;
            if let Some(commands) = self.route(round, message) {
                return Ok(commands);
            }
        }
    }

    /// Deadline variant used by timed collectors; `None` on timeout.
    pub fn wait_for_commands_until(
        &self,
        round: u32,
        deadline: Instant,
    ) -> Result<Option<Vec<Command>>, ConnectionError> {
        if let Some(commands) = self.pending.lock().expect("agent pending mutex poisoned").remove(&round) {
            return Ok(Some(commands));
        }
        loop {
            let message = match self.inbox.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(self.mark_closed()),
            };
            if let Some(commands) = self.route(round, message) {
                return Ok(Some(commands));
            }
        }
    }

    fn route(&self, wanted: u32, message: Message) -> Option<Vec<Command>> {
        match message {
            Message::CommandResponse {
                round, commands, ..
            } => {
                if round == wanted {
                    Some(commands)
                } else if round > wanted {
                    self.pending
                        .lock()
                        .expect("agent pending mutex poisoned")
                        .insert(round, commands);
                    None
                } else {
                    debug!(
                        target: "rescue_kernel::proxy",
                        agent = %self.name,
                        round,
                        wanted,
                        "dropping stale command response"
                    );
                    None
                }
            }
            other => {
                debug!(
                    target: "rescue_kernel::proxy",
                    agent = %self.name,
                    urn = other.urn(),
                    "ignoring unexpected message from agent"
                );
                None
            }
        }
    }

    /// Terminate the connection and release resources.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.connection.close();
    }
}

/// Handle for a simulator connected over the network.
pub struct SimulatorProxy {
    name: String,
    connection: Box<dyn Connection>,
    inbox: Receiver<Message>,
    pending: Mutex<HashMap<u32, ChangeSet>>,
    closed: AtomicBool,
}

impl SimulatorProxy {
    pub fn new(
        name: impl Into<String>,
        connection: Box<dyn Connection>,
        inbox: Receiver<Message>,
    ) -> Self {
        Self {
            name: name.into(),
            connection,
            inbox,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn mark_closed(&self) -> ConnectionError {
        self.closed.store(true, Ordering::Relaxed);
        ConnectionError::Closed {
            peer: self.connection.peer().to_string(),
        }
    }

    pub fn send_agent_commands(
        &self,
        round: u32,
        commands: &[Command],
    ) -> Result<(), ConnectionError> {
        let result = self.connection.send(&Message::CommandPush {
            round,
            commands: commands.to_vec(),
        });
        if result.is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Block until this simulator's change-set for `round` arrives, or the
    /// connection fails. Never hangs on a dead connection: the reader thread
    /// closes the inbox, which surfaces here as an error.
    pub fn get_updates(&self, round: u32) -> Result<ChangeSet, ConnectionError> {
        if let Some(changes) = self
            .pending
            .lock()
            .expect("simulator pending mutex poisoned")
            .remove(&round)
        {
            return Ok(changes);
        }
        loop {
            let message = self.inbox.recv().map_err(|_| self.mark_closed())?;
            match message {
                Message::UpdateResponse {
                    round: got,
                    changes,
                    ..
                } => {
                    if got == round {
                        return Ok(changes);
                    }
                    if got > round {
                        self.pending
                            .lock()
                            .expect("simulator pending mutex poisoned")
                            .insert(got, changes);
                    } else {
                        debug!(
                            target: "rescue_kernel::proxy",
                            simulator = %self.name,
                            round = got,
                            wanted = round,
                            "dropping stale update response"
                        );
                    }
                }
                other => {
                    debug!(
                        target: "rescue_kernel::proxy",
                        simulator = %self.name,
                        urn = other.urn(),
                        "ignoring unexpected message from simulator"
                    );
                }
            }
        }
    }

    pub fn send_update(&self, round: u32, changes: &ChangeSet) -> Result<(), ConnectionError> {
        let result = self.connection.send(&Message::UpdatePush {
            round,
            changes: changes.clone(),
        });
        if result.is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
        result
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.connection.close();
    }
}

/// Handle for a viewer connected over the network. Receives completed
/// timesteps only.
pub struct ViewerProxy {
    name: String,
    connection: Box<dyn Connection>,
    closed: AtomicBool,
}

impl ViewerProxy {
    pub fn new(name: impl Into<String>, connection: Box<dyn Connection>) -> Self {
        Self {
            name: name.into(),
            connection,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn send_timestep(&self, timestep: &Timestep) -> Result<(), ConnectionError> {
        let result = self.connection.send(&Message::TimestepBroadcast {
            round: timestep.round(),
            commands: timestep.commands().to_vec(),
            changes: timestep.changes().clone(),
        });
        if result.is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
        result
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use rescue_proto::Registry;

    use crate::connection::channel_pair;

    #[test]
    fn agent_commands_are_routed_by_round() {
        let registry = Arc::new(Registry::new());
        let ((kernel_conn, kernel_inbox), (agent_conn, _agent_inbox)) =
            channel_pair(registry);
        let proxy = AgentProxy::new("agent-1", EntityId(1), Box::new(kernel_conn), kernel_inbox);

        // The remote agent answers round 2 before round 1.
        agent_conn
            .send(&Message::CommandResponse {
                agent: EntityId(1),
                round: 2,
                commands: vec![Command::new("urn:test:command:rest", EntityId(1), 2, vec![])],
            })
            .unwrap();
        agent_conn
            .send(&Message::CommandResponse {
                agent: EntityId(1),
                round: 1,
                commands: vec![Command::new("urn:test:command:move", EntityId(1), 1, vec![])],
            })
            .unwrap();

        let first = proxy.wait_for_commands(1).unwrap();
        assert_eq!(first[0].urn(), "urn:test:command:move");
        let second = proxy.wait_for_commands(2).unwrap();
        assert_eq!(second[0].urn(), "urn:test:command:rest");
    }

    #[test]
    fn dropped_connection_surfaces_as_error_not_hang() {
        let registry = Arc::new(Registry::new());
        let ((kernel_conn, kernel_inbox), (sim_conn, _sim_inbox)) = channel_pair(registry);
        let proxy = SimulatorProxy::new("sim-1", Box::new(kernel_conn), kernel_inbox);

        let handle = thread::spawn(move || {
            // Remote simulator dies without answering.
            sim_conn.close();
        });
        handle.join().unwrap();

        assert!(matches!(
            proxy.get_updates(1),
            Err(ConnectionError::Closed { .. })
        ));
        assert!(proxy.is_closed());
    }
}
