//! In-process components. These participate in every round alongside the
//! proxy-backed remote components, without a connection: the kernel calls
//! them directly under the round lock.

use rescue_proto::{ChangeSet, Command, EntityId};

use crate::timestep::Timestep;

/// An agent running inside the kernel process.
pub trait Agent: Send {
    /// The entity this agent controls.
    fn entity(&self) -> EntityId;

    /// Deliver the round's perception and hearing.
    fn process_sense(&mut self, round: u32, visible: &ChangeSet, heard: &[Command]);

    /// The commands this agent issues for the round, collected after
    /// perception has been delivered.
    fn commands(&mut self, round: u32) -> Vec<Command>;
}

/// A simulator running inside the kernel process.
pub trait Simulator: Send {
    fn name(&self) -> &str;

    /// Process the round's accepted commands, recording the resulting world
    /// delta into `changes`.
    fn process_commands(&mut self, round: u32, commands: &[Command], changes: &mut ChangeSet);

    /// Receive the merged delta for the round, for the simulator's own
    /// bookkeeping.
    fn handle_update(&mut self, _round: u32, _update: &ChangeSet) {}
}

/// A viewer running inside the kernel process.
pub trait Viewer: Send {
    fn name(&self) -> &str;

    fn handle_timestep(&mut self, timestep: &Timestep);
}
