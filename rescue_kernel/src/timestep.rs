use std::collections::BTreeMap;

use rescue_proto::{ChangeSet, Command, EntityId};

/// What one agent was shown at the start of a round.
#[derive(Debug, Clone, Default)]
pub struct AgentPerception {
    pub visible: ChangeSet,
    pub heard: Vec<Command>,
}

/// The record of one completed round: per-agent perception, the commands
/// accepted, the merged change-set and the score. Populated incrementally
/// while the round runs, then retained immutably as the previous timestep.
#[derive(Debug, Clone)]
pub struct Timestep {
    round: u32,
    perception: BTreeMap<EntityId, AgentPerception>,
    commands: Vec<Command>,
    changes: ChangeSet,
    score: Option<f64>,
}

impl Timestep {
    pub fn new(round: u32) -> Self {
        Self {
            round,
            perception: BTreeMap::new(),
            commands: Vec::new(),
            changes: ChangeSet::new(),
            score: None,
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn register_perception(
        &mut self,
        agent: EntityId,
        visible: ChangeSet,
        heard: Vec<Command>,
    ) {
        self.perception
            .insert(agent, AgentPerception { visible, heard });
    }

    pub fn perception_for(&self, agent: EntityId) -> Option<&AgentPerception> {
        self.perception.get(&agent)
    }

    pub fn perceived_agents(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.perception.keys().copied()
    }

    pub fn set_commands(&mut self, commands: Vec<Command>) {
        self.commands = commands;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn set_changes(&mut self, changes: ChangeSet) {
        self.changes = changes;
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }
}
