#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use rescue_kernel::{
    Agent, ChainedCommandFilter, CommunicationModel, Kernel, KernelStrategies,
    MaxRoundsTermination, Perception, ScoreFunction, Simulator, Timestep,
    WaitAllCommandCollector, WorldModel,
};
use rescue_proto::{
    ChangeSet, Command, Config, Entity, EntityId, EntityIdGenerator, Property, PropertyKind,
    PropertyValue, Registry,
};

pub const CIVILIAN_URN: &str = "urn:rescue:entity:civilian";
pub const HP_URN: &str = "urn:rescue:property:hp";
pub const REPORT_URN: &str = "urn:rescue:command:report";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn test_registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register_property(HP_URN, PropertyKind::Int);
    Arc::new(registry)
}

pub fn test_config() -> Config {
    let mut config = Config::new();
    config.set_value("nolog", "true");
    config
}

/// A world holding one civilian, entity #1, at full health.
pub fn base_world() -> WorldModel {
    let mut world = WorldModel::new();
    let mut civilian = Entity::new(EntityId(1), CIVILIAN_URN);
    civilian.add_property(Property::new(HP_URN, PropertyValue::Int(100)));
    world.add_entity(civilian);
    world
}

/// Perception that shows agents nothing; these exercises assert on world
/// state and command flow, not on what agents see.
pub struct BlindPerception;

impl Perception for BlindPerception {
    fn visible(&mut self, _agent: EntityId, _world: &WorldModel, _round: u32) -> ChangeSet {
        ChangeSet::new()
    }
}

/// Communication model in which nothing is ever heard.
pub struct SilentCommunication;

impl CommunicationModel for SilentCommunication {
    fn process(&mut self, _round: u32, _commands: &[Command], _world: &WorldModel) {}

    fn hearing(&self, _entity: &Entity) -> Vec<Command> {
        Vec::new()
    }
}

/// Scores each round with its round number and records every invocation.
pub struct RecordingScore {
    calls: Arc<Mutex<Vec<u32>>>,
}

impl RecordingScore {
    pub fn new(calls: Arc<Mutex<Vec<u32>>>) -> Self {
        Self { calls }
    }
}

impl ScoreFunction for RecordingScore {
    fn score(&mut self, _world: &WorldModel, timestep: &Timestep) -> f64 {
        self.calls.lock().unwrap().push(timestep.round());
        f64::from(timestep.round())
    }
}

/// In-process agent that reports once per round.
pub struct ScriptedAgent {
    entity: EntityId,
}

impl ScriptedAgent {
    pub fn new(entity: EntityId) -> Self {
        Self { entity }
    }
}

impl Agent for ScriptedAgent {
    fn entity(&self) -> EntityId {
        self.entity
    }

    fn process_sense(&mut self, _round: u32, _visible: &ChangeSet, _heard: &[Command]) {}

    fn commands(&mut self, round: u32) -> Vec<Command> {
        vec![Command::new(REPORT_URN, self.entity, round, Vec::new())]
    }
}

/// In-process simulator that sets the target's hp to `100 - round` whenever
/// it processes commands.
pub struct AttritionSimulator {
    target: EntityId,
}

impl AttritionSimulator {
    pub fn new(target: EntityId) -> Self {
        Self { target }
    }
}

impl Simulator for AttritionSimulator {
    fn name(&self) -> &str {
        "attrition"
    }

    fn process_commands(&mut self, round: u32, _commands: &[Command], changes: &mut ChangeSet) {
        changes.record_change(
            self.target,
            CIVILIAN_URN,
            Property::new(HP_URN, PropertyValue::Int(100 - round as i32)),
        );
    }
}

/// A kernel over [`base_world`] that stops after `max_rounds` rounds.
pub fn build_kernel(max_rounds: u32, score: Box<dyn ScoreFunction>) -> Kernel {
    Kernel::new(
        test_config(),
        base_world(),
        Arc::new(EntityIdGenerator::starting_at(1000)),
        KernelStrategies {
            perception: Box::new(BlindPerception),
            communication: Box::new(SilentCommunication),
            command_filter: Box::new(ChainedCommandFilter::new()),
            termination: Box::new(MaxRoundsTermination::new(max_rounds)),
            score,
            collector: Box::new(WaitAllCommandCollector),
        },
    )
    .expect("kernel construction with nolog cannot fail")
}

/// Current hp of an entity, if defined.
pub fn hp_of(kernel: &Kernel, id: EntityId) -> Option<PropertyValue> {
    kernel.with_world(|world| {
        world
            .entity(id)
            .and_then(|entity| entity.property(HP_URN))
            .and_then(|property| property.value().cloned())
    })
}
