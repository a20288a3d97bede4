//! Pluggable strategy interfaces consumed by the round scheduler, plus the
//! structural combinators the kernel ships: filter chains, collector
//! composites and termination disjunctions. Domain strategies (line-of-sight
//! perception, radio models, scenario scoring) are implemented by the
//! exercise and registered through [`crate::registry::StrategyRegistry`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use rescue_proto::{ChangeSet, Command, Config, Entity, EntityId};

use crate::error::KernelError;
use crate::proxy::AgentProxy;
use crate::timestep::Timestep;
use crate::world::WorldModel;

/// Snapshot of the kernel state offered to strategies: the current round and
/// a read-only view of the world model.
pub struct KernelState<'a> {
    pub round: u32,
    pub world: &'a WorldModel,
}

/// Computes what a given agent may currently observe.
pub trait Perception: Send {
    fn visible(&mut self, agent: EntityId, world: &WorldModel, round: u32) -> ChangeSet;
}

/// Computes which spoken/radioed commands each entity can hear. `process` is
/// called once per round with the previous round's accepted commands, so
/// hearing in round N reflects speech from round N-1.
pub trait CommunicationModel: Send {
    fn process(&mut self, round: u32, commands: &[Command], world: &WorldModel);

    fn hearing(&self, entity: &Entity) -> Vec<Command>;
}

/// Rewrites or drops commands in place before they reach the simulators.
pub trait CommandFilter: Send {
    fn filter(&self, commands: &mut Vec<Command>, state: &KernelState<'_>);
}

/// Gathers the round's command batches from the live agent proxies. The
/// blocking policy (wait for all, wait with timeout, ...) lives here, not in
/// the round loop.
pub trait CommandCollector: Send {
    fn collect(&self, agents: &[Arc<AgentProxy>], round: u32) -> Vec<Command>;
}

/// Decides when the exercise is over.
pub trait TerminationCondition: Send {
    fn should_stop(&self, state: &KernelState<'_>) -> bool;
}

/// Scores the post-merge world at the end of each round.
pub trait ScoreFunction: Send {
    fn score(&mut self, world: &WorldModel, timestep: &Timestep) -> f64;
}

/// Applies a sequence of filters in order. Each filter sees the previous
/// filter's output.
#[derive(Default)]
pub struct ChainedCommandFilter {
    filters: Vec<Box<dyn CommandFilter>>,
}

impl ChainedCommandFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(&mut self, filter: Box<dyn CommandFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl CommandFilter for ChainedCommandFilter {
    fn filter(&self, commands: &mut Vec<Command>, state: &KernelState<'_>) {
        for filter in &self.filters {
            filter.filter(commands, state);
        }
    }
}

/// Unions the results of several collectors.
#[derive(Default)]
pub struct CompositeCommandCollector {
    collectors: Vec<Box<dyn CommandCollector>>,
}

impl CompositeCommandCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collector(&mut self, collector: Box<dyn CommandCollector>) {
        self.collectors.push(collector);
    }
}

impl CommandCollector for CompositeCommandCollector {
    fn collect(&self, agents: &[Arc<AgentProxy>], round: u32) -> Vec<Command> {
        let mut commands = Vec::new();
        for collector in &self.collectors {
            commands.extend(collector.collect(agents, round));
        }
        commands
    }
}

/// Blocks indefinitely until every live agent has answered for the round.
/// An agent whose connection closes is skipped with a warning; the round
/// proceeds without its contribution.
pub struct WaitAllCommandCollector;

impl CommandCollector for WaitAllCommandCollector {
    fn collect(&self, agents: &[Arc<AgentProxy>], round: u32) -> Vec<Command> {
        let mut commands = Vec::new();
        for agent in agents {
            match agent.wait_for_commands(round) {
                Ok(batch) => commands.extend(batch),
                Err(err) => warn!(
                    target: "rescue_kernel::collector",
                    agent = agent.name(),
                    %err,
                    "agent lost during command collection"
                ),
            }
        }
        commands
    }
}

/// Waits up to a shared deadline for each agent's batch; late agents are
/// skipped for the round.
pub struct TimedCommandCollector {
    timeout: Duration,
}

impl TimedCommandCollector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Timeout from `kernel.agents.timeout` (milliseconds).
    pub fn from_config(config: &Config) -> Result<Self, KernelError> {
        let millis = config.get_int("kernel.agents.timeout")?;
        Ok(Self::new(Duration::from_millis(millis.max(0) as u64)))
    }
}

impl CommandCollector for TimedCommandCollector {
    fn collect(&self, agents: &[Arc<AgentProxy>], round: u32) -> Vec<Command> {
        let deadline = Instant::now() + self.timeout;
        let mut commands = Vec::new();
        for agent in agents {
            match agent.wait_for_commands_until(round, deadline) {
                Ok(Some(batch)) => commands.extend(batch),
                Ok(None) => warn!(
                    target: "rescue_kernel::collector",
                    agent = agent.name(),
                    round,
                    "agent missed the command deadline"
                ),
                Err(err) => warn!(
                    target: "rescue_kernel::collector",
                    agent = agent.name(),
                    %err,
                    "agent lost during command collection"
                ),
            }
        }
        commands
    }
}

/// True as soon as any inner condition is true; false when empty.
#[derive(Default)]
pub struct OrTerminationCondition {
    conditions: Vec<Box<dyn TerminationCondition>>,
}

impl OrTerminationCondition {
    pub fn new(conditions: Vec<Box<dyn TerminationCondition>>) -> Self {
        Self { conditions }
    }
}

impl TerminationCondition for OrTerminationCondition {
    fn should_stop(&self, state: &KernelState<'_>) -> bool {
        self.conditions
            .iter()
            .any(|condition| condition.should_stop(state))
    }
}

/// Stops once the configured number of rounds has completed.
pub struct MaxRoundsTermination {
    max_rounds: u32,
}

impl MaxRoundsTermination {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    /// Round limit from `kernel.timesteps`.
    pub fn from_config(config: &Config) -> Result<Self, KernelError> {
        let rounds = config.get_int("kernel.timesteps")?;
        Ok(Self::new(rounds.max(0) as u32))
    }
}

impl TerminationCondition for MaxRoundsTermination {
    fn should_stop(&self, state: &KernelState<'_>) -> bool {
        state.round >= self.max_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropAll;

    impl CommandFilter for DropAll {
        fn filter(&self, commands: &mut Vec<Command>, _state: &KernelState<'_>) {
            commands.clear();
        }
    }

    struct KeepUrn(&'static str);

    impl CommandFilter for KeepUrn {
        fn filter(&self, commands: &mut Vec<Command>, _state: &KernelState<'_>) {
            commands.retain(|command| command.urn() == self.0);
        }
    }

    fn commands() -> Vec<Command> {
        vec![
            Command::new("urn:test:command:move", EntityId(1), 1, vec![]),
            Command::new("urn:test:command:rest", EntityId(2), 1, vec![]),
        ]
    }

    #[test]
    fn chained_filters_run_in_order() {
        let world = WorldModel::new();
        let state = KernelState {
            round: 1,
            world: &world,
        };

        let mut chain = ChainedCommandFilter::new();
        chain.add_filter(Box::new(KeepUrn("urn:test:command:move")));
        let mut batch = commands();
        chain.filter(&mut batch, &state);
        assert_eq!(batch.len(), 1);

        chain.add_filter(Box::new(DropAll));
        let mut batch = commands();
        chain.filter(&mut batch, &state);
        assert!(batch.is_empty());
    }

    #[test]
    fn or_termination_is_false_when_empty() {
        let world = WorldModel::new();
        let state = KernelState {
            round: 100,
            world: &world,
        };
        assert!(!OrTerminationCondition::default().should_stop(&state));
        let or = OrTerminationCondition::new(vec![Box::new(MaxRoundsTermination::new(3))]);
        assert!(or.should_stop(&state));
    }

    #[test]
    fn max_rounds_stops_at_the_configured_round() {
        let world = WorldModel::new();
        let termination = MaxRoundsTermination::new(3);
        assert!(!termination.should_stop(&KernelState {
            round: 2,
            world: &world,
        }));
        assert!(termination.should_stop(&KernelState {
            round: 3,
            world: &world,
        }));
    }
}
