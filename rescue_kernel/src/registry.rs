//! Startup-time strategy resolution: a configuration string names each
//! strategy implementation, resolved through an explicit registry of factory
//! functions. Registered once by the embedder before the kernel is built.

use std::collections::BTreeMap;

use rescue_proto::Config;

use crate::error::KernelError;
use crate::strategy::{
    ChainedCommandFilter, CommandCollector, CommandFilter, CommunicationModel,
    CompositeCommandCollector, OrTerminationCondition, Perception, ScoreFunction,
    TerminationCondition, WaitAllCommandCollector,
};

type Factory<T> = Box<dyn Fn(&Config) -> Result<T, KernelError> + Send + Sync>;

/// Maps strategy names to factories for each pluggable kind.
#[derive(Default)]
pub struct StrategyRegistry {
    perceptions: BTreeMap<String, Factory<Box<dyn Perception>>>,
    communications: BTreeMap<String, Factory<Box<dyn CommunicationModel>>>,
    command_filters: BTreeMap<String, Factory<Box<dyn CommandFilter>>>,
    command_collectors: BTreeMap<String, Factory<Box<dyn CommandCollector>>>,
    terminations: BTreeMap<String, Factory<Box<dyn TerminationCondition>>>,
    scores: BTreeMap<String, Factory<Box<dyn ScoreFunction>>>,
}

macro_rules! strategy_kind {
    ($register:ident, $create:ident, $field:ident, $trait_object:ty, $kind:literal) => {
        pub fn $register<F>(&mut self, name: impl Into<String>, factory: F)
        where
            F: Fn(&Config) -> Result<$trait_object, KernelError> + Send + Sync + 'static,
        {
            self.$field.insert(name.into(), Box::new(factory));
        }

        pub fn $create(&self, name: &str, config: &Config) -> Result<$trait_object, KernelError> {
            match self.$field.get(name) {
                Some(factory) => factory(config),
                None => Err(KernelError::UnknownStrategy {
                    kind: $kind,
                    name: name.to_string(),
                }),
            }
        }
    };
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    strategy_kind!(
        register_perception,
        create_perception,
        perceptions,
        Box<dyn Perception>,
        "perception"
    );
    strategy_kind!(
        register_communication,
        create_communication,
        communications,
        Box<dyn CommunicationModel>,
        "communication model"
    );
    strategy_kind!(
        register_command_filter,
        create_command_filter,
        command_filters,
        Box<dyn CommandFilter>,
        "command filter"
    );
    strategy_kind!(
        register_command_collector,
        create_command_collector,
        command_collectors,
        Box<dyn CommandCollector>,
        "command collector"
    );
    strategy_kind!(
        register_termination,
        create_termination,
        terminations,
        Box<dyn TerminationCondition>,
        "termination condition"
    );
    strategy_kind!(
        register_score,
        create_score,
        scores,
        Box<dyn ScoreFunction>,
        "score function"
    );

    /// Build the perception strategy named by `kernel.perception`.
    pub fn perception(&self, config: &Config) -> Result<Box<dyn Perception>, KernelError> {
        self.create_perception(config.value("kernel.perception")?, config)
    }

    /// Build the communication model named by `kernel.communication`.
    pub fn communication(
        &self,
        config: &Config,
    ) -> Result<Box<dyn CommunicationModel>, KernelError> {
        self.create_communication(config.value("kernel.communication")?, config)
    }

    /// Build the score function named by `kernel.score`.
    pub fn score(&self, config: &Config) -> Result<Box<dyn ScoreFunction>, KernelError> {
        self.create_score(config.value("kernel.score")?, config)
    }

    /// Build the filter chain named by `kernel.commandfilters`.
    pub fn command_filter_chain(
        &self,
        config: &Config,
    ) -> Result<ChainedCommandFilter, KernelError> {
        let mut chain = ChainedCommandFilter::new();
        for name in config.get_array("kernel.commandfilters") {
            chain.add_filter(self.create_command_filter(&name, config)?);
        }
        Ok(chain)
    }

    /// Build the termination disjunction named by `kernel.termination`.
    pub fn termination(&self, config: &Config) -> Result<Box<dyn TerminationCondition>, KernelError> {
        let names = config.get_array("kernel.termination");
        let mut conditions = Vec::with_capacity(names.len());
        for name in names {
            conditions.push(self.create_termination(&name, config)?);
        }
        Ok(Box::new(OrTerminationCondition::new(conditions)))
    }

    /// Build the collector named by `kernel.commandcollectors`: one name is
    /// used directly, several compose, none falls back to waiting for every
    /// agent.
    pub fn command_collector(
        &self,
        config: &Config,
    ) -> Result<Box<dyn CommandCollector>, KernelError> {
        let names = config.get_array("kernel.commandcollectors");
        match names.as_slice() {
            [] => Ok(Box::new(WaitAllCommandCollector)),
            [single] => self.create_command_collector(single, config),
            many => {
                let mut composite = CompositeCommandCollector::new();
                for name in many {
                    composite.add_collector(self.create_command_collector(name, config)?);
                }
                Ok(Box::new(composite))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MaxRoundsTermination;
    use crate::world::WorldModel;

    #[test]
    fn unknown_strategy_names_are_rejected() {
        let registry = StrategyRegistry::new();
        let config = Config::new();
        assert!(matches!(
            registry.create_perception("missing", &config),
            Err(KernelError::UnknownStrategy {
                kind: "perception",
                ..
            })
        ));
    }

    #[test]
    fn termination_disjunction_is_built_from_config() {
        let mut registry = StrategyRegistry::new();
        registry.register_termination("max-rounds", |config| {
            let condition = MaxRoundsTermination::from_config(config)?;
            Ok(Box::new(condition) as Box<dyn TerminationCondition>)
        });

        let mut config = Config::new();
        config.set_value("kernel.termination", "max-rounds");
        config.set_value("kernel.timesteps", "2");

        let termination = registry.termination(&config).unwrap();
        let world = WorldModel::new();
        assert!(termination.should_stop(&crate::strategy::KernelState {
            round: 2,
            world: &world,
        }));
    }

    #[test]
    fn empty_collector_config_waits_for_all() {
        let registry = StrategyRegistry::new();
        let config = Config::new();
        // Just ensure the fallback resolves; its policy is exercised in the
        // kernel integration tests.
        registry.command_collector(&config).unwrap();
    }
}
