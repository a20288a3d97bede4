use rescue_proto::EntityId;

use crate::timestep::Timestep;

/// Fire-and-forget kernel notifications. All methods default to no-ops so a
/// listener implements only what it cares about; notification order across
/// listeners is not guaranteed. Notifications may be delivered while the
/// kernel's round lock is held, so listeners must not call back into the
/// kernel.
pub trait KernelListener: Send + Sync {
    fn simulation_started(&self) {}

    fn timestep_completed(&self, _timestep: &Timestep) {}

    fn simulation_ended(&self) {}

    fn agent_added(&self, _name: &str, _entity: EntityId) {}

    fn agent_removed(&self, _name: &str, _entity: EntityId) {}

    fn simulator_added(&self, _name: &str) {}

    fn simulator_removed(&self, _name: &str) {}

    fn viewer_added(&self, _name: &str) {}

    fn viewer_removed(&self, _name: &str) {}
}
