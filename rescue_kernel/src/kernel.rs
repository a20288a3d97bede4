//! The round scheduler: drives perception, command collection, simulation,
//! merge, broadcast and scoring for one lockstep round at a time.
//!
//! One mutex around the round state is the single logical round lock — no
//! two rounds overlap, and every mutation of the world model and the
//! previous-timestep reference happens while it is held. Proxy and listener
//! collections have their own locks and are snapshotted at the start of each
//! phase that iterates them, so components may connect and disconnect while
//! a round is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use rescue_proto::{ChangeSet, Command, Config, EntityIdGenerator};

use crate::component::{Agent, Simulator, Viewer};
use crate::error::KernelError;
use crate::listener::KernelListener;
use crate::log::{LogRecord, LogWriter};
use crate::proxy::{AgentProxy, SimulatorProxy, ViewerProxy};
use crate::strategy::{
    CommandCollector, CommandFilter, CommunicationModel, KernelState, Perception, ScoreFunction,
    TerminationCondition,
};
use crate::timestep::Timestep;
use crate::world::WorldModel;

const KERNEL_TARGET: &str = "rescue_kernel::kernel";
const ROUND_TARGET: &str = "rescue_kernel::round";

/// The pluggable strategies a kernel is built with.
pub struct KernelStrategies {
    pub perception: Box<dyn Perception>,
    pub communication: Box<dyn CommunicationModel>,
    pub command_filter: Box<dyn CommandFilter>,
    pub termination: Box<dyn TerminationCondition>,
    pub score: Box<dyn ScoreFunction>,
    pub collector: Box<dyn CommandCollector>,
}

/// Signals cooperative cancellation of the current round. The round loop
/// checks it at phase boundaries; an interrupted round aborts cleanly before
/// any world-model mutation.
#[derive(Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct KernelInner {
    config: Config,
    perception: Box<dyn Perception>,
    communication: Box<dyn CommunicationModel>,
    command_filter: Box<dyn CommandFilter>,
    termination: Box<dyn TerminationCondition>,
    score: Box<dyn ScoreFunction>,
    collector: Box<dyn CommandCollector>,
    world: WorldModel,
    log: Option<LogWriter>,
    round: u32,
    previous: Option<Arc<Timestep>>,
    shutdown: bool,
    agents: Vec<Box<dyn Agent>>,
    simulators: Vec<Box<dyn Simulator>>,
    viewers: Vec<Box<dyn Viewer>>,
}

/// The disaster-exercise coordination kernel.
pub struct Kernel {
    inner: Mutex<KernelInner>,
    agent_proxies: Mutex<Vec<Arc<AgentProxy>>>,
    simulator_proxies: Mutex<Vec<Arc<SimulatorProxy>>>,
    viewer_proxies: Mutex<Vec<Arc<ViewerProxy>>>,
    listeners: Mutex<Vec<Arc<dyn KernelListener>>>,
    interrupt: Arc<AtomicBool>,
    id_generator: Arc<EntityIdGenerator>,
}

impl Kernel {
    /// Construct a kernel. Opens the simulation log (unless `nolog` is set)
    /// and writes the start, initial-conditions and config records; failure
    /// to open the log refuses to start the kernel.
    pub fn new(
        config: Config,
        world: WorldModel,
        id_generator: Arc<EntityIdGenerator>,
        strategies: KernelStrategies,
    ) -> Result<Self, KernelError> {
        let log = if config.get_bool_or("nolog", false) {
            None
        } else {
            let path = config.value("kernel.logname")?.to_string();
            let mut writer = LogWriter::create(std::path::Path::new(&path))?;
            writer.write_record(&LogRecord::Start)?;
            writer.write_record(&LogRecord::InitialConditions(&world))?;
            writer.write_record(&LogRecord::Config(&config))?;
            info!(target: KERNEL_TARGET, path = %path, "logging simulation to file");
            Some(writer)
        };

        info!(
            target: KERNEL_TARGET,
            entities = world.len(),
            "kernel initialised"
        );

        Ok(Self {
            inner: Mutex::new(KernelInner {
                config,
                perception: strategies.perception,
                communication: strategies.communication,
                command_filter: strategies.command_filter,
                termination: strategies.termination,
                score: strategies.score,
                collector: strategies.collector,
                world,
                log,
                round: 0,
                previous: None,
                shutdown: false,
                agents: Vec::new(),
                simulators: Vec::new(),
                viewers: Vec::new(),
            }),
            agent_proxies: Mutex::new(Vec::new()),
            simulator_proxies: Mutex::new(Vec::new()),
            viewer_proxies: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            id_generator,
        })
    }

    pub fn id_generator(&self) -> &Arc<EntityIdGenerator> {
        &self.id_generator
    }

    /// A copy of the kernel's configuration.
    pub fn config(&self) -> Config {
        self.inner
            .lock()
            .expect("kernel state mutex poisoned")
            .config
            .clone()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    pub fn round(&self) -> u32 {
        self.inner.lock().expect("kernel state mutex poisoned").round
    }

    /// Read-only access to the world model, under the round lock.
    pub fn with_world<R>(&self, f: impl FnOnce(&WorldModel) -> R) -> R {
        let inner = self.inner.lock().expect("kernel state mutex poisoned");
        f(&inner.world)
    }

    /// The most recently completed timestep.
    pub fn previous_timestep(&self) -> Option<Arc<Timestep>> {
        self.inner
            .lock()
            .expect("kernel state mutex poisoned")
            .previous
            .clone()
    }

    /// True once shutdown was requested or the termination condition holds.
    pub fn has_terminated(&self) -> bool {
        let inner = self.inner.lock().expect("kernel state mutex poisoned");
        inner.shutdown
            || inner.termination.should_stop(&KernelState {
                round: inner.round,
                world: &inner.world,
            })
    }

    pub fn add_listener(&self, listener: Arc<dyn KernelListener>) {
        self.listeners
            .lock()
            .expect("kernel listeners mutex poisoned")
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn KernelListener>) {
        self.listeners
            .lock()
            .expect("kernel listeners mutex poisoned")
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    pub fn add_agent_proxy(&self, proxy: AgentProxy) -> Arc<AgentProxy> {
        let proxy = Arc::new(proxy);
        self.agent_proxies
            .lock()
            .expect("agent proxies mutex poisoned")
            .push(Arc::clone(&proxy));
        self.fire(|listener| listener.agent_added(proxy.name(), proxy.entity()));
        proxy
    }

    pub fn remove_agent_proxy(&self, proxy: &Arc<AgentProxy>) {
        let mut guard = self
            .agent_proxies
            .lock()
            .expect("agent proxies mutex poisoned");
        let before = guard.len();
        guard.retain(|existing| !Arc::ptr_eq(existing, proxy));
        let removed = guard.len() != before;
        drop(guard);
        if removed {
            proxy.shutdown();
            self.fire(|listener| listener.agent_removed(proxy.name(), proxy.entity()));
        }
    }

    pub fn add_simulator_proxy(&self, proxy: SimulatorProxy) -> Arc<SimulatorProxy> {
        let proxy = Arc::new(proxy);
        self.simulator_proxies
            .lock()
            .expect("simulator proxies mutex poisoned")
            .push(Arc::clone(&proxy));
        self.fire(|listener| listener.simulator_added(proxy.name()));
        proxy
    }

    pub fn remove_simulator_proxy(&self, proxy: &Arc<SimulatorProxy>) {
        let mut guard = self
            .simulator_proxies
            .lock()
            .expect("simulator proxies mutex poisoned");
        let before = guard.len();
        guard.retain(|existing| !Arc::ptr_eq(existing, proxy));
        let removed = guard.len() != before;
        drop(guard);
        if removed {
            proxy.shutdown();
            self.fire(|listener| listener.simulator_removed(proxy.name()));
        }
    }

    pub fn add_viewer_proxy(&self, proxy: ViewerProxy) -> Arc<ViewerProxy> {
        let proxy = Arc::new(proxy);
        self.viewer_proxies
            .lock()
            .expect("viewer proxies mutex poisoned")
            .push(Arc::clone(&proxy));
        self.fire(|listener| listener.viewer_added(proxy.name()));
        proxy
    }

    pub fn remove_viewer_proxy(&self, proxy: &Arc<ViewerProxy>) {
        let mut guard = self
            .viewer_proxies
            .lock()
            .expect("viewer proxies mutex poisoned");
        let before = guard.len();
        guard.retain(|existing| !Arc::ptr_eq(existing, proxy));
        let removed = guard.len() != before;
        drop(guard);
        if removed {
            proxy.shutdown();
            self.fire(|listener| listener.viewer_removed(proxy.name()));
        }
    }

    /// Register an in-process agent. Agents run in entity-id order so every
    /// run perceives them deterministically.
    pub fn add_agent(&self, agent: Box<dyn Agent>) {
        let mut inner = self.inner.lock().expect("kernel state mutex poisoned");
        inner.agents.push(agent);
        inner.agents.sort_by_key(|agent| agent.entity());
    }

    /// Register an in-process simulator; contribution order is registration
    /// order.
    pub fn add_simulator(&self, simulator: Box<dyn Simulator>) {
        let mut inner = self.inner.lock().expect("kernel state mutex poisoned");
        inner.simulators.push(simulator);
    }

    pub fn add_viewer(&self, viewer: Box<dyn Viewer>) {
        let mut inner = self.inner.lock().expect("kernel state mutex poisoned");
        inner.viewers.push(viewer);
    }

    /// Run a single round. Returns the round's score, or zero without side
    /// effects once the kernel has shut down.
    pub fn timestep(&self) -> Result<f64, KernelError> {
        let mut inner = self.inner.lock().expect("kernel state mutex poisoned");
        let inner = &mut *inner;

        if inner.round == 0 {
            self.fire(|listener| listener.simulation_started());
        }
        if inner.shutdown {
            return Ok(0.0);
        }

        inner.round += 1;
        let round = inner.round;
        let mut timestep = Timestep::new(round);
        info!(target: ROUND_TARGET, round, "timestep started");
        let start = Instant::now();

        let previous_commands: Vec<Command> = inner
            .previous
            .as_ref()
            .map(|timestep| timestep.commands().to_vec())
            .unwrap_or_default();
        self.send_agent_updates(inner, &mut timestep, &previous_commands)?;
        let perception_done = Instant::now();

        debug!(target: ROUND_TARGET, round, "waiting for commands");
        let commands = self.wait_for_commands(inner, round)?;
        timestep.set_commands(commands);
        if let Some(log) = inner.log.as_mut() {
            log.write_record(&LogRecord::Commands {
                round,
                commands: timestep.commands(),
            })?;
        }
        let commands_done = Instant::now();

        debug!(target: ROUND_TARGET, round, "broadcasting commands");
        let changes = self.send_commands_to_simulators(inner, round, timestep.commands())?;
        timestep.set_changes(changes);
        if let Some(log) = inner.log.as_mut() {
            log.write_record(&LogRecord::Updates {
                round,
                changes: timestep.changes(),
            })?;
        }
        let updates_done = Instant::now();

        self.check_interrupt()?;
        inner.world.merge(timestep.changes());
        let merge_done = Instant::now();

        debug!(target: ROUND_TARGET, round, "broadcasting updates");
        self.send_updates_to_simulators(inner, round, timestep.changes());
        self.send_to_viewers(inner, &timestep);
        let broadcast_done = Instant::now();

        debug!(target: ROUND_TARGET, round, "computing score");
        let score = inner.score.score(&inner.world, &timestep);
        timestep.set_score(score);
        let score_done = Instant::now();

        info!(
            target: ROUND_TARGET,
            round,
            score,
            world_hash = inner.world.digest(),
            "timestep complete"
        );
        debug!(
            target: ROUND_TARGET,
            round,
            perception_ms = elapsed_ms(start, perception_done),
            commands_ms = elapsed_ms(perception_done, commands_done),
            updates_ms = elapsed_ms(commands_done, updates_done),
            merge_ms = elapsed_ms(updates_done, merge_done),
            broadcast_ms = elapsed_ms(merge_done, broadcast_done),
            score_ms = elapsed_ms(broadcast_done, score_done),
            total_ms = elapsed_ms(start, score_done),
            "round timing"
        );

        let completed = Arc::new(timestep);
        self.fire(|listener| listener.timestep_completed(&completed));
        inner.previous = Some(completed);

        self.sweep_closed_proxies();
        Ok(score)
    }

    /// Shut down the kernel: every proxy is shut down in isolation, the log
    /// is terminated and closed, and listeners are notified exactly once.
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("kernel state mutex poisoned");
        if inner.shutdown {
            return;
        }
        info!(target: KERNEL_TARGET, "kernel is shutting down");
        for proxy in self.agent_proxy_snapshot() {
            proxy.shutdown();
        }
        for proxy in self.simulator_proxy_snapshot() {
            proxy.shutdown();
        }
        for proxy in self.viewer_proxy_snapshot() {
            proxy.shutdown();
        }
        if let Some(log) = inner.log.as_mut() {
            if let Err(err) = log.write_record(&LogRecord::End) {
                warn!(target: KERNEL_TARGET, %err, "error terminating log");
            }
            if let Err(err) = log.close() {
                warn!(target: KERNEL_TARGET, %err, "error closing log");
            }
        }
        inner.log = None;
        inner.shutdown = true;
        info!(target: KERNEL_TARGET, "kernel has shut down");
        drop(inner);
        self.fire(|listener| listener.simulation_ended());
    }

    fn check_interrupt(&self) -> Result<(), KernelError> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            Err(KernelError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn agent_proxy_snapshot(&self) -> Vec<Arc<AgentProxy>> {
        self.agent_proxies
            .lock()
            .expect("agent proxies mutex poisoned")
            .clone()
    }

    fn simulator_proxy_snapshot(&self) -> Vec<Arc<SimulatorProxy>> {
        self.simulator_proxies
            .lock()
            .expect("simulator proxies mutex poisoned")
            .clone()
    }

    fn viewer_proxy_snapshot(&self) -> Vec<Arc<ViewerProxy>> {
        self.viewer_proxies
            .lock()
            .expect("viewer proxies mutex poisoned")
            .clone()
    }

    fn fire(&self, notify: impl Fn(&dyn KernelListener)) {
        let snapshot: Vec<Arc<dyn KernelListener>> = self
            .listeners
            .lock()
            .expect("kernel listeners mutex poisoned")
            .clone();
        for listener in snapshot {
            notify(listener.as_ref());
        }
    }

    /// Perception phase: process last round's commands through the
    /// communication model, then show each live agent what it can see and
    /// hear.
    fn send_agent_updates(
        &self,
        inner: &mut KernelInner,
        timestep: &mut Timestep,
        previous_commands: &[Command],
    ) -> Result<(), KernelError> {
        let round = timestep.round();
        inner
            .communication
            .process(round, previous_commands, &inner.world);

        for proxy in self.agent_proxy_snapshot() {
            self.check_interrupt()?;
            let visible = inner.perception.visible(proxy.entity(), &inner.world, round);
            let heard = match inner.world.entity(proxy.entity()) {
                Some(entity) => inner.communication.hearing(entity),
                None => Vec::new(),
            };
            if let Some(log) = inner.log.as_mut() {
                log.write_record(&LogRecord::Perception {
                    round,
                    agent: proxy.entity(),
                    visible: &visible,
                    heard: &heard,
                })?;
            }
            if let Err(err) = proxy.send_perception_update(round, &visible, &heard) {
                warn!(
                    target: ROUND_TARGET,
                    agent = proxy.name(),
                    %err,
                    "failed to push perception"
                );
            }
            timestep.register_perception(proxy.entity(), visible, heard);
        }

        for agent in inner.agents.iter_mut() {
            self.check_interrupt()?;
            let id = agent.entity();
            let visible = inner.perception.visible(id, &inner.world, round);
            let heard = match inner.world.entity(id) {
                Some(entity) => inner.communication.hearing(entity),
                None => Vec::new(),
            };
            if let Some(log) = inner.log.as_mut() {
                log.write_record(&LogRecord::Perception {
                    round,
                    agent: id,
                    visible: &visible,
                    heard: &heard,
                })?;
            }
            agent.process_sense(round, &visible, &heard);
            timestep.register_perception(id, visible, heard);
        }
        Ok(())
    }

    /// Command collection phase: gather proxy batches through the pluggable
    /// collector, union in-process agents' commands, then run the filter
    /// chain.
    fn wait_for_commands(
        &self,
        inner: &mut KernelInner,
        round: u32,
    ) -> Result<Vec<Command>, KernelError> {
        let proxies = self.agent_proxy_snapshot();
        let mut commands = inner.collector.collect(&proxies, round);
        for agent in inner.agents.iter_mut() {
            commands.extend(agent.commands(round));
        }
        debug!(target: ROUND_TARGET, round, commands = ?commands, "raw commands");
        let state = KernelState {
            round,
            world: &inner.world,
        };
        inner.command_filter.filter(&mut commands, &state);
        debug!(target: ROUND_TARGET, round, commands = ?commands, "filtered commands");
        Ok(commands)
    }

    /// Simulation phase: push the accepted commands to every simulator, then
    /// collect and merge their change-sets in a fixed deterministic order —
    /// proxies in registration order first, then in-process simulators in
    /// registration order. A lost simulator is logged and skipped.
    fn send_commands_to_simulators(
        &self,
        inner: &mut KernelInner,
        round: u32,
        commands: &[Command],
    ) -> Result<ChangeSet, KernelError> {
        let proxies = self.simulator_proxy_snapshot();
        for proxy in &proxies {
            if let Err(err) = proxy.send_agent_commands(round, commands) {
                warn!(
                    target: ROUND_TARGET,
                    simulator = proxy.name(),
                    %err,
                    "failed to push commands"
                );
            }
        }

        let mut result = ChangeSet::new();
        for proxy in &proxies {
            self.check_interrupt()?;
            debug!(target: ROUND_TARGET, simulator = proxy.name(), "fetching updates");
            match proxy.get_updates(round) {
                Ok(changes) => result.merge(&changes),
                Err(err) => warn!(
                    target: ROUND_TARGET,
                    simulator = proxy.name(),
                    %err,
                    "simulator lost mid-round, continuing without its contribution"
                ),
            }
        }

        for simulator in inner.simulators.iter_mut() {
            self.check_interrupt()?;
            let mut changes = ChangeSet::new();
            simulator.process_commands(round, commands, &mut changes);
            result.merge(&changes);
        }

        debug!(
            target: ROUND_TARGET,
            round,
            changed = result.changed_entity_count(),
            deleted = result.deleted_entity_count(),
            "combined round change-set"
        );
        Ok(result)
    }

    /// Broadcast phase, simulator half: every simulator receives the merged
    /// change-set for its own bookkeeping.
    fn send_updates_to_simulators(&self, inner: &mut KernelInner, round: u32, changes: &ChangeSet) {
        for proxy in self.simulator_proxy_snapshot() {
            if let Err(err) = proxy.send_update(round, changes) {
                warn!(
                    target: ROUND_TARGET,
                    simulator = proxy.name(),
                    %err,
                    "failed to push merged update"
                );
            }
        }
        for simulator in inner.simulators.iter_mut() {
            simulator.handle_update(round, changes);
        }
    }

    /// Broadcast phase, viewer half: every viewer receives the completed
    /// timestep.
    fn send_to_viewers(&self, inner: &mut KernelInner, timestep: &Timestep) {
        for proxy in self.viewer_proxy_snapshot() {
            if let Err(err) = proxy.send_timestep(timestep) {
                warn!(
                    target: ROUND_TARGET,
                    viewer = proxy.name(),
                    %err,
                    "failed to push timestep"
                );
            }
        }
        for viewer in inner.viewers.iter_mut() {
            viewer.handle_timestep(timestep);
        }
    }

    /// Drop proxies whose connections died during the round and notify
    /// listeners of each removal.
    fn sweep_closed_proxies(&self) {
        let mut removed_agents = Vec::new();
        {
            let mut guard = self
                .agent_proxies
                .lock()
                .expect("agent proxies mutex poisoned");
            guard.retain(|proxy| {
                if proxy.is_closed() {
                    removed_agents.push(Arc::clone(proxy));
                    false
                } else {
                    true
                }
            });
        }
        for proxy in removed_agents {
            info!(target: KERNEL_TARGET, agent = proxy.name(), "removing dead agent proxy");
            self.fire(|listener| listener.agent_removed(proxy.name(), proxy.entity()));
        }

        let mut removed_simulators = Vec::new();
        {
            let mut guard = self
                .simulator_proxies
                .lock()
                .expect("simulator proxies mutex poisoned");
            guard.retain(|proxy| {
                if proxy.is_closed() {
                    removed_simulators.push(Arc::clone(proxy));
                    false
                } else {
                    true
                }
            });
        }
        for proxy in removed_simulators {
            info!(
                target: KERNEL_TARGET,
                simulator = proxy.name(),
                "removing dead simulator proxy"
            );
            self.fire(|listener| listener.simulator_removed(proxy.name()));
        }

        let mut removed_viewers = Vec::new();
        {
            let mut guard = self
                .viewer_proxies
                .lock()
                .expect("viewer proxies mutex poisoned");
            guard.retain(|proxy| {
                if proxy.is_closed() {
                    removed_viewers.push(Arc::clone(proxy));
                    false
                } else {
                    true
                }
            });
        }
        for proxy in removed_viewers {
            info!(target: KERNEL_TARGET, viewer = proxy.name(), "removing dead viewer proxy");
            self.fire(|listener| listener.viewer_removed(proxy.name()));
        }
    }
}

fn elapsed_ms(from: Instant, to: Instant) -> u64 {
    to.duration_since(from).as_millis() as u64
}
