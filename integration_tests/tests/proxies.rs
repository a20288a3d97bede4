mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::Receiver;
use rescue_kernel::{
    channel_pair, AgentProxy, ChannelConnection, Connection, KernelListener, SimulatorProxy,
};
use rescue_proto::{ChangeSet, Command, EntityId, Message, Property, PropertyValue};

use common::{RecordingScore, CIVILIAN_URN, HP_URN, REPORT_URN};

/// Remote agent process: answers every perception push with one report
/// command for that round.
fn spawn_remote_agent(
    connection: ChannelConnection,
    inbox: Receiver<Message>,
    agent: EntityId,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match inbox.recv() {
            Ok(Message::PerceptionPush { round, .. }) => {
                let response = Message::CommandResponse {
                    agent,
                    round,
                    commands: vec![Command::new(REPORT_URN, agent, round, Vec::new())],
                };
                if connection.send(&response).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    })
}

/// Remote simulator process: answers every command push with a change-set
/// produced by `delta`, and ignores merged-update pushes.
fn spawn_remote_simulator(
    name: &'static str,
    connection: ChannelConnection,
    inbox: Receiver<Message>,
    delta: impl Fn(u32) -> ChangeSet + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match inbox.recv() {
            Ok(Message::CommandPush { round, .. }) => {
                let response = Message::UpdateResponse {
                    name: name.to_string(),
                    round,
                    changes: delta(round),
                };
                if connection.send(&response).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    })
}

fn hp_change(value: i32) -> ChangeSet {
    let mut changes = ChangeSet::new();
    changes.record_change(
        EntityId(1),
        CIVILIAN_URN,
        Property::new(HP_URN, PropertyValue::Int(value)),
    );
    changes
}

#[derive(Default)]
struct RemovalListener {
    removed_simulators: Mutex<Vec<String>>,
}

impl KernelListener for RemovalListener {
    fn simulator_removed(&self, name: &str) {
        self.removed_simulators
            .lock()
            .unwrap()
            .push(name.to_string());
    }
}

#[test]
fn remote_components_run_a_full_lockstep_exchange() {
    common::init_tracing();
    let registry = common::test_registry();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(2, Box::new(RecordingScore::new(calls)));

    let ((kernel_agent_conn, kernel_agent_inbox), (agent_conn, agent_inbox)) =
        channel_pair(Arc::clone(&registry));
    spawn_remote_agent(agent_conn, agent_inbox, EntityId(1));
    kernel.add_agent_proxy(AgentProxy::new(
        "remote-agent",
        EntityId(1),
        Box::new(kernel_agent_conn),
        kernel_agent_inbox,
    ));

    let ((kernel_sim_conn, kernel_sim_inbox), (sim_conn, sim_inbox)) =
        channel_pair(Arc::clone(&registry));
    spawn_remote_simulator("collapse", sim_conn, sim_inbox, |round| {
        hp_change(100 - round as i32)
    });
    kernel.add_simulator_proxy(SimulatorProxy::new(
        "collapse",
        Box::new(kernel_sim_conn),
        kernel_sim_inbox,
    ));

    while !kernel.has_terminated() {
        kernel.timestep().unwrap();
    }

    assert_eq!(kernel.round(), 2);
    assert_eq!(
        common::hp_of(&kernel, EntityId(1)),
        Some(PropertyValue::Int(98))
    );
    let previous = kernel.previous_timestep().unwrap();
    assert_eq!(previous.commands().len(), 1);
    assert_eq!(previous.commands()[0].urn(), REPORT_URN);
    kernel.shutdown();
}

#[test]
fn later_registered_simulator_wins_conflicting_writes() {
    common::init_tracing();
    let registry = common::test_registry();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(1, Box::new(RecordingScore::new(calls)));

    let ((kernel_a_conn, kernel_a_inbox), (a_conn, a_inbox)) = channel_pair(Arc::clone(&registry));
    spawn_remote_simulator("first", a_conn, a_inbox, |_| hp_change(10));
    kernel.add_simulator_proxy(SimulatorProxy::new(
        "first",
        Box::new(kernel_a_conn),
        kernel_a_inbox,
    ));

    let ((kernel_b_conn, kernel_b_inbox), (b_conn, b_inbox)) = channel_pair(Arc::clone(&registry));
    spawn_remote_simulator("second", b_conn, b_inbox, |_| hp_change(20));
    kernel.add_simulator_proxy(SimulatorProxy::new(
        "second",
        Box::new(kernel_b_conn),
        kernel_b_inbox,
    ));

    kernel.timestep().unwrap();

    // Contributions merge in registration order, so the later simulator's
    // write is the one that lands.
    assert_eq!(
        common::hp_of(&kernel, EntityId(1)),
        Some(PropertyValue::Int(20))
    );
    kernel.shutdown();
}

#[test]
fn failed_simulator_does_not_stall_the_round() {
    common::init_tracing();
    let registry = common::test_registry();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(2, Box::new(RecordingScore::new(calls)));
    let listener = Arc::new(RemovalListener::default());
    kernel.add_listener(listener.clone());

    let ((kernel_live_conn, kernel_live_inbox), (live_conn, live_inbox)) =
        channel_pair(Arc::clone(&registry));
    spawn_remote_simulator("live", live_conn, live_inbox, |round| {
        hp_change(100 - round as i32)
    });
    kernel.add_simulator_proxy(SimulatorProxy::new(
        "live",
        Box::new(kernel_live_conn),
        kernel_live_inbox,
    ));

    // This simulator dies before answering anything.
    let ((kernel_dead_conn, kernel_dead_inbox), (dead_conn, _dead_inbox)) =
        channel_pair(Arc::clone(&registry));
    dead_conn.close();
    kernel.add_simulator_proxy(SimulatorProxy::new(
        "dead",
        Box::new(kernel_dead_conn),
        kernel_dead_inbox,
    ));

    kernel.timestep().unwrap();
    assert_eq!(
        common::hp_of(&kernel, EntityId(1)),
        Some(PropertyValue::Int(99))
    );
    assert_eq!(
        listener.removed_simulators.lock().unwrap().as_slice(),
        &["dead".to_string()]
    );

    // The exercise continues with the surviving simulator.
    kernel.timestep().unwrap();
    assert_eq!(
        common::hp_of(&kernel, EntityId(1)),
        Some(PropertyValue::Int(98))
    );
    kernel.shutdown();
}
