mod common;

use std::sync::{Arc, Mutex};

use rescue_proto::{EntityId, PropertyValue};

use common::{AttritionSimulator, RecordingScore, ScriptedAgent};

/// One in-process agent controlling entity #1, one in-process simulator that
/// sets hp to 100 minus the round number, termination after round 3: the
/// loop must complete exactly 3 rounds, leave hp at 97, and invoke the score
/// function 3 times with strictly increasing round numbers.
#[test]
fn three_round_attrition_scenario() {
    common::init_tracing();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(3, Box::new(RecordingScore::new(Arc::clone(&calls))));
    kernel.add_agent(Box::new(ScriptedAgent::new(EntityId(1))));
    kernel.add_simulator(Box::new(AttritionSimulator::new(EntityId(1))));

    let mut rounds = 0;
    while !kernel.has_terminated() {
        kernel.timestep().unwrap();
        rounds += 1;
        assert!(rounds <= 10, "termination condition never triggered");
    }
    kernel.shutdown();

    assert_eq!(rounds, 3);
    assert_eq!(
        common::hp_of(&kernel, EntityId(1)),
        Some(PropertyValue::Int(97))
    );

    let calls = calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[1, 2, 3]);
    assert!(calls.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn round_counter_is_monotonic_and_previous_timestep_tracks_it() {
    common::init_tracing();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(5, Box::new(RecordingScore::new(calls)));
    kernel.add_agent(Box::new(ScriptedAgent::new(EntityId(1))));

    assert!(kernel.previous_timestep().is_none());
    for expected in 1..=4u32 {
        kernel.timestep().unwrap();
        assert_eq!(kernel.round(), expected);
        let previous = kernel.previous_timestep().unwrap();
        assert_eq!(previous.round(), expected);
        // The in-process agent's report for this round was accepted.
        assert_eq!(previous.commands().len(), 1);
        assert_eq!(previous.commands()[0].urn(), common::REPORT_URN);
        assert_eq!(previous.commands()[0].round(), expected);
    }
}

#[test]
fn scores_come_from_the_score_function() {
    common::init_tracing();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let kernel = common::build_kernel(3, Box::new(RecordingScore::new(calls)));
    kernel.add_simulator(Box::new(AttritionSimulator::new(EntityId(1))));

    assert_eq!(kernel.timestep().unwrap(), 1.0);
    assert_eq!(kernel.timestep().unwrap(), 2.0);
    let previous = kernel.previous_timestep().unwrap();
    assert_eq!(previous.score(), Some(2.0));
}
