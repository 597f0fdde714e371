//! Integration tests for the atomic simulation protocol.
//!
//! These tests drive single models through [`AtomicSimulator`] and a
//! [`RootCoordinator`] and check:
//! - confluent transitions follow the model's declared policy
//! - a custom policy without a confluent transition is a protocol violation
//! - run parameters reach the model before the start
//! - transition times never decrease

use parking_lot::Mutex;
use std::sync::Arc;

use cyphy::coupled::{Architecture, AtomicModelDescriptor};
use cyphy::models::{transition_log, PeriodicModel, PeriodicSettings};
use cyphy::simulator::TransitionKind;
use cyphy::{
    AtomicModel, AtomicSimulator, ConfluentPolicy, Event, EventType, ModelDeclaration, RunParameters, SimDuration,
    SimTime, TimeUnit,
};

const PING: EventType = EventType::new("Ping");
const PONG: EventType = EventType::new("Pong");

// ============================================================================
// Test Models
// ============================================================================

/// Emits Pong every period and records the order of its transitions.
struct Recorder {
    uri: String,
    period: f64,
    policy: ConfluentPolicy,
    journal: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new(policy: ConfluentPolicy) -> (Self, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            uri: "recorder".to_string(),
            period: 2.0,
            policy,
            journal: Arc::clone(&journal),
        };
        (model, journal)
    }
}

impl AtomicModel for Recorder {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        ModelDeclaration::new()
            .with_imported_event(PING)
            .with_exported_event(PONG)
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.journal.lock().clear();
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::seconds(self.period)
    }

    fn output(&mut self, now: SimTime) -> Vec<Event> {
        vec![Event::signal(PONG, now)]
    }

    fn internal_transition(&mut self, now: SimTime) {
        self.journal.lock().push(format!("internal@{}", now.value()));
    }

    fn external_transition(&mut self, now: SimTime, elapsed: SimDuration, _events: Vec<Event>) {
        self.journal
            .lock()
            .push(format!("external@{}+{}", now.value(), elapsed.value()));
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        self.policy
    }
}

fn confluent_at_two(policy: ConfluentPolicy) -> (AtomicSimulator, Arc<Mutex<Vec<String>>>) {
    let (model, journal) = Recorder::new(policy);
    let mut sim = AtomicSimulator::new(Box::new(model), TimeUnit::Seconds);
    sim.initialise(SimTime::seconds(0.0)).unwrap();
    sim.store_input(vec![Event::signal(PING, SimTime::seconds(2.0))]).unwrap();
    sim.produce_output(SimTime::seconds(2.0)).unwrap();
    (sim, journal)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_external_then_internal() {
    let (mut sim, journal) = confluent_at_two(ConfluentPolicy::ExternalThenInternal);
    sim.confluent_transition(SimTime::seconds(2.0)).unwrap();
    assert_eq!(*journal.lock(), vec!["external@2+2", "internal@2"]);
    assert_eq!(sim.last_transition(), Some(TransitionKind::Confluent));
    assert_eq!(sim.time_of_next_event(), SimTime::seconds(4.0));
}

#[test]
fn test_internal_then_external() {
    let (mut sim, journal) = confluent_at_two(ConfluentPolicy::InternalThenExternal);
    sim.confluent_transition(SimTime::seconds(2.0)).unwrap();
    assert_eq!(*journal.lock(), vec!["internal@2", "external@2+0"]);
}

#[test]
fn test_transition_dispatches_to_confluent() {
    let (mut sim, journal) = confluent_at_two(ConfluentPolicy::ExternalThenInternal);
    sim.transition(SimTime::seconds(2.0)).unwrap();
    assert_eq!(journal.lock().len(), 2);
    assert_eq!(sim.stats().confluent, 1);
    assert!(!sim.has_pending_input());
}

#[test]
fn test_custom_policy_without_transition_is_violation() {
    let (mut sim, journal) = confluent_at_two(ConfluentPolicy::Custom);
    let err = sim.confluent_transition(SimTime::seconds(2.0)).unwrap_err();
    assert!(err.is_protocol());
    assert!(journal.lock().is_empty());
}

#[test]
fn test_custom_policy_reset_wins() {
    let settings = PeriodicSettings::new(3.0)
        .with_reset("Reset")
        .with_confluent(ConfluentPolicy::Custom);
    let mut sim = AtomicSimulator::new(Box::new(PeriodicModel::new("clock", settings)), TimeUnit::Seconds);
    sim.initialise(SimTime::seconds(0.0)).unwrap();
    sim.store_input(vec![Event::signal(EventType::new("Reset"), SimTime::seconds(3.0))])
        .unwrap();
    assert_eq!(sim.produce_output(SimTime::seconds(3.0)).unwrap().len(), 1);
    sim.transition(SimTime::seconds(3.0)).unwrap();
    assert_eq!(sim.time_of_next_event(), SimTime::seconds(6.0));

    let report = sim.terminate(SimTime::seconds(4.0)).unwrap();
    assert_eq!(report.body["ticks"], 1);
    assert_eq!(report.body["resets"], 1);
}

#[test]
fn test_run_parameters_override_settings() {
    let settings = PeriodicSettings::new(3.0);
    let declaration = PeriodicModel::new("clock", settings.clone()).declaration();
    let descriptor = AtomicModelDescriptor::new("clock", declaration, move |uri| {
        Box::new(PeriodicModel::new(uri, settings.clone()))
    });
    let arch = Architecture::new("clock", vec![descriptor], vec![], TimeUnit::Seconds).unwrap();

    let mut coordinator = arch.coordinator().unwrap();
    coordinator
        .set_run_parameters(&RunParameters::new().with("clock", "period", 2.0))
        .unwrap();
    let report = coordinator
        .run(SimTime::seconds(0.0), SimDuration::seconds(9.0))
        .unwrap();
    assert_eq!(report.body["ticks"], 4);
    assert_eq!(coordinator.emitted_events().len(), 4);
}

#[test]
fn test_invalid_run_parameter_rejected() {
    let settings = PeriodicSettings::new(3.0);
    let mut sim = AtomicSimulator::new(Box::new(PeriodicModel::new("clock", settings)), TimeUnit::Seconds);
    let params = RunParameters::new().with("clock", "period", "fast");
    let err = sim.set_run_parameters(&params).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_transition_times_never_decrease() {
    let log = transition_log();
    let clock = PeriodicModel::new("clock", PeriodicSettings::new(0.5).with_reset("Reset")).with_log(log.clone());
    let mut sim = AtomicSimulator::new(Box::new(clock), TimeUnit::Seconds);
    sim.initialise(SimTime::seconds(0.0)).unwrap();

    for _ in 0..5 {
        let t = sim.time_of_next_event();
        sim.produce_output(t).unwrap();
        sim.internal_transition(t).unwrap();
    }
    sim.store_input(vec![Event::signal(EventType::new("Reset"), SimTime::seconds(2.7))])
        .unwrap();
    sim.external_transition(SimTime::seconds(2.7)).unwrap();

    // Going back before the last event is refused.
    sim.store_input(vec![Event::signal(EventType::new("Reset"), SimTime::seconds(1.0))])
        .unwrap();
    assert!(sim.external_transition(SimTime::seconds(1.0)).unwrap_err().is_protocol());

    let records = log.lock();
    assert_eq!(records.len(), 6);
    assert!(records.windows(2).all(|w| w[0].time <= w[1].time));
    assert_eq!(records.last().map(|r| r.kind), Some(TransitionKind::External));
}
