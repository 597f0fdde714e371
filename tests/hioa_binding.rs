//! Integration tests for continuous variables shared between models.
//!
//! These tests check that importers share the exporter's placeholder rather
//! than a copy, that causal bindings refresh the exporter before a read,
//! that causal cycles are rejected up front, and that variable
//! initialisation runs to a fixpoint across dependent models.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cyphy::coupled::{Architecture, AtomicModelDescriptor, CoupledModelDescriptor, VariableSink, VariableSource};
use cyphy::models::{RampModel, RampSettings, SamplerModel, SamplerSettings};
use cyphy::{
    AtomicModel, ConfigurationError, ConfluentPolicy, ManualScheduler, ModelDeclaration, RtSimulation,
    SharedValue, SimDuration, SimError, SimResult, SimTime, TimeUnit, ValueReader, VarType,
};

// ============================================================================
// Test Models
// ============================================================================

type Slot<T> = Arc<Mutex<Option<ValueReader<T>>>>;

/// Imports `level` (declared f64) and keeps a reader of type `T` on it.
struct Recorder<T> {
    uri: String,
    slot: Slot<T>,
}

impl<T> AtomicModel for Recorder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        ModelDeclaration::new().with_imported_variable("level", VarType::of::<f64>())
    }

    fn initialise_state(&mut self, _start: SimTime) {}

    fn time_advance(&self) -> SimDuration {
        SimDuration::infinity(TimeUnit::Seconds)
    }

    fn internal_transition(&mut self, _now: SimTime) {}

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::ExternalThenInternal
    }

    fn bind_imported_value(&mut self, name: &str, value: SharedValue) -> SimResult<()> {
        *self.slot.lock() = Some(value.reader::<T>(&self.uri, name)?);
        Ok(())
    }
}

fn recorder<T>(uri: &str) -> (AtomicModelDescriptor, Slot<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let slot: Slot<T> = Arc::new(Mutex::new(None));
    let declaration = Recorder::<T> {
        uri: uri.to_string(),
        slot: Arc::new(Mutex::new(None)),
    }
    .declaration();
    let shared = Arc::clone(&slot);
    let descriptor = AtomicModelDescriptor::new(uri, declaration, move |u| {
        Box::new(Recorder {
            uri: u.to_string(),
            slot: Arc::clone(&shared),
        })
    });
    (descriptor, slot)
}

// ============================================================================
// Helpers
// ============================================================================

fn f64_type() -> VarType {
    VarType::of::<f64>()
}

fn ramp(settings: RampSettings) -> AtomicModelDescriptor {
    let declaration = RampModel::new("ramp", settings.clone()).declaration();
    AtomicModelDescriptor::new("ramp", declaration, move |u| Box::new(RampModel::new(u, settings.clone())))
}

fn sampler(uri: &str, settings: SamplerSettings) -> AtomicModelDescriptor {
    let declaration = SamplerModel::new(uri, settings.clone()).declaration();
    AtomicModelDescriptor::new(uri, declaration, move |u| Box::new(SamplerModel::new(u, settings.clone())))
}

fn level_of(model: &str) -> VariableSource {
    VariableSource::new(model, "level", f64_type())
}

fn out_of(model: &str) -> VariableSource {
    VariableSource::new(model, "out", f64_type())
}

fn into_level(model: &str) -> VariableSink {
    VariableSink::new(model, "level", f64_type())
}

/// ramp bound to one sampler, causally or not.
fn ramp_and_sampler(causal: bool) -> Architecture {
    let sink = if causal {
        into_level("sampler").causal()
    } else {
        into_level("sampler")
    };
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["ramp", "sampler"])
        .bind(level_of("ramp"), sink)
        .build()
        .unwrap();
    Architecture::new(
        "plant",
        vec![
            ramp(RampSettings::new(0.0, 1.0, 4.0)),
            sampler("sampler", SamplerSettings::new(1.0)),
        ],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap()
}

// ============================================================================
// Shared placeholders
// ============================================================================

#[test]
fn test_importers_share_the_exported_placeholder() {
    let (left, left_slot) = recorder::<f64>("left");
    let (right, right_slot) = recorder::<f64>("right");
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["ramp", "left", "right"])
        .bind(level_of("ramp"), into_level("left"))
        .bind(level_of("ramp"), into_level("right"))
        .build()
        .unwrap();
    let arch = Architecture::new(
        "plant",
        vec![ramp(RampSettings::new(0.0, 2.0, 1.0)), left, right],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap();

    let report = arch
        .coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(3.5))
        .unwrap();

    let left = left_slot.lock().clone().unwrap();
    let right = right_slot.lock().clone().unwrap();
    assert!(left.ptr_eq(&right));
    assert_eq!(left.owner(), "ramp");
    assert!(!left.is_causal());

    // Written by the ramp's own transitions, seen without any copy.
    assert_eq!(report.find("ramp").unwrap().body["value"], 6.0);
    assert_eq!(left.snapshot(), Some((6.0, SimTime::seconds(3.0))));
}

#[test]
fn test_history_through_the_binding() {
    let (reader, slot) = recorder::<f64>("reader");
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["ramp", "reader"])
        .bind(level_of("ramp"), into_level("reader"))
        .build()
        .unwrap();
    let arch = Architecture::new(
        "plant",
        vec![ramp(RampSettings::new(0.0, 2.0, 1.0)), reader],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap();
    arch.coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(3.5))
        .unwrap();

    let level = slot.lock().clone().unwrap();
    assert_eq!(level.history_len(), 4);
    assert_eq!(level.history_get(0), Some((6.0, SimTime::seconds(3.0))));
    assert_eq!(level.history_get(3), Some((0.0, SimTime::seconds(0.0))));
    assert_eq!(level.derivative(), Some(2.0));
    assert_eq!(level.interpolate(SimTime::seconds(2.5)), Some(5.0));
}

#[test]
fn test_reader_of_wrong_type_rejected_at_binding() {
    let (reader, _slot) = recorder::<i64>("reader");
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["ramp", "reader"])
        .bind(level_of("ramp"), into_level("reader"))
        .build()
        .unwrap();
    let arch = Architecture::new(
        "plant",
        vec![ramp(RampSettings::new(0.0, 1.0, 1.0)), reader],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap();

    let err = arch.coordinator().err().unwrap();
    assert!(matches!(
        err,
        SimError::Configuration(ConfigurationError::Binding { ref model, .. }) if model == "reader"
    ));
}

// ============================================================================
// Causal refresh
// ============================================================================

#[test]
fn test_plain_binding_reads_last_written_value() {
    let report = ramp_and_sampler(false)
        .coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(3.5))
        .unwrap();
    assert_eq!(
        report.find("sampler").unwrap().body["samples"],
        json!([[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]])
    );
    assert_eq!(report.find("ramp").unwrap().stats.causal, 0);
}

#[test]
fn test_causal_binding_refreshes_before_read() {
    let arch = ramp_and_sampler(true);
    let report = arch
        .coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(3.5))
        .unwrap();
    assert_eq!(
        report.find("sampler").unwrap().body["samples"],
        json!([[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]])
    );
    let ramp = report.find("ramp").unwrap();
    assert_eq!(ramp.stats.causal, 3);
    assert_eq!(ramp.stats.internal, 0);
}

#[test]
fn test_causal_refresh_keeps_exporter_schedule() {
    // The ramp's own updates stay on its 4s grid despite the refreshes.
    let report = ramp_and_sampler(true)
        .coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(8.5))
        .unwrap();
    let ramp = report.find("ramp").unwrap();
    assert_eq!(ramp.stats.internal, 2);
    assert_eq!(ramp.body["value"], 8.0);
    let samples = report.find("sampler").unwrap().body["samples"].as_array().unwrap().clone();
    assert_eq!(samples.len(), 8);
    assert_eq!(samples[6], json!([7.0, 7.0]));
}

#[test]
fn test_causal_cycle_rejected() {
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["a", "b"])
        .bind(out_of("a"), into_level("b").causal())
        .bind(out_of("b"), into_level("a").causal())
        .build()
        .unwrap();
    let err = Architecture::new(
        "plant",
        vec![
            sampler("a", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
            sampler("b", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
        ],
        vec![plant],
        TimeUnit::Seconds,
    )
    .err()
    .unwrap();
    match err {
        SimError::Configuration(ConfigurationError::CausalCycle(models)) => {
            assert_eq!(models, vec!["a", "b"]);
        }
        other => panic!("expected a causal cycle, got {other}"),
    }
}

#[test]
fn test_one_causal_edge_in_a_loop_is_accepted() {
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["a", "b"])
        .bind(out_of("a"), into_level("b").causal())
        .bind(out_of("b"), into_level("a"))
        .build()
        .unwrap();
    let arch = Architecture::new(
        "plant",
        vec![
            sampler("a", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
            sampler("b", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
        ],
        vec![plant],
        TimeUnit::Seconds,
    );
    assert!(arch.is_ok());
}

// ============================================================================
// Variable initialisation fixpoint
// ============================================================================

/// ramp -> b (out = 2 * level) -> a (out = 3 * level)
fn chain() -> Architecture {
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["a", "b", "ramp"])
        .bind(level_of("ramp"), into_level("b"))
        .bind(out_of("b"), into_level("a"))
        .build()
        .unwrap();
    Architecture::new(
        "plant",
        vec![
            ramp(RampSettings::new(1.5, 0.0, 10.0)),
            sampler("a", SamplerSettings::new(1.0).with_scaled("out", 3.0)),
            sampler("b", SamplerSettings::new(1.0).with_scaled("out", 2.0)),
        ],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap()
}

#[test]
fn test_fixpoint_follows_dependencies() {
    let mut coordinator = chain().coordinator().unwrap();
    coordinator.initialise(SimTime::seconds(0.0)).unwrap();
    // Submodels are visited a, b, ramp: one round per link of the chain.
    assert_eq!(coordinator.stats().variable_rounds, 3);

    coordinator.run_until(SimTime::seconds(1.0)).unwrap();
    let report = coordinator.terminate(SimTime::seconds(1.0)).unwrap();
    assert_eq!(report.find("a").unwrap().body["samples"], json!([[1.0, 3.0]]));
    assert_eq!(report.find("b").unwrap().body["samples"], json!([[1.0, 1.5]]));
}

/// a and b each initialise their output from the other's.
fn mutual() -> Architecture {
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["a", "b"])
        .bind(out_of("a"), into_level("b"))
        .bind(out_of("b"), into_level("a"))
        .build()
        .unwrap();
    Architecture::new(
        "plant",
        vec![
            sampler("a", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
            sampler("b", SamplerSettings::new(1.0).with_scaled("out", 1.0)),
        ],
        vec![plant],
        TimeUnit::Seconds,
    )
    .unwrap()
}

#[test]
fn test_fixpoint_stall_in_simulated_time() {
    let err = mutual()
        .coordinator()
        .unwrap()
        .run(SimTime::seconds(0.0), SimDuration::seconds(1.0))
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::Configuration(ConfigurationError::VariableInitialisation { remaining: 2 })
    ));
}

#[test]
fn test_fixpoint_stall_in_real_time() {
    let scheduler = Arc::new(ManualScheduler::new());
    let sim = RtSimulation::builder(mutual().structural().unwrap())
        .scheduler(scheduler.clone())
        .build()
        .unwrap();
    let err = sim
        .start_at(Duration::from_secs(1), SimTime::seconds(0.0), SimDuration::seconds(1.0))
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::Configuration(ConfigurationError::VariableInitialisation { .. })
    ));
    assert_eq!(scheduler.pending_count(), 0);
}
