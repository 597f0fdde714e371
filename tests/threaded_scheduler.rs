//! Real-time runs on real threads.
//!
//! Runs are accelerated so that each test takes a fraction of a second of
//! wall-clock time. Assertions only rely on simulated times, which do not
//! depend on timer jitter.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cyphy::coupled::{
    Architecture, AtomicModelDescriptor, CoupledModelDescriptor, EventSink, EventSource, ReexportedEvent,
    VariableSink, VariableSource,
};
use cyphy::models::{
    CounterModel, CounterSettings, PeriodicModel, PeriodicSettings, RampModel, RampSettings, SamplerModel,
    SamplerSettings,
};
use cyphy::{
    AtomicModel, EventType, RtConfig, RtSimulation, Scheduler, SimDuration, SimTime, ThreadedScheduler, TimeUnit,
    VarType,
};

const TICK: EventType = EventType::new("Tick");
const BEAT: EventType = EventType::new("Beat");

fn descriptor<M, F>(uri: &str, create: F) -> AtomicModelDescriptor
where
    M: AtomicModel + 'static,
    F: Fn(&str) -> M + Send + Sync + 'static,
{
    let declaration = create(uri).declaration();
    AtomicModelDescriptor::new(uri, declaration, move |u| Box::new(create(u)))
}

fn clock_and_counter() -> Architecture {
    let clock = descriptor("clock", |u| PeriodicModel::new(u, PeriodicSettings::new(3.0)));
    let counter = descriptor("counter", |u| {
        CounterModel::new(
            u,
            CounterSettings {
                input: "Tick".to_string(),
            },
        )
    });
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["clock", "counter"])
        .connect(EventSource::new("clock", TICK), EventSink::new("counter", TICK))
        .reexport_event(BEAT, ReexportedEvent::new(EventSource::new("clock", TICK)))
        .build()
        .unwrap();
    Architecture::new("plant", vec![clock, counter], vec![plant], TimeUnit::Seconds).unwrap()
}

fn accelerated(arch: &Architecture, scheduler: Arc<ThreadedScheduler>, factor: f64) -> RtSimulation {
    RtSimulation::builder(arch.structural().unwrap())
        .scheduler(scheduler)
        .config(
            RtConfig::default()
                .with_acceleration(factor)
                .with_start_delay(Duration::from_millis(20))
                .with_end_of_run_margin(Duration::from_millis(150)),
        )
        .build()
        .unwrap()
}

#[test]
fn test_accelerated_run_completes() {
    let scheduler = Arc::new(ThreadedScheduler::new(2).unwrap());
    let sim = accelerated(&clock_and_counter(), scheduler, 50.0);

    let report = sim
        .run(SimTime::seconds(0.0), SimDuration::seconds(10.0), Duration::from_secs(5))
        .unwrap();
    assert_eq!(report.find("counter").unwrap().body["times"], json!([3.0, 6.0, 9.0]));
    assert_eq!(report.find("clock").unwrap().body["ticks"], 3);

    let beats = sim.take_host_outputs();
    assert_eq!(beats.len(), 3);
    assert!(sim.take_host_outputs().is_empty());
}

#[test]
fn test_wait_for_termination_times_out_then_terminates() {
    let scheduler = Arc::new(ThreadedScheduler::new(2).unwrap());
    let sim = accelerated(&clock_and_counter(), scheduler, 1.0);
    sim.start(SimTime::seconds(0.0), SimDuration::seconds(3600.0)).unwrap();

    assert!(!sim.wait_for_termination(Duration::from_millis(50)));
    sim.terminate_now().unwrap();
    assert!(sim.wait_for_termination(Duration::ZERO));

    let report = sim.finish().unwrap();
    assert_eq!(report.find("counter").unwrap().body["received"], 0);
}

#[test]
fn test_causal_refresh_across_threads() {
    let ramp = descriptor("ramp", |u| RampModel::new(u, RampSettings::new(0.0, 1.0, 4.0)));
    let sampler = descriptor("sampler", |u| SamplerModel::new(u, SamplerSettings::new(1.0)));
    let plant = CoupledModelDescriptor::builder("plant")
        .submodels(["ramp", "sampler"])
        .bind(
            VariableSource::new("ramp", "level", VarType::of::<f64>()),
            VariableSink::new("sampler", "level", VarType::of::<f64>()).causal(),
        )
        .build()
        .unwrap();
    let arch = Architecture::new("plant", vec![ramp, sampler], vec![plant], TimeUnit::Seconds).unwrap();

    let scheduler = Arc::new(ThreadedScheduler::new(4).unwrap());
    let sim = accelerated(&arch, scheduler, 40.0);
    let report = sim
        .run(SimTime::seconds(0.0), SimDuration::seconds(3.5), Duration::from_secs(5))
        .unwrap();
    assert_eq!(
        report.find("sampler").unwrap().body["samples"],
        json!([[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]])
    );
}

#[test]
fn test_scheduler_shared_by_two_runs() {
    let scheduler = Arc::new(ThreadedScheduler::new(2).unwrap());
    let first = accelerated(&clock_and_counter(), scheduler.clone(), 50.0);
    let second = accelerated(&clock_and_counter(), scheduler.clone(), 100.0);

    first.start(SimTime::seconds(0.0), SimDuration::seconds(10.0)).unwrap();
    second.start(SimTime::seconds(0.0), SimDuration::seconds(10.0)).unwrap();
    assert!(first.wait_for_termination(Duration::from_secs(5)));
    assert!(second.wait_for_termination(Duration::from_secs(5)));

    for sim in [&first, &second] {
        let report = sim.finish().unwrap();
        assert_eq!(report.find("counter").unwrap().body["received"], 3);
    }
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
}
