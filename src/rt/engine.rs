//! Real-time engine of one atomic model.
//!
//! Lock order is always the atomic cell (the model's serialization lock),
//! then the engine's real-time state. Outputs are delivered to influencees
//! only after both locks are released, except on the causal refresh path
//! where delivery is deferred to a scheduler task because the refreshing
//! reader still holds its own lock.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::coupled::routing::{apply_hops, Hop};
use crate::error::{ConfigurationError, SimError, SimResult};
use crate::event::{Event, EventType};
use crate::hioa::CausalRefresh;
use crate::model::ModelReport;
use crate::rt::clock::RtClock;
use crate::rt::{RtConfig, TerminationLatch};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::simulator::{AtomicSimulator, SharedAtomic};
use crate::stats::RtStats;
use crate::time::{SimDuration, SimTime};

/// Bound on internal transitions run back to back while catching up with a
/// late arrival. Reaching it means the model keeps a zero time advance.
const MAX_CATCH_UP: usize = 100_000;

struct PendingTimer {
    generation: u64,
    handle: TaskHandle,
    target: SimTime,
}

#[derive(Default)]
struct RtState {
    clock: Option<RtClock>,
    generation: u64,
    pending: Option<PendingTimer>,
    end_of_run: Option<TaskHandle>,
    terminated: bool,
    report: Option<ModelReport>,
    stats: RtStats,
}

#[derive(Clone)]
enum Influencee {
    Engine { engine: Weak<RtAtomicEngine>, hops: Vec<Hop> },
    Host { outbox: Arc<Mutex<Vec<Event>>>, hops: Vec<Hop> },
}

/// Drives one atomic simulator against the wall clock.
pub struct RtAtomicEngine {
    atomic: SharedAtomic,
    scheduler: Arc<dyn Scheduler>,
    rt: Mutex<RtState>,
    influencees: RwLock<HashMap<EventType, Vec<Influencee>>>,
    latch: Option<Arc<TerminationLatch>>,
    halted: AtomicBool,
    failure: Mutex<Option<SimError>>,
    self_ref: Weak<RtAtomicEngine>,
}

impl RtAtomicEngine {
    pub fn new(atomic: SharedAtomic, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Self::build(atomic, scheduler, None)
    }

    /// Engine counting `latch` down once terminated.
    pub fn with_latch(
        atomic: SharedAtomic,
        scheduler: Arc<dyn Scheduler>,
        latch: Arc<TerminationLatch>,
    ) -> Arc<Self> {
        Self::build(atomic, scheduler, Some(latch))
    }

    fn build(
        atomic: SharedAtomic,
        scheduler: Arc<dyn Scheduler>,
        latch: Option<Arc<TerminationLatch>>,
    ) -> Arc<Self> {
        let engine = Arc::new_cyclic(|self_ref| Self {
            atomic,
            scheduler,
            rt: Mutex::new(RtState::default()),
            influencees: RwLock::new(HashMap::new()),
            latch,
            halted: AtomicBool::new(false),
            failure: Mutex::new(None),
            self_ref: self_ref.clone(),
        });
        // Causal readers of this model now go through the real-time protocol.
        let driver: Weak<dyn CausalRefresh> = Arc::downgrade(&engine) as Weak<dyn CausalRefresh>;
        engine.atomic.causal_target().attach(driver);
        engine
    }

    pub fn uri(&self) -> &str {
        self.atomic.uri()
    }

    pub fn atomic(&self) -> &SharedAtomic {
        &self.atomic
    }

    /// Sends outputs of type `event_type` to `sink`, through `hops`.
    pub fn add_influencee(&self, event_type: EventType, sink: &Arc<RtAtomicEngine>, hops: Vec<Hop>) {
        self.influencees
            .write()
            .entry(event_type)
            .or_default()
            .push(Influencee::Engine {
                engine: Arc::downgrade(sink),
                hops,
            });
    }

    /// Collects outputs of type `event_type` into `outbox`, through `hops`.
    pub fn add_host_output(&self, event_type: EventType, outbox: Arc<Mutex<Vec<Event>>>, hops: Vec<Hop>) {
        self.influencees
            .write()
            .entry(event_type)
            .or_default()
            .push(Influencee::Host { outbox, hops });
    }

    /// Starts driving the model, already initialised at `start_sim`, so that
    /// `start_sim` coincides with wall-clock instant `start_wall`.
    pub fn start_real_time(
        &self,
        start_wall: Duration,
        start_sim: SimTime,
        duration: SimDuration,
        config: &RtConfig,
    ) -> SimResult<()> {
        config.validate_for(self.scheduler.resolution())?;
        let now = self.scheduler.now();
        if start_wall <= now {
            return Err(ConfigurationError::StartNotInFuture { start: start_wall, now }.into());
        }
        let clock = RtClock::new(
            start_wall,
            start_sim,
            duration,
            config.acceleration_factor,
            self.scheduler.resolution(),
        )?;
        let end_wall = clock
            .wall_of(clock.end_sim())?
            .checked_add(config.end_of_run_margin)
            .ok_or_else(|| ConfigurationError::WallClockOverflow("end-of-run instant".to_string()))?;

        let sim = self.atomic.lock();
        let mut rt = self.rt.lock();
        if !sim.is_initialised() {
            return Err(SimError::protocol(self.uri(), "real-time start before initialisation"));
        }
        if rt.clock.is_some() {
            return Err(SimError::protocol(self.uri(), "real-time run already started"));
        }
        if sim.time_of_last_event() != start_sim {
            return Err(SimError::protocol(
                self.uri(),
                format!("initialised at {}, started at {start_sim}", sim.time_of_last_event()),
            ));
        }
        // The end-of-run callback goes first: an engine never runs without it.
        let weak = self.self_ref.clone();
        let end_sim = clock.end_sim();
        let end_of_run = self.scheduler.schedule(
            Box::new(move || {
                if let Some(engine) = weak.upgrade() {
                    if let Err(e) = engine.terminate_at(end_sim) {
                        engine.record_failure(e);
                    }
                }
            }),
            end_wall - now,
        )?;
        rt.clock = Some(clock);
        if let Err(e) = self.schedule_next(&sim, &mut rt) {
            end_of_run.cancel();
            rt.clock = None;
            rt.pending = None;
            return Err(e);
        }
        rt.end_of_run = Some(end_of_run);
        info!(
            model = %self.uri(),
            start = %start_sim,
            end = %end_sim,
            acceleration = clock.acceleration(),
            "real-time run scheduled"
        );
        Ok(())
    }

    /// Undoes a start whose run never began: timers are cancelled and the
    /// engine can be started again. Callbacks already running see a stale
    /// generation.
    pub(crate) fn abandon_start(&self) {
        let mut rt = self.rt.lock();
        if rt.terminated || rt.clock.is_none() {
            return;
        }
        self.cancel_pending(&mut rt);
        if let Some(handle) = rt.end_of_run.take() {
            handle.cancel();
        }
        rt.clock = None;
        debug!(model = %self.uri(), "real-time start abandoned");
    }

    /// Delivers an event emitted elsewhere at its time of occurrence.
    ///
    /// Arrivals behind the model's last event are moved forward to it and
    /// logged; arrivals past the end of the run are dropped.
    pub fn deliver(&self, event: Event) -> SimResult<()> {
        match self.accept(event) {
            Ok(outputs) => {
                self.propagate(outputs);
                Ok(())
            }
            Err(e) => {
                self.record_failure(self.replicate(&e));
                Err(e)
            }
        }
    }

    fn accept(&self, event: Event) -> SimResult<Vec<Event>> {
        let mut sim = self.atomic.lock();
        let mut rt = self.rt.lock();
        if rt.terminated || self.is_halted() {
            debug!(model = %self.uri(), event = %event.event_type(), "event after termination ignored");
            return Ok(Vec::new());
        }
        let Some(clock) = rt.clock else {
            return Err(SimError::protocol(self.uri(), "event delivered before the real-time start"));
        };
        let mut t = event.time();
        if t > clock.end_sim() {
            debug!(model = %self.uri(), time = %t, "event after the end of the run ignored");
            return Ok(Vec::new());
        }
        if t < sim.time_of_last_event() {
            rt.stats.late_arrivals += 1;
            warn!(
                model = %self.uri(),
                event = %event.event_type(),
                occurred = %t,
                applied = %sim.time_of_last_event(),
                "late arrival moved forward"
            );
            t = sim.time_of_last_event();
        }

        self.cancel_pending(&mut rt);
        let mut outputs = self.catch_up(&mut sim, t)?;
        sim.store_input(vec![event])?;
        if sim.time_of_next_event() == t {
            outputs.extend(sim.produce_output(t)?);
            sim.confluent_transition(t)?;
        } else {
            sim.external_transition(t)?;
        }
        self.schedule_next(&sim, &mut rt)?;
        Ok(outputs)
    }

    /// Runs internal transitions due strictly before `t`.
    fn catch_up(&self, sim: &mut AtomicSimulator, t: SimTime) -> SimResult<Vec<Event>> {
        let mut outputs = Vec::new();
        let mut steps = 0;
        while sim.time_of_next_event() < t {
            if steps == MAX_CATCH_UP {
                return Err(SimError::protocol(
                    self.uri(),
                    format!("no progress after {MAX_CATCH_UP} internal transitions"),
                ));
            }
            let tn = sim.time_of_next_event();
            outputs.extend(sim.produce_output(tn)?);
            sim.internal_transition(tn)?;
            steps += 1;
        }
        if steps > 0 {
            trace!(model = %self.uri(), steps, "caught up before arrival");
        }
        Ok(outputs)
    }

    fn on_timer(&self, generation: u64) {
        match self.fire(generation) {
            Ok(outputs) => self.propagate(outputs),
            Err(e) => self.record_failure(e),
        }
    }

    fn fire(&self, generation: u64) -> SimResult<Vec<Event>> {
        let mut sim = self.atomic.lock();
        let mut rt = self.rt.lock();
        if rt.terminated || self.is_halted() {
            return Ok(Vec::new());
        }
        let current = rt.pending.as_ref().is_some_and(|p| p.generation == generation);
        if !current {
            rt.stats.stale_callbacks += 1;
            debug!(model = %self.uri(), generation, "stale timer ignored");
            return Ok(Vec::new());
        }
        rt.pending = None;
        let now = sim.time_of_next_event();
        let outputs = sim.produce_output(now)?;
        sim.internal_transition(now)?;
        self.schedule_next(&sim, &mut rt)?;
        Ok(outputs)
    }

    fn cancel_pending(&self, rt: &mut RtState) {
        rt.generation += 1;
        if let Some(pending) = rt.pending.take() {
            if pending.handle.cancel() {
                rt.stats.timers_cancelled += 1;
            }
        }
    }

    /// Schedules the next internal transition, unless it falls after the
    /// end of the run.
    fn schedule_next(&self, sim: &AtomicSimulator, rt: &mut RtState) -> SimResult<()> {
        if rt.pending.is_some() {
            self.cancel_pending(rt);
        }
        let Some(clock) = rt.clock else {
            return Ok(());
        };
        let tn = sim.time_of_next_event();
        if tn.is_infinite() || tn > clock.end_sim() {
            return Ok(());
        }
        let deadline = clock.delay_until(tn, self.scheduler.now())?;
        if let Some(late) = deadline.late_by {
            rt.stats.clamped_delays += 1;
            warn!(
                model = %self.uri(),
                target = %tn,
                late_ms = late.as_secs_f64() * 1000.0,
                "wall-clock deadline already passed"
            );
        }
        rt.generation += 1;
        let generation = rt.generation;
        let weak = self.self_ref.clone();
        let handle = self.scheduler.schedule(
            Box::new(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.on_timer(generation);
                }
            }),
            deadline.delay,
        )?;
        rt.stats.timers_scheduled += 1;
        rt.pending = Some(PendingTimer {
            generation,
            handle,
            target: tn,
        });
        trace!(model = %self.uri(), target = %tn, delay = ?deadline.delay, "internal transition scheduled");
        Ok(())
    }

    fn routed(&self, outputs: &[Event]) -> Vec<(Influencee, Event)> {
        let table = self.influencees.read();
        let mut deliveries = Vec::new();
        for event in outputs {
            if let Some(targets) = table.get(event.event_type()) {
                for target in targets {
                    let hops = match target {
                        Influencee::Engine { hops, .. } | Influencee::Host { hops, .. } => hops,
                    };
                    deliveries.push((target.clone(), apply_hops(hops, event)));
                }
            }
        }
        deliveries
    }

    /// Delivers outputs synchronously. Failures of a receiver are recorded
    /// on the receiver.
    fn propagate(&self, outputs: Vec<Event>) {
        if outputs.is_empty() {
            return;
        }
        for (target, event) in self.routed(&outputs) {
            match target {
                Influencee::Engine { engine, .. } => {
                    if let Some(engine) = engine.upgrade() {
                        let _ = engine.deliver(event);
                    }
                }
                Influencee::Host { outbox, .. } => outbox.lock().push(event),
            }
        }
    }

    fn propagate_later(&self, outputs: Vec<Event>) -> SimResult<()> {
        if outputs.is_empty() {
            return Ok(());
        }
        let weak = self.self_ref.clone();
        self.scheduler.schedule_immediate(Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.propagate(outputs);
            }
        }))?;
        Ok(())
    }

    fn refresh_locked(&self, now: SimTime) -> SimResult<Vec<Event>> {
        let mut sim = self.atomic.lock();
        let mut rt = self.rt.lock();
        if rt.terminated || self.is_halted() {
            return Ok(Vec::new());
        }
        let Some(clock) = rt.clock else {
            return Ok(Vec::new());
        };
        let t = now.min(clock.end_sim());
        if t <= sim.time_of_last_event() {
            return Ok(Vec::new());
        }
        self.cancel_pending(&mut rt);
        let mut outputs = self.catch_up(&mut sim, t)?;
        if sim.time_of_next_event() == t {
            outputs.extend(sim.produce_output(t)?);
            sim.internal_transition(t)?;
        } else {
            sim.causal_transition(t)?;
        }
        self.schedule_next(&sim, &mut rt)?;
        Ok(outputs)
    }

    /// Terminates at the wall-clock position of the run, or at the end of
    /// the run if it is already over. Idempotent.
    pub fn terminate(&self) -> SimResult<ModelReport> {
        let end = {
            let rt = self.rt.lock();
            rt.clock
                .map(|c| c.sim_time_at(self.scheduler.now()).min(c.end_sim()))
        };
        match end {
            Some(end) => self.terminate_at(end),
            None => {
                let cst = self.atomic.lock().current_state_time();
                self.terminate_at(cst)
            }
        }
    }

    /// Terminates at simulated time `end`. The first call wins; later calls
    /// return the same report.
    pub fn terminate_at(&self, end: SimTime) -> SimResult<ModelReport> {
        let result = {
            let mut sim = self.atomic.lock();
            let mut rt = self.rt.lock();
            if rt.terminated {
                return rt
                    .report
                    .clone()
                    .ok_or_else(|| SimError::protocol(self.uri(), "terminated without a report"));
            }
            rt.terminated = true;
            self.cancel_pending(&mut rt);
            if let Some(handle) = rt.end_of_run.take() {
                handle.cancel();
            }
            let result = sim.terminate(end);
            if let Ok(report) = &result {
                rt.report = Some(report.clone());
            }
            result
        };
        if let Some(latch) = &self.latch {
            latch.count_down();
        }
        match &result {
            Ok(report) => info!(
                model = %self.uri(),
                end = %end,
                transitions = report.stats.transitions(),
                "real-time engine terminated"
            ),
            Err(e) => error!(model = %self.uri(), error = %e, "termination failed"),
        }
        result
    }

    fn record_failure(&self, e: SimError) {
        error!(model = %self.uri(), error = %e, "real-time engine halted");
        self.halted.store(true, Ordering::Release);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(e);
        }
    }

    /// Copy of `e` kept on the engine while the original goes to the caller.
    fn replicate(&self, e: &SimError) -> SimError {
        match e {
            SimError::Scheduling(failure) => SimError::Scheduling(failure.clone()),
            SimError::Protocol { model, reason } => SimError::protocol(model.clone(), reason.clone()),
            SimError::Configuration(c) => SimError::protocol(self.uri(), c.to_string()),
        }
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Takes the first failure recorded inside a callback.
    pub fn take_failure(&self) -> Option<SimError> {
        self.failure.lock().take()
    }

    pub fn has_failed(&self) -> bool {
        self.is_halted()
    }

    pub fn is_started(&self) -> bool {
        self.rt.lock().clock.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.rt.lock().terminated
    }

    pub fn report(&self) -> Option<ModelReport> {
        self.rt.lock().report.clone()
    }

    pub fn clock(&self) -> Option<RtClock> {
        self.rt.lock().clock
    }

    /// Simulated time matching the scheduler's clock, within the run.
    pub fn current_sim_time(&self) -> Option<SimTime> {
        let clock = self.rt.lock().clock?;
        Some(clock.sim_time_at(self.scheduler.now()).min(clock.end_sim()))
    }

    /// Simulated time of the pending internal transition, if any.
    pub fn pending_timer_target(&self) -> Option<SimTime> {
        self.rt.lock().pending.as_ref().map(|p| p.target)
    }

    /// Number of pending internal-transition timers: zero or one.
    pub fn pending_timer_count(&self) -> usize {
        usize::from(self.rt.lock().pending.is_some())
    }

    pub fn generation(&self) -> u64 {
        self.rt.lock().generation
    }

    pub fn rt_stats(&self) -> RtStats {
        self.rt.lock().stats
    }

    pub fn export_stats(&self) -> serde_json::Value {
        let simulator = self.atomic.lock().export_stats();
        let rt = self.rt.lock();
        serde_json::json!({
            "simulator": simulator,
            "rt": rt.stats,
            "generation": rt.generation,
            "pending_timer": rt.pending.as_ref().map(|p| p.target.value()),
            "terminated": rt.terminated,
            "failed": self.is_halted(),
        })
    }
}

impl CausalRefresh for RtAtomicEngine {
    fn model_uri(&self) -> &str {
        self.uri()
    }

    /// Brings the model to `now` with the same cancel and reschedule steps
    /// as an external arrival. Outputs produced on the way are delivered
    /// from a scheduler task.
    fn refresh(&self, now: SimTime) -> SimResult<()> {
        let outputs = match self.refresh_locked(now) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.record_failure(self.replicate(&e));
                return Err(e);
            }
        };
        if let Err(e) = self.propagate_later(outputs) {
            self.record_failure(self.replicate(&e));
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RtAtomicEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtAtomicEngine")
            .field("uri", &self.uri())
            .field("halted", &self.is_halted())
            .finish()
    }
}
