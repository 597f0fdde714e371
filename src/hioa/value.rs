//! Shared continuous-variable placeholders.
//!
//! An exported variable is owned by exactly one model through a
//! [`ValueWriter`]. Importers receive [`ValueReader`]s pointing at the same
//! placeholder, so every read observes the owner's latest write without any
//! copying at composition time. Single-writer is enforced by the type system:
//! `ValueWriter` is not `Clone` and readers expose no mutation.

use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigurationError, SimError, SimResult};
use crate::hioa::binding::CausalRefresh;
use crate::hioa::history::ValueHistory;
use crate::time::SimTime;
use crate::types::{ModelUri, VarType};

struct ValueState<T> {
    value: Option<T>,
    time: Option<SimTime>,
    history: Option<ValueHistory<T>>,
}

struct ValueCell<T> {
    owner: ModelUri,
    name: String,
    state: RwLock<ValueState<T>>,
}

/// Write handle on a shared placeholder, held by the exporting model.
pub struct ValueWriter<T> {
    cell: Arc<ValueCell<T>>,
}

impl<T> ValueWriter<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an uninitialised placeholder owned by `owner`.
    pub fn new(owner: impl Into<ModelUri>, name: impl Into<String>) -> Self {
        Self::build(owner.into(), name.into(), None)
    }

    /// Creates a placeholder that retains the last `capacity` values.
    pub fn with_history(owner: impl Into<ModelUri>, name: impl Into<String>, capacity: usize) -> Self {
        Self::build(owner.into(), name.into(), Some(ValueHistory::new(capacity)))
    }

    fn build(owner: ModelUri, name: String, history: Option<ValueHistory<T>>) -> Self {
        Self {
            cell: Arc::new(ValueCell {
                owner,
                name,
                state: RwLock::new(ValueState {
                    value: None,
                    time: None,
                    history,
                }),
            }),
        }
    }

    /// Writes a new value stamped with `time`.
    ///
    /// Must only be called from the owner's transitions, which run under the
    /// owner's engine lock and at non-decreasing times.
    pub fn set(&self, value: T, time: SimTime) {
        let mut state = self.cell.state.write();
        debug_assert!(
            state.time.map_or(true, |t| t <= time),
            "value {} of {} written backwards in time",
            self.cell.name,
            self.cell.owner
        );
        if let Some(history) = state.history.as_mut() {
            history.push(value.clone(), time);
        }
        state.value = Some(value);
        state.time = Some(time);
    }

    /// Same as [`ValueWriter::set`]; reads better in variable initialisers.
    pub fn initialise(&self, value: T, time: SimTime) {
        self.set(value, time);
    }

    pub fn get(&self) -> Option<T> {
        self.cell.state.read().value.clone()
    }

    pub fn time(&self) -> Option<SimTime> {
        self.cell.state.read().time
    }

    pub fn is_initialised(&self) -> bool {
        self.cell.state.read().value.is_some()
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// A plain reader on this placeholder, without causal refresh.
    pub fn reader(&self) -> ValueReader<T> {
        ValueReader {
            cell: Arc::clone(&self.cell),
            refresher: None,
        }
    }

    /// Type-erased handle handed to the composer.
    pub fn share(&self) -> SharedValue {
        let cell: Arc<dyn Any + Send + Sync> = self.cell.clone();
        SharedValue {
            owner: self.cell.owner.clone(),
            name: self.cell.name.clone(),
            var_type: VarType::of::<T>(),
            cell,
            refresher: None,
        }
    }
}

impl<T> fmt::Debug for ValueWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueWriter")
            .field("owner", &self.cell.owner)
            .field("name", &self.cell.name)
            .finish()
    }
}

/// Read handle on a shared placeholder, held by importing models.
///
/// A reader obtained through a causal binding carries a handle on the
/// exporter's engine: [`ValueReader::refresh`] brings the exporter up to the
/// reader's current time before the value is read.
pub struct ValueReader<T> {
    cell: Arc<ValueCell<T>>,
    refresher: Option<Arc<dyn CausalRefresh>>,
}

impl<T> Clone for ValueReader<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            refresher: self.refresher.clone(),
        }
    }
}

impl<T> ValueReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get(&self) -> Option<T> {
        self.cell.state.read().value.clone()
    }

    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }

    /// Time at which the current value was written.
    pub fn time(&self) -> Option<SimTime> {
        self.cell.state.read().time
    }

    /// Value and time read atomically.
    pub fn snapshot(&self) -> Option<(T, SimTime)> {
        let state = self.cell.state.read();
        match (&state.value, state.time) {
            (Some(v), Some(t)) => Some((v.clone(), t)),
            _ => None,
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.cell.state.read().value.is_some()
    }

    /// The `i`-th newest retained value, if the placeholder keeps a history.
    pub fn history_get(&self, i: usize) -> Option<(T, SimTime)> {
        let state = self.cell.state.read();
        state.history.as_ref()?.get(i).cloned()
    }

    pub fn history_len(&self) -> usize {
        let state = self.cell.state.read();
        state.history.as_ref().map_or(0, |h| h.len())
    }

    pub fn owner(&self) -> &str {
        &self.cell.owner
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// True when both readers point at the same placeholder.
    pub fn ptr_eq(&self, other: &ValueReader<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// True when this reader points at the placeholder owned by `writer`.
    pub fn reads_from(&self, writer: &ValueWriter<T>) -> bool {
        Arc::ptr_eq(&self.cell, &writer.cell)
    }

    pub fn is_causal(&self) -> bool {
        self.refresher.is_some()
    }

    /// Brings the exporter to `now` when the binding is causal; no-op
    /// otherwise.
    pub fn refresh(&self, now: SimTime) -> SimResult<()> {
        match &self.refresher {
            Some(refresher) => refresher.refresh(now),
            None => Ok(()),
        }
    }

    /// Refreshes, then reads.
    pub fn get_at(&self, now: SimTime) -> SimResult<Option<T>> {
        self.refresh(now)?;
        Ok(self.get())
    }
}

impl ValueReader<f64> {
    /// Linear interpolation over the retained history.
    pub fn interpolate(&self, time: SimTime) -> Option<f64> {
        let state = self.cell.state.read();
        state.history.as_ref()?.interpolate(time)
    }

    /// Rate of change per second from the two newest retained values.
    pub fn derivative(&self) -> Option<f64> {
        let state = self.cell.state.read();
        state.history.as_ref()?.derivative()
    }
}

impl<T> fmt::Debug for ValueReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueReader")
            .field("owner", &self.cell.owner)
            .field("name", &self.cell.name)
            .field("causal", &self.refresher.is_some())
            .finish()
    }
}

/// Type-erased handle on a placeholder, exchanged between models and the
/// composer.
#[derive(Clone)]
pub struct SharedValue {
    owner: ModelUri,
    name: String,
    var_type: VarType,
    cell: Arc<dyn Any + Send + Sync>,
    refresher: Option<Arc<dyn CausalRefresh>>,
}

impl SharedValue {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Name of the variable in the exporter's declaration.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn var_type(&self) -> &VarType {
        &self.var_type
    }

    /// Attaches the exporter's causal refresh handle.
    pub fn with_refresher(mut self, refresher: Arc<dyn CausalRefresh>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn is_causal(&self) -> bool {
        self.refresher.is_some()
    }

    /// Recovers a typed reader.
    ///
    /// `importer` and `variable` only serve the error message.
    pub fn reader<T>(&self, importer: &str, variable: &str) -> SimResult<ValueReader<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = Arc::clone(&self.cell)
            .downcast::<ValueCell<T>>()
            .map_err(|_| {
                SimError::Configuration(ConfigurationError::Binding {
                    model: importer.to_string(),
                    variable: variable.to_string(),
                    reason: format!(
                        "{} of {} holds {}, not {}",
                        self.name,
                        self.owner,
                        self.var_type,
                        std::any::type_name::<T>()
                    ),
                })
            })?;
        Ok(ValueReader {
            cell,
            refresher: self.refresher.clone(),
        })
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedValue")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("var_type", &self.var_type)
            .field("causal", &self.refresher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_writer_reader_share_placeholder() {
        let writer = ValueWriter::new("tank", "level");
        let a = writer.reader();
        let b = writer.share().reader::<f64>("valve", "level").unwrap();

        assert!(a.ptr_eq(&b));
        assert!(b.reads_from(&writer));
        assert!(!a.is_initialised());

        writer.set(3.5, SimTime::seconds(1.0));
        assert_eq!(a.get(), Some(3.5));
        assert_eq!(b.snapshot(), Some((3.5, SimTime::seconds(1.0))));
        assert_eq!(b.owner(), "tank");
    }

    #[test]
    fn test_type_mismatch_is_binding_error() {
        let writer: ValueWriter<f64> = ValueWriter::new("tank", "level");
        let err = writer.share().reader::<bool>("valve", "open").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_history_through_reader() {
        let writer = ValueWriter::with_history("tank", "level", 2);
        let reader = writer.reader();
        writer.set(1.0, SimTime::seconds(0.0));
        writer.set(2.0, SimTime::seconds(1.0));
        writer.set(4.0, SimTime::seconds(2.0));

        assert_eq!(reader.history_len(), 2);
        assert_eq!(reader.history_get(0), Some((4.0, SimTime::seconds(2.0))));
        assert_eq!(reader.derivative(), Some(2.0));
        assert_eq!(reader.interpolate(SimTime::seconds(1.5)), Some(3.0));
    }

    struct CountingRefresh {
        calls: Mutex<Vec<SimTime>>,
    }

    impl CausalRefresh for CountingRefresh {
        fn model_uri(&self) -> &str {
            "tank"
        }

        fn refresh(&self, now: SimTime) -> SimResult<()> {
            self.calls.lock().push(now);
            Ok(())
        }
    }

    #[test]
    fn test_causal_reader_refreshes() {
        let writer: ValueWriter<f64> = ValueWriter::new("tank", "level");
        let refresher = Arc::new(CountingRefresh {
            calls: Mutex::new(Vec::new()),
        });
        let reader = writer
            .share()
            .with_refresher(refresher.clone())
            .reader::<f64>("valve", "level")
            .unwrap();

        assert!(reader.is_causal());
        reader.get_at(SimTime::seconds(2.0)).unwrap();
        assert_eq!(refresher.calls.lock().as_slice(), &[SimTime::seconds(2.0)]);

        assert!(!writer.reader().is_causal());
        writer.reader().refresh(SimTime::seconds(3.0)).unwrap();
        assert_eq!(refresher.calls.lock().len(), 1);
    }
}
