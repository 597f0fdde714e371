//! Event definitions for the simulation framework.
//!
//! Events are the discrete communication mechanism between models. An event
//! is immutable once created: routing through a coupled model produces a new
//! event (possibly retyped or converted) rather than mutating the original.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::time::SimTime;

/// Named tag identifying the kind of an event.
///
/// Event types are declared statically by models (imported and exported
/// event sets) and can be built in `const` context:
///
/// ```
/// use cyphy::event::EventType;
///
/// const SWITCH_ON: EventType = EventType::new("SwitchOn");
/// assert_eq!(SWITCH_ON.name(), "SwitchOn");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Event type with a runtime name (configuration files).
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents an event in the simulation.
///
/// Events carry a type, a time of occurrence, a JSON payload and a priority
/// used to order simultaneous events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    event_type: EventType,
    time: SimTime,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    priority: i32,
}

impl Event {
    /// Creates a new event with the given type, time and payload.
    pub fn new(event_type: EventType, time: SimTime, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            time,
            payload,
            priority: 0,
        }
    }

    /// Creates an event without payload.
    pub fn signal(event_type: EventType, time: SimTime) -> Self {
        Self::new(event_type, time, serde_json::Value::Null)
    }

    /// Sets the priority. Among simultaneous events, higher priorities are
    /// consumed first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Time of occurrence.
    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Deserializes the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns a copy of this event carrying another type.
    pub fn retyped(&self, event_type: EventType) -> Event {
        Event {
            event_type,
            time: self.time,
            payload: self.payload.clone(),
            priority: self.priority,
        }
    }

    /// Returns a copy of this event with the same type and a new payload.
    pub fn with_payload(&self, payload: serde_json::Value) -> Event {
        Event {
            event_type: self.event_type.clone(),
            time: self.time,
            payload,
            priority: self.priority,
        }
    }
}

/// Store of external events received by a model and not yet consumed.
///
/// Events are drained in tie-break order: time of occurrence, then priority
/// (descending), then arrival order.
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: Vec<(u64, Event)>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.entries.push((self.next_seq, event));
        self.next_seq += 1;
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time of the earliest stored event.
    pub fn earliest_time(&self) -> Option<SimTime> {
        self.entries.iter().map(|(_, e)| e.time).min()
    }

    /// Removes and returns all events in tie-break order.
    pub fn drain_ordered(&mut self) -> Vec<Event> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|(sa, a), (sb, b)| {
            a.time
                .cmp(&b.time)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| sa.cmp(sb))
        });
        entries.into_iter().map(|(_, e)| e).collect()
    }

    /// Removes and returns, in tie-break order, the events whose time of
    /// occurrence is at or before `time`.
    pub fn drain_until(&mut self, time: SimTime) -> Vec<Event> {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(_, e)| e.time <= time);
        self.entries = rest;
        let mut due_queue = EventQueue {
            entries: due,
            next_seq: 0,
        };
        due_queue.drain_ordered()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: EventType = EventType::new("Ping");
    const PONG: EventType = EventType::new("Pong");

    #[test]
    fn test_event_creation() {
        let event = Event::new(PING, SimTime::seconds(1.0), serde_json::json!({"value": 42}));
        assert_eq!(event.event_type(), &PING);
        assert_eq!(event.time(), SimTime::seconds(1.0));
        assert_eq!(event.payload()["value"], 42);
        assert_eq!(event.priority(), 0);
    }

    #[test]
    fn test_retyped_keeps_payload() {
        let event = Event::new(PING, SimTime::seconds(2.0), serde_json::json!("hello"))
            .with_priority(3);
        let retyped = event.retyped(PONG);
        assert_eq!(retyped.event_type(), &PONG);
        assert_eq!(retyped.payload(), event.payload());
        assert_eq!(retyped.priority(), 3);
        assert_eq!(event.event_type(), &PING);
    }

    #[test]
    fn test_payload_as() {
        let event = Event::new(PING, SimTime::seconds(0.0), serde_json::json!(21.5));
        let v: f64 = event.payload_as().unwrap();
        assert_eq!(v, 21.5);
    }

    #[test]
    fn test_queue_tie_break_order() {
        let mut queue = EventQueue::new();
        queue.push(Event::signal(EventType::new("late"), SimTime::seconds(2.0)));
        queue.push(Event::signal(EventType::new("first"), SimTime::seconds(1.0)));
        queue.push(Event::signal(EventType::new("urgent"), SimTime::seconds(1.0)).with_priority(5));
        queue.push(Event::signal(EventType::new("second"), SimTime::seconds(1.0)));

        let names: Vec<_> = queue
            .drain_ordered()
            .iter()
            .map(|e| e.event_type().name().to_string())
            .collect();
        assert_eq!(names, vec!["urgent", "first", "second", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_until() {
        let mut queue = EventQueue::new();
        queue.push(Event::signal(PING, SimTime::seconds(1.0)));
        queue.push(Event::signal(PONG, SimTime::seconds(3.0)));
        queue.push(Event::signal(PING, SimTime::seconds(2.0)));

        let due = queue.drain_until(SimTime::seconds(2.0));
        assert_eq!(due.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.earliest_time(), Some(SimTime::seconds(3.0)));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(PING, SimTime::seconds(1.0), serde_json::json!(42));
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), &PING);
        assert_eq!(deserialized.time(), event.time());
    }
}
