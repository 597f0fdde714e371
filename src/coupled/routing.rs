//! Event routing through coupled models.
//!
//! An event crosses one [`Hop`] per coupling it traverses: each hop
//! optionally converts the event, then retypes it to the type expected on
//! the other side. A [`Route`] is the sequence of hops from an atomic
//! emitter to an atomic receiver once the hierarchy has been flattened.

use std::fmt;
use std::sync::Arc;

use crate::event::{Event, EventType};
use crate::types::ModelUri;

/// Conversion applied to an event crossing a coupling.
pub type EventConverter = Arc<dyn Fn(&Event) -> Event + Send + Sync>;

/// One coupling crossed by an event.
#[derive(Clone)]
pub struct Hop {
    /// Type of the event on the far side of the coupling
    pub target: EventType,
    pub converter: Option<EventConverter>,
}

impl Hop {
    pub fn new(target: EventType, converter: Option<EventConverter>) -> Self {
        Self { target, converter }
    }

    pub fn apply(&self, event: &Event) -> Event {
        let converted = match &self.converter {
            Some(convert) => convert(event),
            None => event.clone(),
        };
        if converted.event_type() == &self.target {
            converted
        } else {
            converted.retyped(self.target.clone())
        }
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("target", &self.target)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

/// Applies hops in order.
pub fn apply_hops(hops: &[Hop], event: &Event) -> Event {
    let mut iter = hops.iter();
    let Some(first) = iter.next() else {
        return event.clone();
    };
    iter.fold(first.apply(event), |e, hop| hop.apply(&e))
}

/// Flattened path from an atomic emitter to an atomic receiver.
#[derive(Clone, Debug)]
pub struct Route {
    pub sink: ModelUri,
    pub hops: Vec<Hop>,
}

impl Route {
    pub fn new(sink: impl Into<ModelUri>, hops: Vec<Hop>) -> Self {
        Self {
            sink: sink.into(),
            hops,
        }
    }

    /// The event as the receiver sees it.
    pub fn apply(&self, event: &Event) -> Event {
        apply_hops(&self.hops, event)
    }

    /// Type of the event as delivered.
    pub fn delivered_type(&self) -> Option<&EventType> {
        self.hops.last().map(|h| &h.target)
    }
}
