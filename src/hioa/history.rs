//! Bounded history of a continuous variable.

use std::collections::VecDeque;

use crate::time::SimTime;

/// Fixed-capacity ring buffer of `(value, time)` pairs.
///
/// Indexing is newest-first: `get(0)` is the most recent entry. Pushing into
/// a full buffer overwrites the oldest entry, so the length never exceeds the
/// capacity. A capacity of zero disables recording.
#[derive(Clone, Debug)]
pub struct ValueHistory<T> {
    entries: VecDeque<(T, SimTime)>,
    capacity: usize,
}

impl<T: Clone> ValueHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Records a new entry, dropping the oldest one when full.
    pub fn push(&mut self, value: T, time: SimTime) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front((value, time));
    }

    /// The `i`-th newest entry.
    pub fn get(&self, i: usize) -> Option<&(T, SimTime)> {
        self.entries.get(i)
    }

    pub fn latest(&self) -> Option<&(T, SimTime)> {
        self.entries.front()
    }

    pub fn oldest(&self) -> Option<&(T, SimTime)> {
        self.entries.back()
    }

    /// Iterates newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &(T, SimTime)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ValueHistory<f64> {
    /// Linear interpolation at `time` between the two retained entries that
    /// surround it. Returns `None` outside the retained window.
    pub fn interpolate(&self, time: SimTime) -> Option<f64> {
        let mut newer: Option<&(f64, SimTime)> = None;
        for entry in self.entries.iter() {
            let (v, t) = *entry;
            if t == time {
                return Some(v);
            }
            if t < time {
                let (nv, nt) = *newer?;
                let span = (nt - t).as_secs_f64();
                if span == 0.0 {
                    return Some(nv);
                }
                let ratio = (time - t).as_secs_f64() / span;
                return Some(v + (nv - v) * ratio);
            }
            newer = Some(entry);
        }
        None
    }

    /// Rate of change per second estimated from the two newest entries.
    pub fn derivative(&self) -> Option<f64> {
        let (v1, t1) = *self.entries.front()?;
        let (v0, t0) = *self.entries.get(1)?;
        let dt = (t1 - t0).as_secs_f64();
        if dt == 0.0 {
            return None;
        }
        Some((v1 - v0) / dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_bounded_newest_first() {
        let mut history = ValueHistory::new(3);
        for i in 0..5 {
            history.push(i, SimTime::seconds(i as f64));
            assert!(history.len() <= 3);
        }
        assert!(history.is_full());
        assert_eq!(history.get(0).map(|e| e.0), Some(4));
        assert_eq!(history.get(1).map(|e| e.0), Some(3));
        assert_eq!(history.get(2).map(|e| e.0), Some(2));
        assert!(history.get(3).is_none());
        assert_eq!(history.oldest().map(|e| e.0), Some(2));
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut history = ValueHistory::new(0);
        history.push(1.0, SimTime::seconds(0.0));
        assert!(history.is_empty());
    }

    #[test]
    fn test_interpolate() {
        let mut history = ValueHistory::new(4);
        history.push(0.0, SimTime::seconds(0.0));
        history.push(10.0, SimTime::seconds(2.0));
        history.push(20.0, SimTime::seconds(4.0));

        assert_eq!(history.interpolate(SimTime::seconds(1.0)), Some(5.0));
        assert_eq!(history.interpolate(SimTime::seconds(3.0)), Some(15.0));
        assert_eq!(history.interpolate(SimTime::seconds(4.0)), Some(20.0));
        assert_eq!(history.interpolate(SimTime::seconds(5.0)), None);
        assert_eq!(history.interpolate(SimTime::seconds(-1.0)), None);
    }

    #[test]
    fn test_derivative() {
        let mut history = ValueHistory::new(2);
        history.push(1.0, SimTime::seconds(1.0));
        assert_eq!(history.derivative(), None);
        history.push(4.0, SimTime::seconds(2.5));
        assert_eq!(history.derivative(), Some(2.0));
    }
}
