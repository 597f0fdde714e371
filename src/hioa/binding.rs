//! Variable bindings and causal refresh.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{ConfigurationError, SimResult};
use crate::time::SimTime;
use crate::types::ModelUri;

/// Handle on an exporter's engine used by causal readers.
///
/// `refresh(now)` brings the exporter's state, and therefore its exported
/// values, to `now` under the exporter's own serialization lock.
pub trait CausalRefresh: Send + Sync {
    fn model_uri(&self) -> &str;

    fn refresh(&self, now: SimTime) -> SimResult<()>;
}

/// A variable binding resolved down to atomic models.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResolvedBinding {
    /// Atomic model owning the placeholder
    pub exporter: ModelUri,
    /// Variable name in the exporter's declaration
    pub exported_name: String,
    /// Atomic model receiving the placeholder
    pub importer: ModelUri,
    /// Variable name in the importer's declaration
    pub imported_name: String,
    /// Whether reads go through the exporter's causal refresh
    pub causal: bool,
}

/// A dependency edge: `dependent` refreshes `exporter` before reading.
#[derive(Clone, Debug)]
pub struct CausalDependency {
    pub dependent: ModelUri,
    pub exporter: ModelUri,
}

impl CausalDependency {
    pub fn new(dependent: impl Into<ModelUri>, exporter: impl Into<ModelUri>) -> Self {
        Self {
            dependent: dependent.into(),
            exporter: exporter.into(),
        }
    }
}

/// Checks that causal refresh edges form an acyclic graph.
///
/// A refresh takes the exporter's lock while the dependent's lock is held, so
/// a cycle would deadlock at run time. Uses Kahn's algorithm; on failure the
/// models left on a cycle are reported.
pub fn check_causal_acyclic(dependencies: &[CausalDependency]) -> SimResult<()> {
    // Edge: exporter -> dependent (exporter must be refreshable first)
    let mut adj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

    for dep in dependencies {
        adj.entry(dep.exporter.as_str()).or_default().push(dep.dependent.as_str());
        adj.entry(dep.dependent.as_str()).or_default();
        *in_degree.entry(dep.dependent.as_str()).or_default() += 1;
        in_degree.entry(dep.exporter.as_str()).or_default();
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = BTreeSet::new();

    while let Some(id) = queue.pop_front() {
        visited.insert(id);
        if let Some(next) = adj.get(id) {
            for &n in next {
                if let Some(deg) = in_degree.get_mut(n) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(n);
                    }
                }
            }
        }
    }

    if visited.len() == in_degree.len() {
        Ok(())
    } else {
        let cycle: Vec<ModelUri> = in_degree
            .keys()
            .filter(|id| !visited.contains(*id))
            .map(|id| id.to_string())
            .collect();
        Err(ConfigurationError::CausalCycle(cycle).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_chain() {
        let deps = vec![
            CausalDependency::new("controller", "sensor"),
            CausalDependency::new("sensor", "plant"),
            CausalDependency::new("logger", "plant"),
        ];
        assert!(check_causal_acyclic(&deps).is_ok());
    }

    #[test]
    fn test_cycle_detected() {
        let deps = vec![
            CausalDependency::new("a", "b"),
            CausalDependency::new("b", "c"),
            CausalDependency::new("c", "a"),
            CausalDependency::new("d", "a"),
        ];
        let err = check_causal_acyclic(&deps).unwrap_err();
        match err {
            crate::error::SimError::Configuration(ConfigurationError::CausalCycle(models)) => {
                assert_eq!(models, vec!["a", "b", "c", "d"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let deps = vec![CausalDependency::new("a", "a")];
        assert!(check_causal_acyclic(&deps).is_err());
    }
}
