//! Per-iteration observations
//!
//! When `report_observations` is on, the symbolic provider emits one
//! [`IterationObservation`] per iteration to its [`ObservationSink`]. The
//! default sink writes each observation as a JSON line through `log`.

use crate::datatree::TreeStats;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationObservation {
    pub iteration: u64,
    pub backend: String,
    /// Outcome indices taken from the root, e.g. `"0.1.0"`.
    pub path: String,
    pub depth: usize,
    pub draws: usize,
    /// `passed`, `failed`, `discarded`, `internal_error` or `verified`.
    pub verdict: String,
    pub discard_reason: Option<String>,
    pub elapsed_ms: u64,
    pub tree_nodes: usize,
    pub exhausted_nodes: usize,
    pub stalled_nodes: usize,
}

impl IterationObservation {
    pub(crate) fn with_tree(mut self, stats: &TreeStats) -> Self {
        self.tree_nodes = stats.total_nodes;
        self.exhausted_nodes = stats.exhausted_nodes;
        self.stalled_nodes = stats.stalled_nodes;
        self
    }
}

pub trait ObservationSink: Debug {
    fn observe(&mut self, observation: &IterationObservation);
}

/// Logs every observation as one JSON line at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservationSink for LogSink {
    fn observe(&mut self, observation: &IterationObservation) {
        match serde_json::to_string(observation) {
            Ok(line) => log::debug!(target: "conjecture_symbolic::observations", "{}", line),
            Err(e) => log::warn!("cannot serialize observation: {}", e),
        }
    }
}

/// Keeps observations in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    observations: Rc<RefCell<Vec<IterationObservation>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<IterationObservation> {
        self.observations.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.observations.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.borrow().is_empty()
    }
}

impl ObservationSink for MemorySink {
    fn observe(&mut self, observation: &IterationObservation) {
        self.observations.borrow_mut().push(observation.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> IterationObservation {
        IterationObservation {
            iteration: 3,
            backend: "enumerative".into(),
            path: "0.1".into(),
            depth: 2,
            draws: 1,
            verdict: "discarded".into(),
            discard_reason: Some("path_timeout".into()),
            elapsed_ms: 12,
            tree_nodes: 0,
            exhausted_nodes: 0,
            stalled_nodes: 0,
        }
    }

    #[test]
    fn test_memory_sink_shares_its_buffer() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.observe(&observation());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.observations()[0].iteration, 3);
    }

    #[test]
    fn test_observation_serializes_as_flat_json() {
        let stats = TreeStats {
            total_nodes: 7,
            exhausted_nodes: 2,
            ..TreeStats::default()
        };
        let json = serde_json::to_value(observation().with_tree(&stats)).unwrap();
        assert_eq!(json["verdict"], "discarded");
        assert_eq!(json["discard_reason"], "path_timeout");
        assert_eq!(json["tree_nodes"], 7);
    }
}
