//! PathTree - systematic exploration of a property's execution paths
//!
//! Every run of a property under the symbolic provider walks a path through this
//! tree. A node stands for a point in the execution after a prefix of decisions;
//! the decision made there (a draw, a branch on a symbolic condition, or a user
//! realization) is recorded on the node together with its possible outcomes.
//!
//! Key rules:
//! - Nodes are created lazily, in the order outcomes are first taken.
//! - Selection prefers outcomes that were never entered, in insertion order, then
//!   descends into partially explored children. Finished children are skipped.
//! - A node becomes exhausted once every feasible outcome leads to a finished
//!   child. Outcomes the solver could neither prove nor refute make a node
//!   *incomplete*, and an incomplete node is never exhausted.
//! - Abandoned attempts (timeouts, nondeterminism, model artifacts) are counted on
//!   the node where they happened. After `max_retries` attempts the node is
//!   stalled and no longer selected.
//!
//! The tree never talks to the solver. `crate::session` feeds it feasibility
//! results and asks it which outcome to take next.

use crate::data::DrawSignature;
use crate::solver::Pred;
use std::fmt;

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Identity of a decision site. Replaying a prefix must reproduce the same
/// signature at every node, otherwise the property is nondeterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionSignature {
    Draw(DrawSignature),
    Branch([u8; 32]),
    Realize([u8; 32]),
}

impl fmt::Display for DecisionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, digest) = match self {
            DecisionSignature::Draw(sig) => return write!(f, "draw {}", sig),
            DecisionSignature::Branch(d) => ("branch", d),
            DecisionSignature::Realize(d) => ("realize", d),
        };
        write!(f, "{} ", label)?;
        for byte in &digest[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Exploration state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Unexplored,
    Exploring,
    Exhausted,
    Unsatisfiable,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Exhausted | NodeStatus::Unsatisfiable)
    }
}

/// What the solver said about one outcome of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    Feasible,
    Infeasible,
    /// Neither proven nor refuted. Not taken, and blocks exhaustion.
    Undecided,
}

/// The decision recorded at a node on first visit.
#[derive(Debug, Clone)]
pub struct Decision {
    pub signature: DecisionSignature,
    /// Constraint asserted when each outcome is taken.
    pub outcomes: Vec<Pred>,
    pub feasibility: Vec<Feasibility>,
}

#[derive(Debug, Clone)]
pub struct PathNode {
    pub parent: Option<NodeId>,
    /// Outcome index taken at the parent to reach this node.
    pub outcome: Option<usize>,
    pub decision: Option<Decision>,
    /// Child per outcome index, created on first entry.
    pub children: Vec<Option<NodeId>>,
    pub status: NodeStatus,
    pub incomplete: bool,
    /// Number of abandoned attempts ending at this node.
    pub attempts: u32,
}

impl PathNode {
    fn new(parent: Option<NodeId>, outcome: Option<usize>) -> Self {
        Self {
            parent,
            outcome,
            decision: None,
            children: Vec::new(),
            status: NodeStatus::Unexplored,
            incomplete: false,
            attempts: 0,
        }
    }
}

/// Statistics about tree exploration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub decision_nodes: usize,
    pub exhausted_nodes: usize,
    pub unsatisfiable_nodes: usize,
    pub incomplete_nodes: usize,
    pub stalled_nodes: usize,
    /// Leaves cut off by a depth or collection budget.
    pub truncated_leaves: usize,
}

/// Arena-backed exploration tree owned by one provider.
#[derive(Debug, Clone)]
pub struct PathTree {
    nodes: Vec<PathNode>,
    max_retries: u32,
    truncated_leaves: usize,
}

impl PathTree {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(max_retries: u32) -> Self {
        Self {
            nodes: vec![PathNode::new(None, None)],
            max_retries: max_retries.max(1),
            truncated_leaves: 0,
        }
    }

    pub fn node(&self, id: NodeId) -> &PathNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_status(&self) -> NodeStatus {
        self.node(Self::ROOT).status
    }

    /// The root is finished.
    pub fn is_exhausted(&self) -> bool {
        self.root_status().is_terminal()
    }

    /// Finished by covering every path, with nothing cut off by a budget.
    pub fn is_verified(&self) -> bool {
        self.is_exhausted() && self.truncated_leaves == 0
    }

    /// Whether any unfinished path can still be selected from the root.
    pub fn can_proceed(&self) -> bool {
        self.is_selectable(Self::ROOT)
    }

    /// A stalled node hit its retry limit.
    pub fn is_stalled(&self, id: NodeId) -> bool {
        self.node(id).attempts >= self.max_retries
    }

    /// Mark a node as the current position of a path.
    pub fn enter(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        if node.status == NodeStatus::Unexplored {
            node.status = NodeStatus::Exploring;
        }
    }

    /// Record the decision made at `id` on its first visit.
    pub fn record_decision(&mut self, id: NodeId, decision: Decision) {
        let node = &mut self.nodes[id.0];
        node.incomplete = decision.feasibility.contains(&Feasibility::Undecided);
        node.children = vec![None; decision.outcomes.len()];
        node.decision = Some(decision);
        log::trace!("recorded decision at node {}", id.0);
    }

    /// Update an outcome's feasibility after a later solver answer.
    pub fn set_feasibility(&mut self, id: NodeId, outcome: usize, feasibility: Feasibility) {
        let node = &mut self.nodes[id.0];
        if let Some(decision) = node.decision.as_mut() {
            decision.feasibility[outcome] = feasibility;
            if feasibility == Feasibility::Undecided {
                node.incomplete = true;
            }
        }
    }

    /// Pick the outcome to take at `id`.
    pub fn select(&self, id: NodeId) -> Option<usize> {
        let node = self.node(id);
        let decision = node.decision.as_ref()?;
        let feasible = |i: &usize| decision.feasibility[*i] == Feasibility::Feasible;

        let fresh = (0..decision.outcomes.len())
            .filter(feasible)
            .find(|&i| match node.children[i] {
                None => true,
                Some(child) => self.node(child).status == NodeStatus::Unexplored && !self.is_stalled(child),
            });
        fresh.or_else(|| {
            (0..decision.outcomes.len())
                .filter(feasible)
                .find(|&i| matches!(node.children[i], Some(child) if self.is_selectable(child)))
        })
    }

    /// Whether a path through `id` could still reach something unexplored.
    pub fn is_selectable(&self, id: NodeId) -> bool {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let node = self.node(current);
            if node.status.is_terminal() || self.is_stalled(current) {
                continue;
            }
            let decision = match &node.decision {
                Some(decision) => decision,
                None => return true,
            };
            for i in 0..decision.outcomes.len() {
                if decision.feasibility[i] != Feasibility::Feasible {
                    continue;
                }
                match node.children.get(i).copied().flatten() {
                    None => return true,
                    Some(child) => pending.push(child),
                }
            }
        }
        false
    }

    /// Child reached by taking `outcome` at `id`, created on first use.
    pub fn child(&mut self, id: NodeId, outcome: usize) -> NodeId {
        if let Some(existing) = self.nodes[id.0].children.get(outcome).copied().flatten() {
            return existing;
        }
        let child = NodeId(self.nodes.len());
        self.nodes.push(PathNode::new(Some(id), Some(outcome)));
        let children = &mut self.nodes[id.0].children;
        if children.len() <= outcome {
            children.resize(outcome + 1, None);
        }
        children[outcome] = Some(child);
        child
    }

    /// The path ended normally at `leaf`.
    pub fn conclude(&mut self, leaf: NodeId) {
        self.finish(leaf, NodeStatus::Exhausted);
    }

    /// The path ended because a budget cut it off at `leaf`.
    pub fn truncate(&mut self, leaf: NodeId) {
        self.truncated_leaves += 1;
        self.finish(leaf, NodeStatus::Exhausted);
    }

    /// The prefix leading to `id` has no model.
    pub fn mark_unsatisfiable(&mut self, id: NodeId) {
        self.finish(id, NodeStatus::Unsatisfiable);
    }

    /// The path was abandoned at `id` without a result.
    pub fn abandon(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.attempts += 1;
        if node.attempts >= self.max_retries {
            log::debug!("node {} stalled after {} attempts", id.0, node.attempts);
        }
    }

    /// Re-check a node whose outcomes changed feasibility after it was recorded.
    pub fn settle(&mut self, id: NodeId) {
        if self.exhausts(id) {
            self.finish(id, NodeStatus::Exhausted);
        }
    }

    fn finish(&mut self, id: NodeId, status: NodeStatus) {
        if self.nodes[id.0].status.is_terminal() {
            return;
        }
        self.nodes[id.0].status = status;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            if !self.exhausts(parent) {
                break;
            }
            self.nodes[parent.0].status = NodeStatus::Exhausted;
            current = self.nodes[parent.0].parent;
        }
    }

    fn exhausts(&self, id: NodeId) -> bool {
        let node = self.node(id);
        if node.status.is_terminal() || node.incomplete {
            return false;
        }
        let decision = match &node.decision {
            Some(decision) => decision,
            None => return false,
        };
        decision.feasibility.iter().enumerate().all(|(i, feasibility)| match feasibility {
            Feasibility::Infeasible => true,
            Feasibility::Undecided => false,
            Feasibility::Feasible => matches!(node.children[i], Some(child) if self.node(child).status.is_terminal()),
        })
    }

    /// Outcome indices along the path from the root to `id`, e.g. `"0.1.1"`.
    pub fn path_label(&self, id: NodeId) -> String {
        let mut outcomes = Vec::new();
        let mut current = id;
        while let Some(outcome) = self.node(current).outcome {
            outcomes.push(outcome.to_string());
            current = match self.node(current).parent {
                Some(parent) => parent,
                None => break,
            };
        }
        outcomes.reverse();
        outcomes.join(".")
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            total_nodes: self.nodes.len(),
            truncated_leaves: self.truncated_leaves,
            ..TreeStats::default()
        };
        for (index, node) in self.nodes.iter().enumerate() {
            if node.decision.is_some() {
                stats.decision_nodes += 1;
            }
            match node.status {
                NodeStatus::Exhausted => stats.exhausted_nodes += 1,
                NodeStatus::Unsatisfiable => stats.unsatisfiable_nodes += 1,
                _ => {}
            }
            if node.incomplete {
                stats.incomplete_nodes += 1;
            }
            if self.is_stalled(NodeId(index)) && !node.status.is_terminal() {
                stats.stalled_nodes += 1;
            }
        }
        stats
    }
}
