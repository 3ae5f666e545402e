//! The implication graph.

use crate::clause::ClauseRef;
use crate::cp::PropagatorId;
use marrow_formula::{lit::LitIdx, Var};

/// Assignments that caused a propagation.
///
/// Reason codes are discriminated by range: clause references stay below the arena limit while
/// propagator ids are handed out downwards from the top of the id space, so a code can always be
/// attributed with a single comparison. In this representation the two ranges map onto enum
/// variants; decisions and root-level units share the `Decision` variant.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reason {
    Decision,
    Clause(ClauseRef),
    Propagator(PropagatorId),
}

impl Reason {
    /// Whether this marks a decision or root-level unit.
    pub fn is_decision(&self) -> bool {
        matches!(self, Reason::Decision)
    }
}

/// Propagation that resulted in a conflict.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Conflict {
    Clause(ClauseRef),
    Propagator(PropagatorId),
}

/// Node and incoming edges of the implication graph.
#[derive(Copy, Clone)]
pub struct ImplNode {
    pub reason: Reason,
    pub level: LitIdx,
}

/// The implication graph.
///
/// This is a DAG having all assigned variables as nodes. It has unit clauses, assumptions and
/// decisions as sources. For each propagated assignment it has incoming edges from the literals
/// whose assignment caused the propagation to happen.
#[derive(Default)]
pub struct ImplGraph {
    /// Contains only valid data for indices of assigned variables.
    pub nodes: Vec<ImplNode>,
}

impl ImplGraph {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.nodes.resize(
            count,
            ImplNode {
                reason: Reason::Decision,
                level: 0,
            },
        );
    }

    /// Get the reason for an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn reason(&self, var: Var) -> &Reason {
        &self.nodes[var.index()].reason
    }

    /// Get the decision level of an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn level(&self, var: Var) -> usize {
        self.nodes[var.index()].level as usize
    }

    /// Whether the assigned variable was set by a decision or root-level unit.
    pub fn is_decision(&self, var: Var) -> bool {
        self.nodes[var.index()].reason.is_decision()
    }

    /// Updates the reason for an assigned variable.
    ///
    /// Make sure the reason vars are in front of the assigned variable in the trail.
    pub fn update_reason(&mut self, var: Var, reason: Reason) {
        self.nodes[var.index()].reason = reason
    }
}
