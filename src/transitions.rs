// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The resolution transition table.
//!
//! The table is data: a static set of `(from, to)` edges loaded once at
//! startup. Each edge may carry a pure guard and an action hook. Guards run
//! before the state write; actions may suspend on I/O and must be idempotent
//! because transitions can be retried.

use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{ResolutionState, TransitionContext};
use futures::future::BoxFuture;

pub type GuardFn = fn(&TransitionContext) -> bool;
pub type ActionFn = for<'a> fn(&'a TransitionContext) -> BoxFuture<'a, ResolutionResult<()>>;

pub struct Edge {
    pub from: ResolutionState,
    pub to: ResolutionState,
    pub guard: Option<GuardFn>,
    pub action: Option<ActionFn>,
}

impl Edge {
    fn new(from: ResolutionState, to: ResolutionState) -> Self {
        Self {
            from,
            to,
            guard: None,
            action: None,
        }
    }

    fn with_guard(mut self, guard: GuardFn) -> Self {
        self.guard = Some(guard);
        self
    }
}

pub struct TransitionTable {
    edges: Vec<Edge>,
}

impl TransitionTable {
    /// The lifecycle graph.
    ///
    /// SETTLED is terminal. EVIDENCE_GATHERING and MONITORING are holding
    /// states: they can be entered here but their exits are driven by
    /// external subsystems, so they have no outgoing edges.
    pub fn resolution_lifecycle() -> Self {
        use ResolutionState::*;
        Self {
            edges: vec![
                Edge::new(Created, Detecting),
                Edge::new(Created, EvidenceGathering),
                Edge::new(Detecting, Proposing),
                Edge::new(Detecting, EvidenceGathering),
                Edge::new(Proposing, Liveness),
                Edge::new(Liveness, Disputed),
                Edge::new(Liveness, Monitoring),
                Edge::new(Liveness, Resolved),
                Edge::new(Disputed, Arbitration),
                Edge::new(Disputed, Liveness),
                Edge::new(Arbitration, Resolved),
                Edge::new(Arbitration, Liveness),
                Edge::new(Resolved, Settled).with_guard(not_already_settled),
            ],
        }
    }

    pub fn with_edges(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    /// Look up the edge for `(from, to)`, or fail with `InvalidTransition`.
    pub fn check(
        &self,
        from: ResolutionState,
        to: ResolutionState,
    ) -> ResolutionResult<&Edge> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.to == to)
            .ok_or(ResolutionError::InvalidTransition { from, to })
    }

    /// States reachable from `from` in one step.
    pub fn allowed_from(&self, from: ResolutionState) -> Vec<ResolutionState> {
        self.edges
            .iter()
            .filter(|e| e.from == from)
            .map(|e| e.to)
            .collect()
    }

    pub fn is_terminal(state: ResolutionState) -> bool {
        state == ResolutionState::Settled
    }
}

/// An event that the record already marks settled must not be settled again.
fn not_already_settled(ctx: &TransitionContext) -> bool {
    ctx.event().map(|e| !e.settled).unwrap_or(true)
}
