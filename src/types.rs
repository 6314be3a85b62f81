// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Type definitions for the resolution lifecycle

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lifecycle state of an event under resolution.
///
/// The wire form (event-manager JSON) is the SCREAMING_SNAKE string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Created,
    Detecting,
    EvidenceGathering,
    Proposing,
    Liveness,
    Monitoring,
    Disputed,
    Arbitration,
    Resolved,
    Settled,
}

impl ResolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Created => "CREATED",
            ResolutionState::Detecting => "DETECTING",
            ResolutionState::EvidenceGathering => "EVIDENCE_GATHERING",
            ResolutionState::Proposing => "PROPOSING",
            ResolutionState::Liveness => "LIVENESS",
            ResolutionState::Monitoring => "MONITORING",
            ResolutionState::Disputed => "DISPUTED",
            ResolutionState::Arbitration => "ARBITRATION",
            ResolutionState::Resolved => "RESOLVED",
            ResolutionState::Settled => "SETTLED",
        }
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ResolutionState::Created),
            "DETECTING" => Ok(ResolutionState::Detecting),
            "EVIDENCE_GATHERING" => Ok(ResolutionState::EvidenceGathering),
            "PROPOSING" => Ok(ResolutionState::Proposing),
            "LIVENESS" => Ok(ResolutionState::Liveness),
            "MONITORING" => Ok(ResolutionState::Monitoring),
            "DISPUTED" => Ok(ResolutionState::Disputed),
            "ARBITRATION" => Ok(ResolutionState::Arbitration),
            "RESOLVED" => Ok(ResolutionState::Resolved),
            "SETTLED" => Ok(ResolutionState::Settled),
            other => Err(format!("unknown resolution state: {}", other)),
        }
    }
}

/// An event under resolution, as stored by the event-manager peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub description: String,
    /// Wall-clock time (unix secs) at which the real-world outcome is knowable
    pub resolution_time: u64,
    pub status: ResolutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer: Option<String>,
    #[serde(default)]
    pub dispute_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_uri: Option<String>,
    #[serde(default)]
    pub reward_pool: u128,
    #[serde(default)]
    pub settled: bool,
}

/// Status of an on-chain proposal, as mirrored by the proposal peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Liveness,
    Disputed,
    Finalized,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Liveness => write!(f, "liveness"),
            ProposalStatus::Disputed => write!(f, "disputed"),
            ProposalStatus::Finalized => write!(f, "finalized"),
        }
    }
}

/// A candidate outcome submitted on-chain with a bond.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub proposal_id: String,
    pub event_id: String,
    pub outcome_hash: String,
    pub outcome: serde_json::Value,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_uri: Option<String>,
    pub bond_amount: u128,
    pub submitted_at: u64,
    pub liveness_expiry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<u64>,
    pub status: ProposalStatus,
    #[serde(default)]
    pub challenge_count: u32,
}

/// Outcome data produced by the Detection subsystem, input to proposal submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalData {
    pub outcome: serde_json::Value,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_uri: Option<String>,
    pub bond_amount: u128,
}

/// An on-chain challenge to a pending proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub dispute_id: String,
    pub proposal_id: String,
    pub disputer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: u64,
}

/// Normalized on-chain record the indexer POSTs to the event-manager.
/// The peer deduplicates by `(event_id, transaction_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEventRecord {
    pub event_id: String,
    pub description: String,
    pub resolution_time: u64,
    pub block_number: u64,
    pub transaction_hash: String,
}

/// A contract event extracted from a block range by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedChainEvent {
    EventCreated(ChainEventRecord),
    ProposalSubmitted {
        event_id: String,
        proposal_id: String,
        block_number: u64,
        transaction_hash: String,
    },
    ProposalFinalized {
        event_id: String,
        proposal_id: String,
        block_number: u64,
        transaction_hash: String,
    },
}

/// The subject an edge of the transition table operates on.
#[derive(Debug, Clone)]
pub enum Subject {
    Event(Event),
    Proposal(Proposal),
}

/// Context carried through a state transition: the typed subject plus an
/// opaque metadata tail for forward compatibility.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub subject: Subject,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransitionContext {
    pub fn for_event(event: Event) -> Self {
        Self {
            subject: Subject::Event(event),
            metadata: HashMap::new(),
        }
    }

    pub fn for_proposal(proposal: Proposal) -> Self {
        Self {
            subject: Subject::Proposal(proposal),
            metadata: HashMap::new(),
        }
    }

    pub fn event(&self) -> Option<&Event> {
        match &self.subject {
            Subject::Event(e) => Some(e),
            Subject::Proposal(_) => None,
        }
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match &self.subject {
            Subject::Proposal(p) => Some(p),
            Subject::Event(_) => None,
        }
    }
}
