// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Preset-behavior mocks for the chain adapter and peer services.

use crate::chain::{ChainApi, ChainEventState, ChainReader, SubmittedProposal};
use crate::error::{ResolutionError, ResolutionResult};
use crate::peers::{DisputeApi, EventManagerApi, NotificationApi, ProposalApi, RewardApi};
use crate::types::{
    ChainEventRecord, Dispute, Event, IndexedChainEvent, Proposal, ProposalData, ProposalStatus,
    ResolutionState,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub fn test_event(event_id: &str, status: ResolutionState) -> Event {
    Event {
        event_id: event_id.to_string(),
        description: format!("test event {}", event_id),
        resolution_time: 1_700_000_000,
        status,
        outcome_hash: None,
        outcome: None,
        confidence_score: 0.0,
        proposer: None,
        dispute_count: 0,
        evidence_uri: None,
        reward_pool: 1_000_000_000_000_000_000,
        settled: false,
    }
}

pub fn test_proposal(
    proposal_id: &str,
    event_id: &str,
    status: ProposalStatus,
    liveness_expiry: u64,
) -> Proposal {
    Proposal {
        proposal_id: proposal_id.to_string(),
        event_id: event_id.to_string(),
        outcome_hash: "0xabc".to_string(),
        outcome: serde_json::json!({"winner": "A"}),
        confidence_score: 0.9,
        evidence_uri: None,
        bond_amount: 1_000_000_000_000_000_000,
        submitted_at: liveness_expiry.saturating_sub(7200),
        liveness_expiry,
        finalized_at: None,
        status,
        challenge_count: 0,
    }
}

pub fn test_proposal_data() -> ProposalData {
    ProposalData {
        outcome: serde_json::json!({"winner": "A"}),
        confidence_score: 0.9,
        evidence_uri: Some("ipfs://evidence".to_string()),
        bond_amount: 1_000_000_000_000_000_000,
    }
}

/// Chain adapter mock recording calls and serving preset responses.
pub struct MockChain {
    pub submit_response: Mutex<Option<SubmittedProposal>>,
    pub submit_calls: Mutex<Vec<String>>,
    pub finalize_calls: Mutex<Vec<String>>,
    pub settle_calls: Mutex<Vec<String>>,
    pub fail_settle: AtomicBool,
    pub fail_finalize: AtomicBool,
    /// Mirrors the contract's settled flag, set by settle_event
    pub settled_on_chain: AtomicBool,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            submit_response: Mutex::new(None),
            submit_calls: Mutex::new(Vec::new()),
            finalize_calls: Mutex::new(Vec::new()),
            settle_calls: Mutex::new(Vec::new()),
            fail_settle: AtomicBool::new(false),
            fail_finalize: AtomicBool::new(false),
            settled_on_chain: AtomicBool::new(false),
        }
    }

    pub fn set_submit_response(&self, response: SubmittedProposal) {
        *self.submit_response.lock().unwrap() = Some(response);
    }

    pub fn finalize_count(&self) -> usize {
        self.finalize_calls.lock().unwrap().len()
    }

    pub fn settle_count(&self) -> usize {
        self.settle_calls.lock().unwrap().len()
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainApi for MockChain {
    async fn submit_proposal(
        &self,
        event_id: &str,
        _data: &ProposalData,
    ) -> ResolutionResult<SubmittedProposal> {
        self.submit_calls.lock().unwrap().push(event_id.to_string());
        self.submit_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ResolutionError::TransientChain("no submit response set".to_string()))
    }

    async fn finalize_proposal(&self, proposal_id: &str) -> ResolutionResult<String> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(ResolutionError::TransientChain("rpc timeout".to_string()));
        }
        self.finalize_calls
            .lock()
            .unwrap()
            .push(proposal_id.to_string());
        Ok(format!("0xfinalize-{}", proposal_id))
    }

    async fn settle_event(&self, event_id: &str) -> ResolutionResult<String> {
        if self.fail_settle.load(Ordering::SeqCst) {
            return Err(ResolutionError::TransientChain("rpc timeout".to_string()));
        }
        self.settle_calls.lock().unwrap().push(event_id.to_string());
        self.settled_on_chain.store(true, Ordering::SeqCst);
        Ok(format!("0xsettle-{}", event_id))
    }

    async fn get_event(&self, _event_id: &str) -> ResolutionResult<ChainEventState> {
        Ok(ChainEventState {
            description: "mock".to_string(),
            resolution_time: 0,
            status: 0,
            outcome_hash: "0x0".to_string(),
            reward_pool: 0,
            settled: self.settled_on_chain.load(Ordering::SeqCst),
        })
    }
}

/// Event-manager mock with conditional status writes.
pub struct MockEventManager {
    events: Mutex<HashMap<String, Event>>,
    pub get_calls: AtomicU32,
    pub update_calls: AtomicU32,
    ingested: Mutex<Vec<ChainEventRecord>>,
    ingest_seen: Mutex<HashSet<(String, String)>>,
    pub ingest_posts: AtomicU32,
    pub fail_next_ingest: AtomicBool,
}

impl MockEventManager {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            get_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            ingested: Mutex::new(Vec::new()),
            ingest_seen: Mutex::new(HashSet::new()),
            ingest_posts: AtomicU32::new(0),
            fail_next_ingest: AtomicBool::new(false),
        }
    }

    pub fn put_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap()
            .insert(event.event_id.clone(), event);
    }

    pub fn status_of(&self, event_id: &str) -> Option<ResolutionState> {
        self.events.lock().unwrap().get(event_id).map(|e| e.status)
    }

    /// Overwrite the stored status directly, bypassing the conditional check
    /// (simulates a concurrent writer).
    pub fn force_status(&self, event_id: &str, status: ResolutionState) {
        if let Some(e) = self.events.lock().unwrap().get_mut(event_id) {
            e.status = status;
        }
    }

    /// Unique records accepted net of (event_id, tx_hash) dedup
    pub fn ingested_unique(&self) -> usize {
        self.ingest_seen.lock().unwrap().len()
    }

    pub fn ingested_records(&self) -> Vec<ChainEventRecord> {
        self.ingested.lock().unwrap().clone()
    }
}

impl Default for MockEventManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventManagerApi for MockEventManager {
    async fn get_event(&self, event_id: &str) -> ResolutionResult<Event> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .cloned()
            .ok_or_else(|| ResolutionError::PeerHttp {
                peer: "event-manager",
                message: format!("status 404: event {} not found", event_id),
            })
    }

    async fn update_status(
        &self,
        event_id: &str,
        status: ResolutionState,
        expected: ResolutionState,
    ) -> ResolutionResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| ResolutionError::PeerHttp {
                peer: "event-manager",
                message: format!("status 404: event {} not found", event_id),
            })?;
        if event.status != expected {
            return Err(ResolutionError::ConditionalUpdateConflict {
                event_id: event_id.to_string(),
                expected,
            });
        }
        event.status = status;
        Ok(())
    }

    async fn ingest_chain_event(&self, record: &ChainEventRecord) -> ResolutionResult<()> {
        self.ingest_posts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_ingest.swap(false, Ordering::SeqCst) {
            return Err(ResolutionError::PeerHttp {
                peer: "event-manager",
                message: "status 503: ingest unavailable".to_string(),
            });
        }
        let key = (record.event_id.clone(), record.transaction_hash.clone());
        if self.ingest_seen.lock().unwrap().insert(key) {
            self.ingested.lock().unwrap().push(record.clone());
        }
        Ok(())
    }
}

pub struct MockProposals {
    proposals: Mutex<HashMap<String, Proposal>>,
}

impl MockProposals {
    pub fn new() -> Self {
        Self {
            proposals: Mutex::new(HashMap::new()),
        }
    }

    pub fn put_proposal(&self, proposal: Proposal) {
        self.proposals
            .lock()
            .unwrap()
            .insert(proposal.proposal_id.clone(), proposal);
    }
}

impl Default for MockProposals {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalApi for MockProposals {
    async fn get_proposal(&self, proposal_id: &str) -> ResolutionResult<Proposal> {
        self.proposals
            .lock()
            .unwrap()
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| ResolutionError::PeerHttp {
                peer: "proposal",
                message: format!("status 404: proposal {} not found", proposal_id),
            })
    }
}

pub struct MockDisputes {
    disputes: Mutex<HashMap<String, Vec<Dispute>>>,
}

impl MockDisputes {
    pub fn new() -> Self {
        Self {
            disputes: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_dispute(&self, proposal_id: &str) {
        let mut disputes = self.disputes.lock().unwrap();
        let list = disputes.entry(proposal_id.to_string()).or_default();
        list.push(Dispute {
            dispute_id: format!("d{}", list.len() + 1),
            proposal_id: proposal_id.to_string(),
            disputer: "0xdisputer".to_string(),
            reason: Some("outcome contested".to_string()),
            created_at: 1_700_000_000,
        });
    }
}

impl Default for MockDisputes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisputeApi for MockDisputes {
    async fn disputes_for(&self, proposal_id: &str) -> ResolutionResult<Vec<Dispute>> {
        Ok(self
            .disputes
            .lock()
            .unwrap()
            .get(proposal_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct MockRewards {
    pub calls: AtomicU32,
    pub fail: AtomicBool,
}

impl MockRewards {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

impl Default for MockRewards {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardApi for MockRewards {
    async fn distribute(&self, _event_id: &str) -> ResolutionResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ResolutionError::PeerHttp {
                peer: "reward",
                message: "status 500".to_string(),
            });
        }
        Ok(())
    }
}

pub struct MockNotifications {
    pub calls: AtomicU32,
    pub fail: AtomicBool,
}

impl MockNotifications {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

impl Default for MockNotifications {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationApi for MockNotifications {
    async fn notify_arbitrators(
        &self,
        _proposal_id: &str,
        _dispute_data: &serde_json::Value,
    ) -> ResolutionResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ResolutionError::PeerHttp {
                peer: "notification",
                message: "status 502".to_string(),
            });
        }
        Ok(())
    }
}

/// Chain reader mock with a settable head and per-block scripted events.
pub struct MockChainReader {
    head: AtomicU64,
    events: Mutex<BTreeMap<u64, Vec<IndexedChainEvent>>>,
    pub fetch_ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockChainReader {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            events: Mutex::new(BTreeMap::new()),
            fetch_ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_event(&self, block: u64, event: IndexedChainEvent) {
        self.events
            .lock()
            .unwrap()
            .entry(block)
            .or_default()
            .push(event);
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.fetch_ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn head_block(&self) -> ResolutionResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_events(&self, from: u64, to: u64) -> ResolutionResult<Vec<IndexedChainEvent>> {
        self.fetch_ranges.lock().unwrap().push((from, to));
        Ok(self
            .events
            .lock()
            .unwrap()
            .range(from..=to)
            .flat_map(|(_, evs)| evs.clone())
            .collect())
    }
}

pub fn created_record(event_id: &str, block_number: u64, tx: &str) -> IndexedChainEvent {
    IndexedChainEvent::EventCreated(ChainEventRecord {
        event_id: event_id.to_string(),
        description: format!("chain event {}", event_id),
        resolution_time: 1_700_000_000,
        block_number,
        transaction_hash: tx.to_string(),
    })
}
