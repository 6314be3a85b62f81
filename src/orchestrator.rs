// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The resolution orchestrator: owns the event/proposal lifecycle and
//! composes the cache, chain adapter, job queues and peer services.
//!
//! Errors on the critical state-advance path (chain write + status PATCH)
//! always surface to the caller; reward distribution and arbitrator
//! notification are side channels whose failures are logged and swallowed.

use crate::cache::Cache;
use crate::chain::ChainApi;
use crate::error::{ResolutionError, ResolutionResult};
use crate::metrics::ResolutionMetrics;
use crate::peers::PeerSet;
use crate::scheduler::{JobOptions, JobQueue, JobState, JOB_CHECK_LIVENESS, JOB_SETTLE_EVENT};
use crate::transitions::TransitionTable;
use crate::types::{
    now_secs, Event, Proposal, ProposalData, ProposalStatus, ResolutionState, TransitionContext,
};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const EVENT_CACHE_TTL: Duration = Duration::from_secs(300);
const PROPOSAL_CACHE_TTL: Duration = Duration::from_secs(300);

const LIVENESS_JOB_ATTEMPTS: u32 = 3;
const LIVENESS_JOB_BACKOFF: Duration = Duration::from_secs(5);
const SETTLEMENT_DELAY: Duration = Duration::from_secs(60);
const SETTLEMENT_JOB_ATTEMPTS: u32 = 5;
const SETTLEMENT_JOB_BACKOFF: Duration = Duration::from_secs(10);

pub fn event_cache_key(event_id: &str) -> String {
    format!("event:{}", event_id)
}

pub fn proposal_cache_key(proposal_id: &str, event_id: &str) -> String {
    format!("proposal:{}:{}", proposal_id, event_id)
}

/// The liveness window closes strictly after expiry.
pub(crate) fn finalization_due(now: u64, liveness_expiry: u64) -> bool {
    now > liveness_expiry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSettlementReport {
    pub successful: usize,
    pub failed: usize,
}

pub struct ResolutionOrchestrator {
    chain: Arc<dyn ChainApi>,
    peers: PeerSet,
    cache: Arc<dyn Cache>,
    liveness_queue: JobQueue,
    settlement_queue: JobQueue,
    table: TransitionTable,
    /// Proposals whose liveness monitoring was cancelled by a dispute.
    /// Checked inside the finalization gate in addition to the dispute
    /// query, so a timer that slipped past queue removal still fails.
    cancelled: RwLock<HashSet<String>>,
    metrics: Arc<ResolutionMetrics>,
}

impl ResolutionOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainApi>,
        peers: PeerSet,
        cache: Arc<dyn Cache>,
        liveness_queue: JobQueue,
        settlement_queue: JobQueue,
        metrics: Arc<ResolutionMetrics>,
    ) -> Self {
        Self {
            chain,
            peers,
            cache,
            liveness_queue,
            settlement_queue,
            table: TransitionTable::resolution_lifecycle(),
            cancelled: RwLock::new(HashSet::new()),
            metrics,
        }
    }

    pub fn liveness_queue(&self) -> &JobQueue {
        &self.liveness_queue
    }

    pub fn settlement_queue(&self) -> &JobQueue {
        &self.settlement_queue
    }

    /// Read-through fetch of the canonical event record (TTL 300 s).
    pub async fn fetch_event(&self, event_id: &str) -> ResolutionResult<Event> {
        let key = event_cache_key(event_id);
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<Event>(&raw) {
                Ok(event) => return Ok(event),
                // corrupt entries count as misses
                Err(_) => self.cache.delete(&key).await,
            }
        }
        let event = self.peers.events.get_event(event_id).await?;
        if let Ok(raw) = serde_json::to_string(&event) {
            self.cache.set(&key, raw, EVENT_CACHE_TTL).await;
        }
        Ok(event)
    }

    /// Read-through fetch of a proposal. The cache key carries the event id
    /// (`proposal:{proposal_id}:{event_id}`) so settlement cleanup can scan
    /// by event.
    pub async fn fetch_proposal(&self, proposal_id: &str) -> ResolutionResult<Proposal> {
        for key in self
            .cache
            .keys(&format!("proposal:{}:*", proposal_id))
            .await
        {
            if let Some(raw) = self.cache.get(&key).await {
                if let Ok(proposal) = serde_json::from_str::<Proposal>(&raw) {
                    return Ok(proposal);
                }
            }
        }
        let proposal = self.peers.proposals.get_proposal(proposal_id).await?;
        let key = proposal_cache_key(proposal_id, &proposal.event_id);
        if let Ok(raw) = serde_json::to_string(&proposal) {
            self.cache.set(&key, raw, PROPOSAL_CACHE_TTL).await;
        }
        Ok(proposal)
    }

    /// Apply a table-checked transition: guard, action, conditional status
    /// PATCH, cache invalidation.
    async fn transition_event(&self, event: &Event, to: ResolutionState) -> ResolutionResult<()> {
        let from = event.status;
        let edge = self.table.check(from, to).map_err(|e| {
            self.metrics
                .invalid_transitions
                .with_label_values(&[from.as_str(), to.as_str()])
                .inc();
            e
        })?;

        let ctx = TransitionContext::for_event(event.clone());
        if let Some(guard) = edge.guard {
            if !guard(&ctx) {
                return Err(ResolutionError::GuardFailed { from, to });
            }
        }
        if let Some(action) = edge.action {
            action(&ctx).await?;
        }

        self.peers
            .events
            .update_status(&event.event_id, to, from)
            .await?;
        self.cache.delete(&event_cache_key(&event.event_id)).await;
        self.metrics
            .transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        info!(
            "[Orchestrator] Event {} transitioned {} -> {}",
            event.event_id, from, to
        );
        Ok(())
    }

    /// Replay an event into its current authoritative state. Used on crash
    /// recovery and external pokes; issues no side effects when upstream
    /// state is unchanged.
    pub async fn process_event(&self, event_id: &str) -> ResolutionResult<TransitionContext> {
        let event = self.fetch_event(event_id).await?;
        if TransitionTable::is_terminal(event.status) {
            info!("[Orchestrator] Event {} is terminal ({})", event_id, event.status);
        }
        Ok(TransitionContext::for_event(event))
    }

    /// Submit the detected outcome on-chain, arm the liveness timer and move
    /// the event into LIVENESS. If this fails between the chain write and
    /// the status write, the indexer repairs the divergence by replaying the
    /// ProposalSubmitted log.
    pub async fn initiate_proposal(
        &self,
        event_id: &str,
        data: &ProposalData,
    ) -> ResolutionResult<String> {
        let submitted = self.chain.submit_proposal(event_id, data).await?;
        info!(
            "[Orchestrator] Proposal {} submitted for event {} (tx {}, expiry {})",
            submitted.proposal_id, event_id, submitted.transaction_hash, submitted.liveness_expiry
        );

        // a fresh proposal starts with no cancellation flag
        self.cancelled.write().await.remove(&submitted.proposal_id);
        self.schedule_liveness_check(&submitted.proposal_id, event_id, submitted.liveness_expiry)
            .await;

        let event = self.fetch_event(event_id).await?;
        self.transition_event(&event, ResolutionState::Liveness)
            .await?;
        Ok(submitted.proposal_id)
    }

    /// Enqueue a liveness check for the proposal unless one is already
    /// outstanding. Delay is `max(0, liveness_expiry - now)`.
    pub(crate) async fn schedule_liveness_check(
        &self,
        proposal_id: &str,
        event_id: &str,
        liveness_expiry: u64,
    ) -> Option<u64> {
        let outstanding = self
            .liveness_queue
            .scan(&[JobState::Delayed, JobState::Waiting])
            .await;
        if outstanding
            .iter()
            .any(|j| j.payload["proposalId"] == proposal_id)
        {
            warn!(
                "[Orchestrator] Liveness job already outstanding for proposal {}, not scheduling another",
                proposal_id
            );
            return None;
        }
        let delay = Duration::from_secs(liveness_expiry.saturating_sub(now_secs()));
        let id = self
            .liveness_queue
            .enqueue(
                JOB_CHECK_LIVENESS,
                json!({ "proposalId": proposal_id, "eventId": event_id }),
                JobOptions {
                    delay,
                    attempts: LIVENESS_JOB_ATTEMPTS,
                    backoff_base: LIVENESS_JOB_BACKOFF,
                },
            )
            .await;
        Some(id)
    }

    /// Move the event to DISPUTED, notify arbitrators (best-effort) and
    /// cancel the liveness timer. Timer cancellation completes before this
    /// returns so no stale timer can race arbitration.
    pub async fn handle_dispute_detected(
        &self,
        proposal_id: &str,
        dispute_data: &serde_json::Value,
    ) -> ResolutionResult<()> {
        // flag first: an already-executing finalization re-checks it in the gate
        self.cancelled.write().await.insert(proposal_id.to_string());

        let proposal = self.fetch_proposal(proposal_id).await?;
        let event = self.fetch_event(&proposal.event_id).await?;
        self.transition_event(&event, ResolutionState::Disputed)
            .await?;

        if let Err(e) = self
            .peers
            .notifications
            .notify_arbitrators(proposal_id, dispute_data)
            .await
        {
            warn!(
                "[Orchestrator] Arbitrator notification failed for proposal {}: {}",
                proposal_id, e
            );
        }

        self.pause_liveness_monitoring(proposal_id).await;
        Ok(())
    }

    /// Remove all outstanding liveness jobs for the proposal. Idempotent;
    /// only jobs still in {delayed, waiting} are removable.
    pub async fn pause_liveness_monitoring(&self, proposal_id: &str) -> usize {
        let jobs = self
            .liveness_queue
            .scan(&[JobState::Delayed, JobState::Waiting])
            .await;
        let mut removed = 0;
        for job in jobs {
            if job.payload["proposalId"] == proposal_id && self.liveness_queue.remove(job.id).await
            {
                removed += 1;
            }
        }
        if removed > 0 {
            self.metrics.liveness_jobs_cancelled.inc_by(removed as u64);
            info!(
                "[Orchestrator] Paused liveness monitoring for proposal {} ({} job(s) removed)",
                proposal_id, removed
            );
        }
        removed
    }

    /// Invoked when a liveness job fires: gate-check, finalize on-chain,
    /// move to RESOLVED and arm settlement.
    pub async fn finalize_proposal(&self, proposal_id: &str) -> ResolutionResult<()> {
        let proposal = self.fetch_proposal(proposal_id).await?;
        self.check_finalization_gate(&proposal).await?;

        let tx_hash = self.chain.finalize_proposal(proposal_id).await?;
        info!(
            "[Orchestrator] Proposal {} finalized on-chain (tx {})",
            proposal_id, tx_hash
        );

        let event = self.fetch_event(&proposal.event_id).await?;
        self.transition_event(&event, ResolutionState::Resolved)
            .await?;

        self.settlement_queue
            .enqueue(
                JOB_SETTLE_EVENT,
                json!({ "eventId": proposal.event_id }),
                JobOptions {
                    delay: SETTLEMENT_DELAY,
                    attempts: SETTLEMENT_JOB_ATTEMPTS,
                    backoff_base: SETTLEMENT_JOB_BACKOFF,
                },
            )
            .await;
        Ok(())
    }

    /// Finalization is attempted only when the proposal is still in its
    /// liveness window's terms: status "liveness", strictly past expiry,
    /// zero open disputes, and no cancellation flag.
    async fn check_finalization_gate(&self, proposal: &Proposal) -> ResolutionResult<()> {
        if self
            .cancelled
            .read()
            .await
            .contains(&proposal.proposal_id)
        {
            return Err(ResolutionError::PreconditionNotMet(format!(
                "liveness monitoring cancelled for proposal {}",
                proposal.proposal_id
            )));
        }
        if proposal.status != ProposalStatus::Liveness {
            return Err(ResolutionError::PreconditionNotMet(format!(
                "proposal {} status is {}, not liveness",
                proposal.proposal_id, proposal.status
            )));
        }
        if !finalization_due(now_secs(), proposal.liveness_expiry) {
            return Err(ResolutionError::PreconditionNotMet(format!(
                "liveness window for proposal {} open until {}",
                proposal.proposal_id, proposal.liveness_expiry
            )));
        }
        // disputes are re-read at execution time; a dispute that raced the
        // timer fails the gate here
        let disputes = self
            .peers
            .disputes
            .disputes_for(&proposal.proposal_id)
            .await?;
        if !disputes.is_empty() {
            return Err(ResolutionError::PreconditionNotMet(format!(
                "proposal {} has {} open dispute(s)",
                proposal.proposal_id,
                disputes.len()
            )));
        }
        Ok(())
    }

    /// Invoked when a settlement job fires: settle on-chain, distribute
    /// rewards (best-effort), move to SETTLED and purge cache entries.
    pub async fn settle_event(&self, event_id: &str) -> ResolutionResult<()> {
        let event = self.fetch_event(event_id).await?;
        if event.status != ResolutionState::Resolved {
            return Err(ResolutionError::PreconditionNotMet(format!(
                "event {} is {}, not RESOLVED",
                event_id, event.status
            )));
        }

        // Retried settlements must not double-submit: skip the transaction
        // when the contract already shows the event settled.
        let chain_state = self.chain.get_event(event_id).await?;
        if chain_state.settled {
            info!(
                "[Orchestrator] Event {} already settled on-chain, skipping transaction",
                event_id
            );
        } else {
            let tx_hash = self.chain.settle_event(event_id).await?;
            info!(
                "[Orchestrator] Event {} settled on-chain (tx {})",
                event_id, tx_hash
            );
        }

        if let Err(e) = self.peers.rewards.distribute(event_id).await {
            warn!(
                "[Orchestrator] Reward distribution failed for event {}: {}",
                event_id, e
            );
        }

        self.transition_event(&event, ResolutionState::Settled)
            .await?;
        self.purge_event_cache(event_id).await;
        Ok(())
    }

    /// Settle a batch of events concurrently, reporting successes and
    /// failures without aborting on partial failure.
    pub async fn settle_batch(&self, event_ids: &[String]) -> BatchSettlementReport {
        let tasks = event_ids.iter().map(|event_id| async move {
            let result = self.settle_event(event_id).await;
            (event_id.clone(), result)
        });
        let mut report = BatchSettlementReport::default();
        for (event_id, result) in join_all(tasks).await {
            match result {
                Ok(()) => report.successful += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "[Orchestrator] Batch settlement failed for event {}: {}",
                        event_id, e
                    );
                }
            }
        }
        info!(
            "[Orchestrator] Batch settlement done: {} successful, {} failed",
            report.successful, report.failed
        );
        report
    }

    /// Re-enter the liveness window after arbitration sides with the
    /// proposer: clear the cancellation flag and arm a fresh timer.
    pub async fn resume_after_arbitration(&self, proposal_id: &str) -> ResolutionResult<()> {
        let proposal = self.fetch_proposal(proposal_id).await?;
        let event = self.fetch_event(&proposal.event_id).await?;
        self.transition_event(&event, ResolutionState::Liveness)
            .await?;
        self.cancelled.write().await.remove(proposal_id);
        self.schedule_liveness_check(proposal_id, &proposal.event_id, proposal.liveness_expiry)
            .await;
        Ok(())
    }

    /// Inject a chain-observed state into the event record. A transition
    /// the table rejects means chain and engine genuinely diverged; that
    /// raises an alarm and surfaces the error.
    pub async fn reconcile_from_chain(
        &self,
        event_id: &str,
        observed: ResolutionState,
    ) -> ResolutionResult<()> {
        let event = self.fetch_event(event_id).await?;
        if event.status == observed {
            return Ok(());
        }
        match self.transition_event(&event, observed).await {
            Err(e @ ResolutionError::InvalidTransition { .. }) => {
                self.metrics.state_divergence_alarms.inc();
                error!(
                    "[Orchestrator] State divergence for event {}: stored {}, chain says {}",
                    event_id, event.status, observed
                );
                Err(e)
            }
            other => other,
        }
    }

    async fn purge_event_cache(&self, event_id: &str) {
        self.cache.delete(&event_cache_key(event_id)).await;
        for key in self
            .cache
            .keys(&format!("proposal:*:{}", event_id))
            .await
        {
            self.cache.delete(&key).await;
        }
    }
}
