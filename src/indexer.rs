// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain indexer: polls the chain, extracts oracle contract events from a
//! block range and feeds them back into the engine.
//!
//! The cursor advances only after a whole batch lands; a partial failure
//! re-processes the entire range next tick and the event-manager peer
//! deduplicates by `(event_id, transaction_hash)`.

use crate::chain::ChainReader;
use crate::error::{ResolutionError, ResolutionResult};
use crate::metrics::ResolutionMetrics;
use crate::orchestrator::ResolutionOrchestrator;
use crate::peers::EventManagerApi;
use crate::retry_with_max_elapsed_time;
use crate::types::{IndexedChainEvent, ResolutionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const RPC_MAX_RETRY_DURATION: Duration = Duration::from_secs(8);
/// Bounded replay on cold start: seed the cursor this many blocks behind head
const REPLAY_WINDOW: u64 = 100;

pub struct ChainIndexer {
    reader: Arc<dyn ChainReader>,
    events: Arc<dyn EventManagerApi>,
    orchestrator: Arc<ResolutionOrchestrator>,
    last_indexed_block: Option<u64>,
    poll_interval: Duration,
    metrics: Arc<ResolutionMetrics>,
}

impl ChainIndexer {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        events: Arc<dyn EventManagerApi>,
        orchestrator: Arc<ResolutionOrchestrator>,
        metrics: Arc<ResolutionMetrics>,
    ) -> Self {
        Self {
            reader,
            events,
            orchestrator,
            last_indexed_block: None,
            poll_interval: POLL_INTERVAL,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_poll_interval(&mut self, poll_interval: Duration) {
        self.poll_interval = poll_interval;
    }

    pub fn last_indexed_block(&self) -> Option<u64> {
        self.last_indexed_block
    }

    /// Process one `[last + 1, head]` range. The cursor only moves when the
    /// whole batch was handled.
    pub async fn tick(&mut self) -> ResolutionResult<()> {
        let head = match retry_with_max_elapsed_time!(
            self.reader.head_block(),
            RPC_MAX_RETRY_DURATION
        ) {
            Ok(Ok(head)) => head,
            _ => {
                return Err(ResolutionError::TransientChain(
                    "failed to read chain head after retry".to_string(),
                ))
            }
        };

        let last = match self.last_indexed_block {
            Some(last) => last,
            None => {
                let seed = head.saturating_sub(REPLAY_WINDOW);
                info!(
                    "[Indexer] Cold start: seeding cursor at block {} (head {})",
                    seed, head
                );
                self.last_indexed_block = Some(seed);
                seed
            }
        };

        let from = last + 1;
        let to = head;
        if to < from {
            debug!("[Indexer] No new blocks (head {}, cursor {})", head, last);
            return Ok(());
        }

        let batch = match retry_with_max_elapsed_time!(
            self.reader.fetch_events(from, to),
            RPC_MAX_RETRY_DURATION
        ) {
            Ok(Ok(batch)) => batch,
            _ => {
                return Err(ResolutionError::TransientChain(format!(
                    "failed to fetch events in [{}, {}] after retry",
                    from, to
                )))
            }
        };

        debug!(
            "[Indexer] Processing {} event(s) in blocks [{}, {}]",
            batch.len(),
            from,
            to
        );
        for event in batch {
            self.process_chain_event(event).await?;
        }

        self.last_indexed_block = Some(to);
        self.metrics.last_indexed_block.set(to as i64);
        Ok(())
    }

    async fn process_chain_event(&self, event: IndexedChainEvent) -> ResolutionResult<()> {
        match event {
            IndexedChainEvent::EventCreated(record) => {
                self.metrics
                    .indexer_events
                    .with_label_values(&["event-created"])
                    .inc();
                // Ingest is the critical duty: failure keeps the cursor so
                // the range replays next tick
                self.events.ingest_chain_event(&record).await?;
                debug!(
                    "[Indexer] Ingested EventCreated for {} (tx {})",
                    record.event_id, record.transaction_hash
                );
                Ok(())
            }
            IndexedChainEvent::ProposalSubmitted {
                event_id,
                proposal_id,
                ..
            } => {
                self.metrics
                    .indexer_events
                    .with_label_values(&["proposal-submitted"])
                    .inc();
                self.reconcile(&event_id, &proposal_id, ResolutionState::Liveness)
                    .await;
                Ok(())
            }
            IndexedChainEvent::ProposalFinalized {
                event_id,
                proposal_id,
                ..
            } => {
                self.metrics
                    .indexer_events
                    .with_label_values(&["proposal-finalized"])
                    .inc();
                self.reconcile(&event_id, &proposal_id, ResolutionState::Resolved)
                    .await;
                Ok(())
            }
        }
    }

    /// Repair the event record toward the chain-observed state. Repair is
    /// best-effort: a record the manager doesn't know, a concurrent writer
    /// or a genuine divergence must not wedge the cursor.
    async fn reconcile(&self, event_id: &str, proposal_id: &str, observed: ResolutionState) {
        match self.orchestrator.reconcile_from_chain(event_id, observed).await {
            Ok(()) => {}
            Err(ResolutionError::InvalidTransition { .. }) => {
                // already alarmed by the orchestrator
            }
            Err(e) => {
                warn!(
                    "[Indexer] Could not reconcile event {} (proposal {}) to {}: {}",
                    event_id, proposal_id, observed, e
                );
            }
        }
    }

    /// Run the polling loop until cancelled.
    pub fn run(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[Indexer] Starting with poll interval {:?}",
                self.poll_interval
            );
            let mut interval = time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[Indexer] Cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            self.metrics.indexer_tick_failures.inc();
                            error!("[Indexer] Tick failed, will re-process range: {}", e);
                        }
                    }
                }
            }
        })
    }
}
