// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Composition root: constructs every component with its dependencies,
//! registers the queue workers as typed handlers and spawns the indexer.

use crate::cache::{Cache, MemoryCache};
use crate::chain::{ChainApi, ChainReader};
use crate::config::ResolutionNodeConfig;
use crate::error::{ResolutionError, ResolutionResult};
use crate::indexer::ChainIndexer;
use crate::metrics::{start_metrics_server, ResolutionMetrics};
use crate::orchestrator::ResolutionOrchestrator;
use crate::scheduler::{
    Job, JobHandler, JobQueue, JOB_BATCH_SETTLEMENT, JOB_CHECK_LIVENESS, JOB_SETTLE_EVENT,
    LIVENESS_QUEUE, SETTLEMENT_QUEUE,
};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const WORKERS_PER_QUEUE: usize = 2;

/// Worker for the liveness-monitoring queue: a firing job attempts
/// finalization; the gate inside the orchestrator absorbs races.
pub struct LivenessWorker {
    orchestrator: Arc<ResolutionOrchestrator>,
}

#[async_trait]
impl JobHandler for LivenessWorker {
    async fn handle(&self, job: &Job) -> ResolutionResult<()> {
        match job.job_type.as_str() {
            JOB_CHECK_LIVENESS => {
                let proposal_id = job.payload["proposalId"].as_str().ok_or_else(|| {
                    ResolutionError::Serialization(
                        "check-liveness payload missing proposalId".to_string(),
                    )
                })?;
                self.orchestrator.finalize_proposal(proposal_id).await
            }
            other => Err(ResolutionError::Internal(format!(
                "unexpected job type {} on {}",
                other, LIVENESS_QUEUE
            ))),
        }
    }
}

/// Worker for the settlement-processing queue. Batch settlement reports
/// partial failures without failing the job itself.
pub struct SettlementWorker {
    orchestrator: Arc<ResolutionOrchestrator>,
}

#[async_trait]
impl JobHandler for SettlementWorker {
    async fn handle(&self, job: &Job) -> ResolutionResult<()> {
        match job.job_type.as_str() {
            JOB_SETTLE_EVENT => {
                let event_id = job.payload["eventId"].as_str().ok_or_else(|| {
                    ResolutionError::Serialization(
                        "settle-event payload missing eventId".to_string(),
                    )
                })?;
                self.orchestrator.settle_event(event_id).await
            }
            JOB_BATCH_SETTLEMENT => {
                let event_ids: Vec<String> = job.payload["eventIds"]
                    .as_array()
                    .ok_or_else(|| {
                        ResolutionError::Serialization(
                            "batch-settlement payload missing eventIds".to_string(),
                        )
                    })?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                let report = self.orchestrator.settle_batch(&event_ids).await;
                info!(
                    "[SettlementWorker] Batch of {}: {} successful, {} failed",
                    event_ids.len(),
                    report.successful,
                    report.failed
                );
                Ok(())
            }
            other => Err(ResolutionError::Internal(format!(
                "unexpected job type {} on {}",
                other, SETTLEMENT_QUEUE
            ))),
        }
    }
}

pub async fn run_resolution_node(
    config: ResolutionNodeConfig,
    metrics_port: u16,
    prometheus_registry: prometheus::Registry,
) -> anyhow::Result<(Vec<JoinHandle<()>>, CancellationToken)> {
    let metrics = Arc::new(ResolutionMetrics::new(&prometheus_registry));
    let server_config = config.validate(metrics.clone()).await?;

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let liveness_queue = JobQueue::with_metrics(LIVENESS_QUEUE, metrics.clone());
    let settlement_queue = JobQueue::with_metrics(SETTLEMENT_QUEUE, metrics.clone());

    let chain_api: Arc<dyn ChainApi> = server_config.chain.clone();
    let chain_reader: Arc<dyn ChainReader> = server_config.chain.clone();
    let events_api = server_config.peers.events.clone();

    let orchestrator = Arc::new(ResolutionOrchestrator::new(
        chain_api,
        server_config.peers,
        cache,
        liveness_queue.clone(),
        settlement_queue.clone(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    let liveness_handler: Arc<dyn JobHandler> = Arc::new(LivenessWorker {
        orchestrator: orchestrator.clone(),
    });
    let settlement_handler: Arc<dyn JobHandler> = Arc::new(SettlementWorker {
        orchestrator: orchestrator.clone(),
    });
    for _ in 0..WORKERS_PER_QUEUE {
        handles.push(liveness_queue.run_worker(liveness_handler.clone(), cancel.clone()));
        handles.push(settlement_queue.run_worker(settlement_handler.clone(), cancel.clone()));
    }

    let indexer = ChainIndexer::new(chain_reader, events_api, orchestrator, metrics);
    handles.push(indexer.run(cancel.clone()));

    let metrics_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), metrics_port);
    // Detached on purpose: the metrics server has no graceful-shutdown needs
    let _metrics_server = start_metrics_server(metrics_address, prometheus_registry);

    info!(
        "Resolution node started: {} queue workers, indexer polling, metrics on port {}",
        handles.len() - 1,
        metrics_port
    );
    Ok((handles, cancel))
}
