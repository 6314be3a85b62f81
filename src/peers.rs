// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP clients for the engine's peer services.
//!
//! The event-manager owns the canonical event record; the proposal and
//! dispute services mirror on-chain state; reward distribution and
//! arbitrator notification are best-effort side channels (their failures
//! are the caller's to swallow).

use crate::error::{ResolutionError, ResolutionResult};
use crate::metrics::ResolutionMetrics;
use crate::types::{now_secs, ChainEventRecord, Dispute, Event, Proposal, ResolutionState};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;

#[async_trait]
pub trait EventManagerApi: Send + Sync {
    async fn get_event(&self, event_id: &str) -> ResolutionResult<Event>;
    /// Conditional state write: the peer applies
    /// `status := new WHERE status = expected` and answers 409/412 when the
    /// stored status no longer matches.
    async fn update_status(
        &self,
        event_id: &str,
        status: ResolutionState,
        expected: ResolutionState,
    ) -> ResolutionResult<()>;
    async fn ingest_chain_event(&self, record: &ChainEventRecord) -> ResolutionResult<()>;
}

#[async_trait]
pub trait ProposalApi: Send + Sync {
    async fn get_proposal(&self, proposal_id: &str) -> ResolutionResult<Proposal>;
}

#[async_trait]
pub trait DisputeApi: Send + Sync {
    async fn disputes_for(&self, proposal_id: &str) -> ResolutionResult<Vec<Dispute>>;
}

#[async_trait]
pub trait RewardApi: Send + Sync {
    async fn distribute(&self, event_id: &str) -> ResolutionResult<()>;
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn notify_arbitrators(
        &self,
        proposal_id: &str,
        dispute_data: &serde_json::Value,
    ) -> ResolutionResult<()>;
}

/// The full set of peer handles the orchestrator composes over.
#[derive(Clone)]
pub struct PeerSet {
    pub events: Arc<dyn EventManagerApi>,
    pub proposals: Arc<dyn ProposalApi>,
    pub disputes: Arc<dyn DisputeApi>,
    pub rewards: Arc<dyn RewardApi>,
    pub notifications: Arc<dyn NotificationApi>,
}

fn is_conflict(status: StatusCode) -> bool {
    status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED
}

struct PeerHttp {
    peer: &'static str,
    base: String,
    http: Client,
    metrics: Arc<ResolutionMetrics>,
}

impl PeerHttp {
    fn new(peer: &'static str, base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            peer,
            base: base.trim_end_matches('/').to_string(),
            http,
            metrics,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn error(&self, message: String) -> ResolutionError {
        self.metrics
            .peer_http_errors
            .with_label_values(&[self.peer])
            .inc();
        ResolutionError::PeerHttp {
            peer: self.peer,
            message,
        }
    }

    async fn expect_success(&self, resp: reqwest::Response) -> ResolutionResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(self.error(format!("status {}: {}", status, body)))
        }
    }
}

pub struct EventManagerClient {
    inner: PeerHttp,
}

impl EventManagerClient {
    pub fn new(base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: PeerHttp::new("event-manager", base, http, metrics),
        }
    }
}

#[async_trait]
impl EventManagerApi for EventManagerClient {
    async fn get_event(&self, event_id: &str) -> ResolutionResult<Event> {
        let url = self.inner.url(&format!("/events/{}", event_id));
        let resp = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        let resp = self.inner.expect_success(resp).await?;
        resp.json::<Event>()
            .await
            .map_err(|e| self.inner.error(format!("bad event body: {}", e)))
    }

    async fn update_status(
        &self,
        event_id: &str,
        status: ResolutionState,
        expected: ResolutionState,
    ) -> ResolutionResult<()> {
        let url = self.inner.url(&format!("/events/{}", event_id));
        let body = json!({
            "status": status,
            "expectedStatus": expected,
            "updatedAt": now_secs(),
        });
        let resp = self
            .inner
            .http
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        if is_conflict(resp.status()) {
            return Err(ResolutionError::ConditionalUpdateConflict {
                event_id: event_id.to_string(),
                expected,
            });
        }
        self.inner.expect_success(resp).await.map(|_| ())
    }

    async fn ingest_chain_event(&self, record: &ChainEventRecord) -> ResolutionResult<()> {
        let url = self.inner.url("/events/blockchain");
        let resp = self
            .inner
            .http
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        self.inner.expect_success(resp).await.map(|_| ())
    }
}

pub struct ProposalClient {
    inner: PeerHttp,
}

impl ProposalClient {
    pub fn new(base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: PeerHttp::new("proposal", base, http, metrics),
        }
    }
}

#[async_trait]
impl ProposalApi for ProposalClient {
    async fn get_proposal(&self, proposal_id: &str) -> ResolutionResult<Proposal> {
        let url = self.inner.url(&format!("/proposals/{}", proposal_id));
        let resp = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        let resp = self.inner.expect_success(resp).await?;
        resp.json::<Proposal>()
            .await
            .map_err(|e| self.inner.error(format!("bad proposal body: {}", e)))
    }
}

pub struct DisputeClient {
    inner: PeerHttp,
}

impl DisputeClient {
    pub fn new(base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: PeerHttp::new("dispute", base, http, metrics),
        }
    }
}

#[async_trait]
impl DisputeApi for DisputeClient {
    async fn disputes_for(&self, proposal_id: &str) -> ResolutionResult<Vec<Dispute>> {
        let url = self
            .inner
            .url(&format!("/disputes?proposalId={}", proposal_id));
        let resp = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        let resp = self.inner.expect_success(resp).await?;
        resp.json::<Vec<Dispute>>()
            .await
            .map_err(|e| self.inner.error(format!("bad disputes body: {}", e)))
    }
}

pub struct RewardClient {
    inner: PeerHttp,
}

impl RewardClient {
    pub fn new(base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: PeerHttp::new("reward", base, http, metrics),
        }
    }
}

#[async_trait]
impl RewardApi for RewardClient {
    async fn distribute(&self, event_id: &str) -> ResolutionResult<()> {
        let url = self.inner.url("/distribute");
        let resp = self
            .inner
            .http
            .post(&url)
            .json(&json!({ "eventId": event_id }))
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        self.inner.expect_success(resp).await.map(|_| ())
    }
}

pub struct NotificationClient {
    inner: PeerHttp,
}

impl NotificationClient {
    pub fn new(base: &str, http: Client, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: PeerHttp::new("notification", base, http, metrics),
        }
    }
}

#[async_trait]
impl NotificationApi for NotificationClient {
    async fn notify_arbitrators(
        &self,
        proposal_id: &str,
        dispute_data: &serde_json::Value,
    ) -> ResolutionResult<()> {
        let url = self.inner.url("/notify-arbitrators");
        let body = json!({
            "proposalId": proposal_id,
            "disputeData": dispute_data,
        });
        let resp = self
            .inner
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.inner.error(e.to_string()))?;
        self.inner.expect_success(resp).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building_strips_trailing_slash() {
        let metrics = Arc::new(ResolutionMetrics::new_for_testing());
        let peer = PeerHttp::new(
            "event-manager",
            "http://localhost:3001/",
            Client::new(),
            metrics,
        );
        assert_eq!(
            peer.url("/events/e1"),
            "http://localhost:3001/events/e1"
        );
    }

    #[test]
    fn test_conflict_statuses() {
        assert!(is_conflict(StatusCode::CONFLICT));
        assert!(is_conflict(StatusCode::PRECONDITION_FAILED));
        assert!(!is_conflict(StatusCode::OK));
        assert!(!is_conflict(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_conflict(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_peer_error_increments_metric() {
        let metrics = Arc::new(ResolutionMetrics::new_for_testing());
        let peer = PeerHttp::new(
            "reward",
            "http://localhost:3004",
            Client::new(),
            metrics.clone(),
        );
        let err = peer.error("status 503".to_string());
        assert_eq!(err.error_type(), "peer_http_error");
        assert_eq!(
            metrics
                .peer_http_errors
                .get_metric_with_label_values(&["reward"])
                .unwrap()
                .get(),
            1
        );
    }
}
