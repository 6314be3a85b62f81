// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain adapter: proposal submission, finalization and settlement against
//! the oracle contract suite, plus the read surface the indexer polls.
//!
//! All transaction sends go through a single wallet, so they are serialized
//! behind one mutex to keep nonce issuance in order. Every send waits for
//! one confirmation before returning.

use crate::abi::{
    EventCreatedFilter, OracleRegistry, ProposalFinalizedFilter, ProposalManager,
    ProposalSubmittedFilter, StakingManager,
};
use crate::error::{ResolutionError, ResolutionResult};
use crate::metrics::ResolutionMetrics;
use crate::types::{now_secs, ChainEventRecord, IndexedChainEvent, ProposalData};
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::{ContractCall, ContractError, EthEvent};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer, Wallet};
use ethers::types::{Address as EthAddress, Filter, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Fallback liveness window when the contract's emitted expiry is absent
pub const LIVENESS_WINDOW_SECS: u64 = 2 * 60 * 60;

pub type EngineSigner = SignerMiddleware<Provider<Http>, Wallet<SigningKey>>;

/// Result of a confirmed proposal submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedProposal {
    pub proposal_id: String,
    pub transaction_hash: String,
    /// Unix seconds; taken from the contract's ProposalSubmitted event when
    /// the receipt carries it
    pub liveness_expiry: u64,
}

/// Read-only event state from the oracle registry
#[derive(Debug, Clone)]
pub struct ChainEventState {
    pub description: String,
    pub resolution_time: u64,
    pub status: u8,
    pub outcome_hash: String,
    pub reward_pool: u128,
    pub settled: bool,
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn submit_proposal(
        &self,
        event_id: &str,
        data: &ProposalData,
    ) -> ResolutionResult<SubmittedProposal>;
    async fn finalize_proposal(&self, proposal_id: &str) -> ResolutionResult<String>;
    async fn settle_event(&self, event_id: &str) -> ResolutionResult<String>;
    async fn get_event(&self, event_id: &str) -> ResolutionResult<ChainEventState>;
}

/// Read surface for the indexer
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn head_block(&self) -> ResolutionResult<u64>;
    async fn fetch_events(&self, from: u64, to: u64) -> ResolutionResult<Vec<IndexedChainEvent>>;
}

pub struct ChainAdapter {
    signer: Arc<EngineSigner>,
    oracle_registry: OracleRegistry<EngineSigner>,
    proposal_manager: ProposalManager<EngineSigner>,
    #[allow(dead_code)]
    staking_manager: StakingManager<EngineSigner>,
    submission_guard: Mutex<()>,
    metrics: Arc<ResolutionMetrics>,
}

impl ChainAdapter {
    /// One-shot initialization: connect the provider, authenticate the
    /// wallet against the detected chain id, bind the three contracts.
    /// A failure here is fatal to startup.
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        oracle_registry_address: EthAddress,
        proposal_manager_address: EthAddress,
        staking_manager_address: EthAddress,
        metrics: Arc<ResolutionMetrics>,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let chain_id = provider.get_chainid().await?;
        let wallet: LocalWallet = private_key.parse()?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let wallet_address = wallet.address();
        let signer = Arc::new(SignerMiddleware::new(provider, wallet));

        let head = signer.get_block_number().await?;
        info!(
            "ChainAdapter connected: chain_id={}, wallet={:?}, head_block={}",
            chain_id, wallet_address, head
        );

        Ok(Self {
            oracle_registry: OracleRegistry::new(oracle_registry_address, signer.clone()),
            proposal_manager: ProposalManager::new(proposal_manager_address, signer.clone()),
            staking_manager: StakingManager::new(staking_manager_address, signer.clone()),
            signer,
            submission_guard: Mutex::new(()),
            metrics,
        })
    }

    async fn send_and_confirm(
        &self,
        method: &'static str,
        call: ContractCall<EngineSigner, ()>,
    ) -> ResolutionResult<TransactionReceipt> {
        let _guard = self.submission_guard.lock().await;
        let timer = self
            .metrics
            .chain_call_latency
            .with_label_values(&[method])
            .start_timer();

        let pending = call.send().await.map_err(|e| {
            self.metrics.chain_tx_failed.with_label_values(&[method]).inc();
            classify_contract_error(e)
        })?;
        let receipt = pending
            .confirmations(1)
            .await
            .map_err(|e| {
                self.metrics.chain_tx_failed.with_label_values(&[method]).inc();
                ResolutionError::TransientChain(e.to_string())
            })?
            .ok_or_else(|| {
                self.metrics.chain_tx_failed.with_label_values(&[method]).inc();
                ResolutionError::TransientChain("transaction dropped from mempool".to_string())
            })?;

        timer.observe_duration();
        self.metrics
            .chain_tx_submitted
            .with_label_values(&[method])
            .inc();
        Ok(receipt)
    }
}

#[async_trait]
impl ChainApi for ChainAdapter {
    async fn submit_proposal(
        &self,
        event_id: &str,
        data: &ProposalData,
    ) -> ResolutionResult<SubmittedProposal> {
        let submitted_at = now_secs();
        let proposal_id = derive_proposal_id(event_id, submitted_at);
        let outcome_bytes = serde_json::to_vec(&data.outcome)
            .map_err(|e| ResolutionError::Serialization(e.to_string()))?;
        let outcome_hash = H256::from(keccak256(&outcome_bytes));

        let call = self
            .proposal_manager
            .submit_proposal(
                event_id_bytes(event_id),
                proposal_id.0,
                outcome_hash.0,
                outcome_bytes.into(),
                confidence_to_bps(data.confidence_score),
                data.evidence_uri.clone().unwrap_or_default(),
            )
            .value(U256::from(data.bond_amount));
        let receipt = self.send_and_confirm("submit_proposal", call).await?;

        // The contract's emitted expiry is authoritative; local clock
        // arithmetic is the fallback for receipts without the log.
        let liveness_expiry = receipt
            .logs
            .iter()
            .find_map(|log| {
                let raw = RawLog {
                    topics: log.topics.clone(),
                    data: log.data.to_vec(),
                };
                ProposalSubmittedFilter::decode_log(&raw)
                    .ok()
                    .map(|ev| ev.liveness_expiry.low_u64())
            })
            .unwrap_or_else(|| {
                warn!(
                    "No ProposalSubmitted log in receipt for event {}, using local expiry",
                    event_id
                );
                submitted_at + LIVENESS_WINDOW_SECS
            });

        Ok(SubmittedProposal {
            proposal_id: format!("{:?}", proposal_id),
            transaction_hash: format!("{:?}", receipt.transaction_hash),
            liveness_expiry,
        })
    }

    async fn finalize_proposal(&self, proposal_id: &str) -> ResolutionResult<String> {
        let id = parse_h256(proposal_id)?;
        let call = self.proposal_manager.finalize_proposal(id.0);
        let receipt = self.send_and_confirm("finalize_proposal", call).await?;
        Ok(format!("{:?}", receipt.transaction_hash))
    }

    async fn settle_event(&self, event_id: &str) -> ResolutionResult<String> {
        let call = self.oracle_registry.settle_event(event_id_bytes(event_id));
        let receipt = self.send_and_confirm("settle_event", call).await?;
        Ok(format!("{:?}", receipt.transaction_hash))
    }

    async fn get_event(&self, event_id: &str) -> ResolutionResult<ChainEventState> {
        let timer = self
            .metrics
            .chain_call_latency
            .with_label_values(&["get_event"])
            .start_timer();
        let (description, resolution_time, status, outcome_hash, reward_pool, settled) = self
            .oracle_registry
            .get_event(event_id_bytes(event_id))
            .call()
            .await
            .map_err(classify_contract_error)?;
        timer.observe_duration();
        Ok(ChainEventState {
            description,
            resolution_time: resolution_time.low_u64(),
            status,
            outcome_hash: format!("{:?}", H256::from(outcome_hash)),
            reward_pool: reward_pool.low_u128(),
            settled,
        })
    }
}

#[async_trait]
impl ChainReader for ChainAdapter {
    async fn head_block(&self) -> ResolutionResult<u64> {
        self.signer
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| ResolutionError::TransientChain(e.to_string()))
    }

    async fn fetch_events(&self, from: u64, to: u64) -> ResolutionResult<Vec<IndexedChainEvent>> {
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(vec![
                self.oracle_registry.address(),
                self.proposal_manager.address(),
            ]);
        let logs = self
            .signer
            .get_logs(&filter)
            .await
            .map_err(|e| ResolutionError::TransientChain(e.to_string()))?;

        let mut events = Vec::new();
        for log in logs {
            let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
            let transaction_hash = format!("{:?}", log.transaction_hash.unwrap_or_default());
            let raw = RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            };
            if let Ok(ev) = EventCreatedFilter::decode_log(&raw) {
                events.push(IndexedChainEvent::EventCreated(ChainEventRecord {
                    event_id: format!("{:?}", H256::from(ev.event_id)),
                    description: ev.description.clone(),
                    resolution_time: ev.resolution_time.low_u64(),
                    block_number,
                    transaction_hash,
                }));
            } else if let Ok(ev) = ProposalSubmittedFilter::decode_log(&raw) {
                events.push(IndexedChainEvent::ProposalSubmitted {
                    event_id: format!("{:?}", H256::from(ev.event_id)),
                    proposal_id: format!("{:?}", H256::from(ev.proposal_id)),
                    block_number,
                    transaction_hash,
                });
            } else if let Ok(ev) = ProposalFinalizedFilter::decode_log(&raw) {
                events.push(IndexedChainEvent::ProposalFinalized {
                    event_id: format!("{:?}", H256::from(ev.event_id)),
                    proposal_id: format!("{:?}", H256::from(ev.proposal_id)),
                    block_number,
                    transaction_hash,
                });
            }
            // other oracle logs are not actionable for the engine
        }
        Ok(events)
    }
}

/// Content-address an opaque event id to the `bytes32` the contracts use
pub fn event_id_bytes(event_id: &str) -> [u8; 32] {
    keccak256(event_id.as_bytes())
}

/// `proposal_id = keccak256(event_id || submission_timestamp)`
pub fn derive_proposal_id(event_id: &str, submitted_at: u64) -> H256 {
    let mut buf = Vec::with_capacity(event_id.len() + 8);
    buf.extend_from_slice(event_id.as_bytes());
    buf.extend_from_slice(&submitted_at.to_be_bytes());
    H256::from(keccak256(&buf))
}

fn confidence_to_bps(confidence: f64) -> U256 {
    U256::from((confidence.clamp(0.0, 1.0) * 10_000.0).round() as u64)
}

fn parse_h256(hex: &str) -> ResolutionResult<H256> {
    hex.parse::<H256>()
        .map_err(|e| ResolutionError::Internal(format!("invalid 32-byte hex id {}: {}", hex, e)))
}

fn classify_contract_error(e: ContractError<EngineSigner>) -> ResolutionError {
    if e.is_revert() {
        return ResolutionError::PermanentChain(e.to_string());
    }
    let text = e.to_string().to_lowercase();
    if text.contains("insufficient funds") || text.contains("invalid opcode") {
        ResolutionError::PermanentChain(e.to_string())
    } else {
        // Timeouts, connection resets, nonce collisions: retryable
        ResolutionError::TransientChain(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_proposal_id_is_deterministic() {
        let a = derive_proposal_id("event-1", 1_700_000_000);
        let b = derive_proposal_id("event-1", 1_700_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_proposal_id_depends_on_both_inputs() {
        let base = derive_proposal_id("event-1", 1_700_000_000);
        assert_ne!(base, derive_proposal_id("event-2", 1_700_000_000));
        assert_ne!(base, derive_proposal_id("event-1", 1_700_000_001));
    }

    #[test]
    fn test_event_id_bytes_matches_keccak() {
        assert_eq!(event_id_bytes("e1"), keccak256(b"e1"));
    }

    #[test]
    fn test_proposal_id_hex_round_trip() {
        let id = derive_proposal_id("e1", 42);
        let text = format!("{:?}", id);
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(parse_h256(&text).unwrap(), id);
        assert!(parse_h256("0x1234").is_err());
    }

    #[test]
    fn test_confidence_to_bps() {
        assert_eq!(confidence_to_bps(0.0), U256::zero());
        assert_eq!(confidence_to_bps(0.925), U256::from(9250u64));
        assert_eq!(confidence_to_bps(1.0), U256::from(10_000u64));
        // out-of-range inputs clamp
        assert_eq!(confidence_to_bps(7.5), U256::from(10_000u64));
        assert_eq!(confidence_to_bps(-1.0), U256::zero());
    }

    #[test]
    fn test_outcome_hash_is_over_serialized_form() {
        let outcome = serde_json::json!({"winner": "A"});
        let bytes = serde_json::to_vec(&outcome).unwrap();
        let expected = H256::from(keccak256(&bytes));
        // same value re-serialized hashes identically
        let again = H256::from(keccak256(&serde_json::to_vec(&outcome).unwrap()));
        assert_eq!(expected, again);
    }
}
