// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::ChainAdapter;
use crate::metrics::ResolutionMetrics;
use crate::peers::{
    DisputeClient, EventManagerClient, NotificationClient, PeerSet, ProposalClient, RewardClient,
};
use anyhow::anyhow;
use ethers::types::Address as EthAddress;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

const PEER_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    // Rpc url for the BNB chain fullnode, used for queries and transactions.
    pub bnb_rpc_url: String,
    // Hex private key of the engine wallet.
    pub private_key: String,
    pub oracle_registry_address: String,
    pub proposal_manager_address: String,
    pub staking_manager_address: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeerServicesConfig {
    pub event_manager_url: String,
    pub proposal_service_url: String,
    pub dispute_service_url: String,
    pub reward_service_url: String,
    pub notification_service_url: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolutionNodeConfig {
    pub chain: ChainConfig,
    pub peers: PeerServicesConfig,
    // Transport config handed to the cache and queue backends in deployment
    pub redis: RedisConfig,
    pub postgres: PostgresConfig,
    pub node_env: String,
}

fn required(key: &'static str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required configuration key {}", key))
}

fn required_port(key: &'static str) -> anyhow::Result<u16> {
    let raw = required(key)?;
    raw.parse()
        .map_err(|_| anyhow!("configuration key {} is not a valid port: {}", key, raw))
}

impl ResolutionNodeConfig {
    /// Load the full configuration from the environment. Every key is
    /// required; a missing one is fatal at startup.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            chain: ChainConfig {
                bnb_rpc_url: required("BNB_RPC_URL")?,
                private_key: required("PRIVATE_KEY")?,
                oracle_registry_address: required("ORACLE_REGISTRY_ADDRESS")?,
                proposal_manager_address: required("PROPOSAL_MANAGER_ADDRESS")?,
                staking_manager_address: required("STAKING_MANAGER_ADDRESS")?,
            },
            peers: PeerServicesConfig {
                event_manager_url: required("EVENT_MANAGER_URL")?,
                proposal_service_url: required("PROPOSAL_SERVICE_URL")?,
                dispute_service_url: required("DISPUTE_SERVICE_URL")?,
                reward_service_url: required("REWARD_SERVICE_URL")?,
                notification_service_url: required("NOTIFICATION_SERVICE_URL")?,
            },
            redis: RedisConfig {
                host: required("REDIS_HOST")?,
                port: required_port("REDIS_PORT")?,
                password: required("REDIS_PASSWORD")?,
            },
            postgres: PostgresConfig {
                host: required("POSTGRES_HOST")?,
                port: required_port("POSTGRES_PORT")?,
                user: required("POSTGRES_USER")?,
                password: required("POSTGRES_PASSWORD")?,
                name: required("POSTGRES_NAME")?,
            },
            node_env: required("NODE_ENV")?,
        })
    }

    /// Construct the live clients this config describes: a connected chain
    /// adapter and the five peer handles.
    pub async fn validate(
        &self,
        metrics: Arc<ResolutionMetrics>,
    ) -> anyhow::Result<ResolutionServerConfig> {
        info!("Starting config validation (env {})", self.node_env);

        let oracle_registry = parse_address("ORACLE_REGISTRY_ADDRESS", &self.chain.oracle_registry_address)?;
        let proposal_manager = parse_address("PROPOSAL_MANAGER_ADDRESS", &self.chain.proposal_manager_address)?;
        let staking_manager = parse_address("STAKING_MANAGER_ADDRESS", &self.chain.staking_manager_address)?;

        for (key, value) in [
            ("EVENT_MANAGER_URL", &self.peers.event_manager_url),
            ("PROPOSAL_SERVICE_URL", &self.peers.proposal_service_url),
            ("DISPUTE_SERVICE_URL", &self.peers.dispute_service_url),
            ("REWARD_SERVICE_URL", &self.peers.reward_service_url),
            (
                "NOTIFICATION_SERVICE_URL",
                &self.peers.notification_service_url,
            ),
        ] {
            Url::parse(value).map_err(|e| anyhow!("{} is not a valid url ({}): {}", key, value, e))?;
        }

        let chain = Arc::new(
            ChainAdapter::connect(
                &self.chain.bnb_rpc_url,
                &self.chain.private_key,
                oracle_registry,
                proposal_manager,
                staking_manager,
                metrics.clone(),
            )
            .await?,
        );

        let http = reqwest::Client::builder()
            .timeout(PEER_HTTP_TIMEOUT)
            .build()?;
        let peers = PeerSet {
            events: Arc::new(EventManagerClient::new(
                &self.peers.event_manager_url,
                http.clone(),
                metrics.clone(),
            )),
            proposals: Arc::new(ProposalClient::new(
                &self.peers.proposal_service_url,
                http.clone(),
                metrics.clone(),
            )),
            disputes: Arc::new(DisputeClient::new(
                &self.peers.dispute_service_url,
                http.clone(),
                metrics.clone(),
            )),
            rewards: Arc::new(RewardClient::new(
                &self.peers.reward_service_url,
                http.clone(),
                metrics.clone(),
            )),
            notifications: Arc::new(NotificationClient::new(
                &self.peers.notification_service_url,
                http,
                metrics,
            )),
        };

        info!("Config validation complete");
        Ok(ResolutionServerConfig { chain, peers })
    }
}

fn parse_address(key: &'static str, raw: &str) -> anyhow::Result<EthAddress> {
    EthAddress::from_str(raw).map_err(|e| anyhow!("{} is not a valid address ({}): {}", key, raw, e))
}

pub struct ResolutionServerConfig {
    pub chain: Arc<ChainAdapter>,
    pub peers: PeerSet,
}
