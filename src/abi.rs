// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract bindings for the oracle suite.
//!
//! The engine talks to three contracts, selected by logical name:
//! the oracle registry (event records and settlement), the proposal
//! manager (submission, dispute bookkeeping, finalization) and the
//! staking manager (bond custody).

use ethers::contract::abigen;

abigen!(
    OracleRegistry,
    r#"[
        function settleEvent(bytes32 eventId) external
        function getEvent(bytes32 eventId) external view returns (string description, uint256 resolutionTime, uint8 status, bytes32 outcomeHash, uint256 rewardPool, bool settled)
        event EventCreated(bytes32 indexed eventId, string description, uint256 resolutionTime)
        event EventSettled(bytes32 indexed eventId, uint256 rewardPool)
    ]"#
);

abigen!(
    ProposalManager,
    r#"[
        function submitProposal(bytes32 eventId, bytes32 proposalId, bytes32 outcomeHash, bytes outcome, uint256 confidenceScore, string evidenceURI) external payable
        function finalizeProposal(bytes32 proposalId) external
        event ProposalSubmitted(bytes32 indexed proposalId, bytes32 indexed eventId, address proposer, uint256 bondAmount, uint256 livenessExpiry)
        event ProposalDisputed(bytes32 indexed proposalId, bytes32 indexed eventId, address disputer)
        event ProposalFinalized(bytes32 indexed proposalId, bytes32 indexed eventId, bytes32 outcomeHash)
    ]"#
);

abigen!(
    StakingManager,
    r#"[
        function bondOf(bytes32 proposalId) external view returns (uint256)
        event BondSlashed(bytes32 indexed proposalId, address indexed staker, uint256 amount)
    ]"#
);
