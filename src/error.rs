// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::ResolutionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    // The requested (from -> to) pair is not in the transition table
    InvalidTransition {
        from: ResolutionState,
        to: ResolutionState,
    },
    // A transition guard evaluated false
    GuardFailed {
        from: ResolutionState,
        to: ResolutionState,
    },
    // An operation's precondition does not hold yet (e.g. finalize before expiry).
    // Scheduler retries absorb transient races over this variant.
    PreconditionNotMet(String),
    // Transient chain RPC failure (timeout, connection reset, nonce collision)
    TransientChain(String),
    // Permanent chain failure (revert, insufficient bond); operator intervention
    PermanentChain(String),
    // A peer HTTP service returned an error on the critical path
    PeerHttp {
        peer: &'static str,
        message: String,
    },
    // The event-manager rejected a conditional status write
    ConditionalUpdateConflict {
        event_id: String,
        expected: ResolutionState,
    },
    // Failure to serialize or parse a payload
    Serialization(String),
    // Internal engine error
    Internal(String),
}

impl ResolutionError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ResolutionError::InvalidTransition { .. } => "invalid_transition",
            ResolutionError::GuardFailed { .. } => "guard_failed",
            ResolutionError::PreconditionNotMet(_) => "precondition_not_met",
            ResolutionError::TransientChain(_) => "transient_chain_error",
            ResolutionError::PermanentChain(_) => "permanent_chain_error",
            ResolutionError::PeerHttp { .. } => "peer_http_error",
            ResolutionError::ConditionalUpdateConflict { .. } => "conditional_update_conflict",
            ResolutionError::Serialization(_) => "serialization_error",
            ResolutionError::Internal(_) => "internal_error",
        }
    }

    /// Whether the job scheduler should retry an operation that failed with
    /// this error. Invalid transitions and failed guards reflect a state the
    /// retry cannot change; conditional-update conflicts are resolved by the
    /// next poke or indexer tick, not by replaying the same write.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolutionError::PreconditionNotMet(_)
            | ResolutionError::TransientChain(_)
            | ResolutionError::PeerHttp { .. } => true,
            ResolutionError::InvalidTransition { .. }
            | ResolutionError::GuardFailed { .. }
            | ResolutionError::PermanentChain(_)
            | ResolutionError::ConditionalUpdateConflict { .. }
            | ResolutionError::Serialization(_)
            | ResolutionError::Internal(_) => false,
        }
    }
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::InvalidTransition { from, to } => {
                write!(f, "invalid transition {} -> {}", from, to)
            }
            ResolutionError::GuardFailed { from, to } => {
                write!(f, "guard rejected transition {} -> {}", from, to)
            }
            ResolutionError::PreconditionNotMet(msg) => {
                write!(f, "precondition not met: {}", msg)
            }
            ResolutionError::TransientChain(msg) => write!(f, "transient chain error: {}", msg),
            ResolutionError::PermanentChain(msg) => write!(f, "permanent chain error: {}", msg),
            ResolutionError::PeerHttp { peer, message } => {
                write!(f, "{} peer error: {}", peer, message)
            }
            ResolutionError::ConditionalUpdateConflict { event_id, expected } => {
                write!(
                    f,
                    "conditional update conflict for event {} (expected {})",
                    event_id, expected
                )
            }
            ResolutionError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            ResolutionError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ResolutionError {}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels() {
        let cases: Vec<(ResolutionError, &str)> = vec![
            (
                ResolutionError::InvalidTransition {
                    from: ResolutionState::Resolved,
                    to: ResolutionState::Disputed,
                },
                "invalid_transition",
            ),
            (
                ResolutionError::GuardFailed {
                    from: ResolutionState::Resolved,
                    to: ResolutionState::Settled,
                },
                "guard_failed",
            ),
            (
                ResolutionError::PreconditionNotMet("test".to_string()),
                "precondition_not_met",
            ),
            (
                ResolutionError::TransientChain("test".to_string()),
                "transient_chain_error",
            ),
            (
                ResolutionError::PermanentChain("test".to_string()),
                "permanent_chain_error",
            ),
            (
                ResolutionError::PeerHttp {
                    peer: "event-manager",
                    message: "test".to_string(),
                },
                "peer_http_error",
            ),
            (
                ResolutionError::ConditionalUpdateConflict {
                    event_id: "e1".to_string(),
                    expected: ResolutionState::Liveness,
                },
                "conditional_update_conflict",
            ),
            (
                ResolutionError::Serialization("test".to_string()),
                "serialization_error",
            ),
            (
                ResolutionError::Internal("test".to_string()),
                "internal_error",
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.error_type(), expected, "label for {:?}", error);
        }
    }

    /// error_type values are used as Prometheus label values and must stay
    /// lowercase/underscore only.
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors = vec![
            ResolutionError::PreconditionNotMet("x".to_string()),
            ResolutionError::TransientChain("x".to_string()),
            ResolutionError::Internal("x".to_string()),
        ];
        for error in errors {
            let label = error.error_type();
            assert!(!label.is_empty());
            for c in label.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "label '{}' contains invalid char '{}'",
                    label,
                    c
                );
            }
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }

    #[test]
    fn test_retry_policy() {
        assert!(ResolutionError::PreconditionNotMet("early".to_string()).is_retryable());
        assert!(ResolutionError::TransientChain("timeout".to_string()).is_retryable());
        assert!(ResolutionError::PeerHttp {
            peer: "event-manager",
            message: "503".to_string()
        }
        .is_retryable());

        assert!(!ResolutionError::InvalidTransition {
            from: ResolutionState::Settled,
            to: ResolutionState::Liveness,
        }
        .is_retryable());
        assert!(!ResolutionError::GuardFailed {
            from: ResolutionState::Resolved,
            to: ResolutionState::Settled,
        }
        .is_retryable());
        assert!(!ResolutionError::PermanentChain("revert".to_string()).is_retryable());
        assert!(!ResolutionError::ConditionalUpdateConflict {
            event_id: "e1".to_string(),
            expected: ResolutionState::Liveness,
        }
        .is_retryable());
    }
}
