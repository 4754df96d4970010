//! Issuance failure taxonomy.

use crate::orchestrator::PendingEscrow;
use crate::state::FailureKind;

/// Every way an issuance attempt can end without a `Complete` receipt.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Local validation failed. Nothing left this process.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// The subscriber closed the wallet prompt. A fresh attempt may be built.
    #[error("signature request cancelled by the subscriber")]
    UserCancelled,

    /// The wallet or ledger failed the signature request.
    #[error("network error: {0}")]
    Network(String),

    /// The grant is on-ledger but custody does not hold a usable key.
    /// Pass `pending` to [`IssuanceOrchestrator::resume`](crate::IssuanceOrchestrator::resume).
    #[error("escrow incomplete for {}: {reason}", pending.subscription_id())]
    EscrowIncomplete {
        pending: Box<PendingEscrow>,
        reason: String,
    },

    /// The merchant side refused the key. The grant should be revoked and a
    /// new intent built.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),
}

impl IssuanceError {
    /// Classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidIntent(_) => FailureKind::InvalidIntent,
            Self::UserCancelled => FailureKind::UserCancelled,
            Self::Network(_) => FailureKind::NetworkError,
            Self::EscrowIncomplete { .. } => FailureKind::EscrowIncomplete,
            Self::RegistrationRejected(_) => FailureKind::RegistrationRejected,
        }
    }

    /// Whether [`IssuanceOrchestrator::resume`](crate::IssuanceOrchestrator::resume) can continue.
    pub fn is_resumable(&self) -> bool {
        !self.kind().is_terminal()
    }

    /// Take the resumable marker out of an `EscrowIncomplete` error.
    pub fn into_pending(self) -> Option<PendingEscrow> {
        match self {
            Self::EscrowIncomplete { pending, .. } => Some(*pending),
            _ => None,
        }
    }
}
