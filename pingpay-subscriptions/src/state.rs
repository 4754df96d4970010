//! Issuance state machine.
//!
//! ```text
//! Idle -> Building -> AwaitingSignature -> Signed -> Registering -> Depositing -> Complete
//!           |               |                          |              |
//!           v               v                          v              v
//!   Failed(InvalidIntent)  Failed(UserCancelled)   Failed(RegistrationRejected)
//!                          Failed(NetworkError)    Failed(EscrowIncomplete) <-+
//!                                                         |                   |
//!                                                         +-> Registering / Depositing
//! ```
//!
//! `Registering` is only reachable from `Signed` or from a resumable
//! `Failed(EscrowIncomplete)`, so key material is never handed to custody
//! for a grant that was not signed.
//!
//! # Thread Safety
//!
//! Observers live behind a `RwLock`; a poisoned lock is recovered.

use chrono::{DateTime, Utc};
use pingpay_lib::SubscriptionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Why an issuance attempt stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidIntent,
    UserCancelled,
    NetworkError,
    EscrowIncomplete,
    RegistrationRejected,
}

impl FailureKind {
    /// Every kind except `EscrowIncomplete` ends the attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::EscrowIncomplete)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidIntent => "InvalidIntent",
            Self::UserCancelled => "UserCancelled",
            Self::NetworkError => "NetworkError",
            Self::EscrowIncomplete => "EscrowIncomplete",
            Self::RegistrationRejected => "RegistrationRejected",
        };
        f.write_str(name)
    }
}

/// Where an issuance attempt is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuanceState {
    Idle,
    Building,
    AwaitingSignature,
    Signed,
    Registering,
    Depositing,
    Complete,
    Failed(FailureKind),
}

impl IssuanceState {
    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete => true,
            Self::Failed(kind) => kind.is_terminal(),
            _ => false,
        }
    }

    /// Whether `self -> next` is in the transition table.
    pub fn can_transition_to(&self, next: IssuanceState) -> bool {
        use FailureKind::*;
        use IssuanceState::*;

        matches!(
            (*self, next),
            (Idle, Building)
                | (Building, AwaitingSignature)
                | (Building, Failed(InvalidIntent))
                | (AwaitingSignature, Signed)
                | (AwaitingSignature, Failed(UserCancelled))
                | (AwaitingSignature, Failed(NetworkError))
                | (Signed, Registering)
                | (Registering, Depositing)
                | (Registering, Failed(RegistrationRejected))
                | (Registering, Failed(EscrowIncomplete))
                | (Depositing, Complete)
                | (Depositing, Failed(EscrowIncomplete))
                | (Failed(EscrowIncomplete), Registering)
                | (Failed(EscrowIncomplete), Depositing)
        )
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One transition, as delivered to observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub subscription_id: SubscriptionId,
    pub from: IssuanceState,
    pub to: IssuanceState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Callback type for state changes.
pub type StateCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Fan-out of state changes to callbacks and channel subscribers.
pub struct StateObservers {
    callbacks: RwLock<Vec<StateCallback>>,
    channel: broadcast::Sender<StateChange>,
}

impl StateObservers {
    /// Create an observer set; `capacity` bounds the broadcast buffer.
    pub fn new(capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(capacity.max(1));
        Self {
            callbacks: RwLock::new(Vec::new()),
            channel,
        }
    }

    /// Register a callback for state changes.
    pub fn on_state_change(&self, callback: StateCallback) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.push(callback);
    }

    /// Receive state changes as messages.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.channel.subscribe()
    }

    fn notify(&self, change: &StateChange) {
        // released before calling out so a callback may register another
        let callbacks: Vec<StateCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in &callbacks {
            callback(change);
        }
        // no receivers is fine
        let _ = self.channel.send(change.clone());
    }
}

impl Default for StateObservers {
    fn default() -> Self {
        Self::new(64)
    }
}

/// State of one issuance attempt.
pub struct IssuanceMachine {
    subscription_id: SubscriptionId,
    state: IssuanceState,
    observers: Arc<StateObservers>,
}

impl IssuanceMachine {
    /// A fresh attempt in `Idle`.
    pub fn new(subscription_id: SubscriptionId, observers: Arc<StateObservers>) -> Self {
        Self {
            subscription_id,
            state: IssuanceState::Idle,
            observers,
        }
    }

    /// Re-enter an attempt that stopped with `EscrowIncomplete`.
    pub fn resume(subscription_id: SubscriptionId, observers: Arc<StateObservers>) -> Self {
        Self {
            subscription_id,
            state: IssuanceState::Failed(FailureKind::EscrowIncomplete),
            observers,
        }
    }

    /// Current state.
    pub fn state(&self) -> IssuanceState {
        self.state
    }

    /// Subscription this attempt issues.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Move to `next` and notify observers. Returns false, leaving the state
    /// untouched, if the transition is not in the table.
    pub fn advance(&mut self, next: IssuanceState, detail: Option<String>) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                subscription = %self.subscription_id,
                from = %self.state,
                to = %next,
                "illegal issuance transition"
            );
            return false;
        }

        let change = StateChange {
            subscription_id: self.subscription_id.clone(),
            from: self.state,
            to: next,
            at: Utc::now(),
            detail,
        };
        self.state = next;

        match next {
            IssuanceState::Failed(FailureKind::EscrowIncomplete) => tracing::warn!(
                subscription = %change.subscription_id,
                detail = change.detail.as_deref().unwrap_or(""),
                "escrow incomplete, grant exists on-ledger"
            ),
            IssuanceState::Failed(kind) => tracing::info!(
                subscription = %change.subscription_id,
                %kind,
                "issuance failed"
            ),
            _ => tracing::info!(
                subscription = %change.subscription_id,
                from = %change.from,
                to = %change.to,
                "issuance state changed"
            ),
        }

        self.observers.notify(&change);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const ALL_STATES: [IssuanceState; 12] = [
        IssuanceState::Idle,
        IssuanceState::Building,
        IssuanceState::AwaitingSignature,
        IssuanceState::Signed,
        IssuanceState::Registering,
        IssuanceState::Depositing,
        IssuanceState::Complete,
        IssuanceState::Failed(FailureKind::InvalidIntent),
        IssuanceState::Failed(FailureKind::UserCancelled),
        IssuanceState::Failed(FailureKind::NetworkError),
        IssuanceState::Failed(FailureKind::EscrowIncomplete),
        IssuanceState::Failed(FailureKind::RegistrationRejected),
    ];

    #[test]
    fn test_registering_requires_signature() {
        let into_registering: Vec<_> = ALL_STATES
            .iter()
            .filter(|s| s.can_transition_to(IssuanceState::Registering))
            .collect();
        assert!(into_registering.iter().all(|s| matches!(
            s,
            IssuanceState::Signed | IssuanceState::Failed(FailureKind::EscrowIncomplete)
        )));
        assert!(!IssuanceState::AwaitingSignature.can_transition_to(IssuanceState::Registering));
        assert!(!IssuanceState::AwaitingSignature.can_transition_to(IssuanceState::Depositing));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL_STATES.iter().filter(|s| s.is_terminal()) {
            for to in ALL_STATES {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
        assert!(!IssuanceState::Failed(FailureKind::EscrowIncomplete).is_terminal());
    }

    #[test]
    fn test_observers_see_every_change() {
        let observers = Arc::new(StateObservers::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        observers.on_state_change(Arc::new(move |change| {
            sink.lock().unwrap().push((change.from, change.to));
        }));
        let mut rx = observers.subscribe();

        let mut machine = IssuanceMachine::new(SubscriptionId::generate(), observers);
        assert!(machine.advance(IssuanceState::Building, None));
        assert!(!machine.advance(IssuanceState::Registering, None));
        assert!(machine.advance(IssuanceState::Failed(FailureKind::InvalidIntent), None));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (IssuanceState::Idle, IssuanceState::Building),
                (
                    IssuanceState::Building,
                    IssuanceState::Failed(FailureKind::InvalidIntent)
                ),
            ]
        );
        assert_eq!(rx.try_recv().unwrap().to, IssuanceState::Building);
    }

    #[test]
    fn test_callback_may_register_another() {
        let observers = Arc::new(StateObservers::default());
        let late_calls = Arc::new(Mutex::new(0usize));

        let registry = Arc::downgrade(&observers);
        let counter = late_calls.clone();
        observers.on_state_change(Arc::new(move |change| {
            if change.to == IssuanceState::Building {
                if let Some(observers) = registry.upgrade() {
                    let counter = counter.clone();
                    observers.on_state_change(Arc::new(move |_| {
                        *counter.lock().unwrap() += 1;
                    }));
                }
            }
        }));

        let mut machine = IssuanceMachine::new(SubscriptionId::generate(), observers);
        assert!(machine.advance(IssuanceState::Building, None));
        assert!(machine.advance(IssuanceState::AwaitingSignature, None));
        assert_eq!(*late_calls.lock().unwrap(), 1);
    }
}
