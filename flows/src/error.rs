use crate::messages::Refusal;
use tally_core::{Amount, CodecError, Currency, LifecycleId, PartyId, Rule, StateRef, TxId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("No current version of obligation {0}")]
    NotFound(LifecycleId),

    #[error("Vault snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vault snapshot is malformed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    #[error("No {currency} cash held")]
    InsufficientFunds { currency: Currency },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Party {0} is unreachable")]
    Unreachable(PartyId),

    #[error("Session closed")]
    Closed,

    #[error("Timed out waiting for a reply")]
    TimedOut,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("Ordering service unavailable: {0}")]
    Unavailable(String),

    #[error("Missing signatures from {0:?}")]
    MissingSignatures(Vec<PartyId>),

    #[error("Invalid signature from {0}")]
    InvalidSignature(PartyId),

    #[error("Malformed transaction: {0}")]
    Malformed(String),
}

/// Why a flow did not produce a finalized transaction.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Validation failed: {0}")]
    ValidationFailed(Rule),

    #[error("{party} refused to sign: {reason}")]
    SignatureRefused { party: PartyId, reason: Refusal },

    #[error("Invalid signature from {0}")]
    InvalidSignature(PartyId),

    #[error("Ordering conflict: {state} already consumed by {consumed_by}")]
    OrderingConflict { state: StateRef, consumed_by: TxId },

    #[error("Ordering outcome of {0} is unknown")]
    OrderingIndeterminate(TxId),

    #[error("Ordering service rejected the transaction: {0}")]
    OrderingRejected(String),

    #[error("Notary receipt for {0} does not verify")]
    InvalidReceipt(TxId),

    #[error("Only the current creditor may transfer an obligation")]
    NotCurrentCreditor,

    #[error("Only the debtor may settle an obligation")]
    NotDebtor,

    #[error("Only the creditor or debtor may issue an obligation")]
    NotParticipant,

    #[error("Unknown party {0}")]
    UnknownParty(PartyId),

    #[error("No {currency} cash held")]
    InsufficientFunds { currency: Currency },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Session with {0} failed")]
    SessionFailure(PartyId),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<ReserveError> for FlowError {
    fn from(e: ReserveError) -> Self {
        match e {
            ReserveError::InsufficientFunds { currency } => FlowError::InsufficientFunds { currency },
            ReserveError::InsufficientBalance {
                requested,
                available,
            } => FlowError::InsufficientBalance {
                requested,
                available,
            },
        }
    }
}

impl From<Rule> for FlowError {
    fn from(rule: Rule) -> Self {
        FlowError::ValidationFailed(rule)
    }
}
