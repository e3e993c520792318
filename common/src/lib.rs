pub mod contract;
pub mod identity;
pub mod money;
pub mod proposal;
pub mod record;
pub mod util;

pub use contract::{validate, Rule};
pub use identity::{PartyId, PartyKey};
pub use money::{Amount, Currency, MoneyError};
pub use proposal::{
    CodecError, FinalizedTransaction, Intent, NotaryReceipt, PartySignature, Proposal,
    SignedProposal,
};
pub use record::{
    CashState, LedgerState, LifecycleId, ObligationRecord, RecordError, StateAndRef, StateRef,
    TxId,
};
