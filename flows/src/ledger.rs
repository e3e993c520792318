use crate::error::{ReserveError, VaultError};
use serde::{Deserialize, Serialize};
use tally_core::{Amount, PartyId, StateAndRef, StateRef};

/// Cash states set aside for one payment. Held until the payment is either
/// ordered or abandoned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: u64,
    pub states: Vec<StateAndRef>,
    /// Sum of `states`; at least the requested amount.
    pub total: Amount,
}

impl Reservation {
    pub fn refs(&self) -> Vec<StateRef> {
        self.states.iter().map(|s| s.reference).collect()
    }
}

/// Source of the payment instrument used to settle obligations.
pub trait PaymentLedger: Send + Sync {
    fn reserve(&self, owner: &PartyId, amount: Amount) -> Result<Reservation, ReserveError>;

    /// Unlocks any of `refs` that are still held.
    fn release_refs(&self, refs: &[StateRef]);

    fn release(&self, reservation: &Reservation) {
        self.release_refs(&reservation.refs());
    }

    /// Creates cash out of nothing. Only for bootstrapping and tests.
    fn issue_cash(&self, owner: PartyId, amount: Amount) -> Result<StateAndRef, VaultError>;
}
