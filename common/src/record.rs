use crate::identity::PartyId;
use crate::money::{Amount, MoneyError};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_scaffold::ContentHash;
use thiserror::Error;

/// Content address of a proposal: BLAKE3 over its canonical bytes.
pub type TxId = ContentHash;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("principal must be positive")]
    NonPositivePrincipal,

    #[error("creditor and debtor must differ")]
    SameParty,

    #[error("settled amount exceeds principal")]
    OverSettled,

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Identifier shared by every version of one obligation.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LifecycleId(pub [u8; 16]);

impl LifecycleId {
    pub fn random() -> Self {
        LifecycleId(rand::random())
    }
}

impl fmt::Display for LifecycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE32_NOPAD.encode(&self.0))
    }
}

impl fmt::Debug for LifecycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifecycleId({})", self)
    }
}

/// Points at output `index` of the accepted transaction `tx`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateRef {
    pub tx: TxId,
    pub index: u32,
}

impl StateRef {
    pub fn new(tx: TxId, index: u32) -> Self {
        Self { tx, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx, self.index)
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateRef({})", self)
    }
}

/// One version of a bilateral obligation. Values are never mutated; every
/// change produces a new version through `pay` or `with_new_creditor`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ObligationRecord {
    pub principal: Amount,
    pub creditor: PartyId,
    pub debtor: PartyId,
    pub settled: Amount,
    pub lifecycle_id: LifecycleId,
}

impl ObligationRecord {
    /// A fresh obligation with nothing settled and a new lifecycle id.
    pub fn issue(
        principal: Amount,
        creditor: PartyId,
        debtor: PartyId,
    ) -> Result<Self, RecordError> {
        let record = Self {
            principal,
            creditor,
            debtor,
            settled: Amount::zero(principal.currency),
            lifecycle_id: LifecycleId::random(),
        };
        record.check_invariants()?;
        Ok(record)
    }

    pub fn check_invariants(&self) -> Result<(), RecordError> {
        if self.principal.is_zero() {
            return Err(RecordError::NonPositivePrincipal);
        }
        if self.creditor == self.debtor {
            return Err(RecordError::SameParty);
        }
        // Fails on a currency mismatch as well as on overpayment.
        self.outstanding()?;
        Ok(())
    }

    pub fn outstanding(&self) -> Result<Amount, RecordError> {
        self.principal.checked_sub(&self.settled).map_err(|e| match e {
            MoneyError::Overflow => RecordError::OverSettled,
            other => RecordError::Money(other),
        })
    }

    pub fn is_fully_settled(&self) -> bool {
        self.settled == self.principal
    }

    /// The next version after `amount` has been paid towards the principal.
    pub fn pay(&self, amount: Amount) -> Result<Self, RecordError> {
        let next = Self {
            settled: self.settled.checked_add(&amount)?,
            ..self.clone()
        };
        next.check_invariants()?;
        Ok(next)
    }

    /// The next version with `creditor` holding the claim.
    pub fn with_new_creditor(&self, creditor: PartyId) -> Self {
        Self {
            creditor,
            ..self.clone()
        }
    }

    pub fn participants(&self) -> [PartyId; 2] {
        [self.creditor, self.debtor]
    }

    pub fn is_participant(&self, party: &PartyId) -> bool {
        self.creditor == *party || self.debtor == *party
    }
}

/// A unit of payment instrument held by `owner`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct CashState {
    pub amount: Amount,
    pub owner: PartyId,
}

impl CashState {
    pub fn new(amount: Amount, owner: PartyId) -> Self {
        Self { amount, owner }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub enum LedgerState {
    Obligation(ObligationRecord),
    Cash(CashState),
}

impl LedgerState {
    pub fn as_obligation(&self) -> Option<&ObligationRecord> {
        match self {
            LedgerState::Obligation(record) => Some(record),
            LedgerState::Cash(_) => None,
        }
    }

    pub fn as_cash(&self) -> Option<&CashState> {
        match self {
            LedgerState::Cash(cash) => Some(cash),
            LedgerState::Obligation(_) => None,
        }
    }

    /// Parties that keep a copy of this state in their vault.
    pub fn participants(&self) -> Vec<PartyId> {
        match self {
            LedgerState::Obligation(record) => record.participants().to_vec(),
            LedgerState::Cash(cash) => vec![cash.owner],
        }
    }
}

impl From<ObligationRecord> for LedgerState {
    fn from(record: ObligationRecord) -> Self {
        LedgerState::Obligation(record)
    }
}

impl From<CashState> for LedgerState {
    fn from(cash: CashState) -> Self {
        LedgerState::Cash(cash)
    }
}

/// A state together with the reference of the transaction output that made it.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct StateAndRef {
    pub state: LedgerState,
    pub reference: StateRef,
}

impl StateAndRef {
    pub fn new(state: impl Into<LedgerState>, reference: StateRef) -> Self {
        Self {
            state: state.into(),
            reference,
        }
    }

    pub fn obligation(&self) -> Option<&ObligationRecord> {
        self.state.as_obligation()
    }

    pub fn cash(&self) -> Option<&CashState> {
        self.state.as_cash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PartyKey;
    use crate::money::Currency;

    fn usd(quantity: u64) -> Amount {
        Amount::new(quantity, Currency::USD)
    }

    #[test]
    fn test_issue_starts_unsettled() {
        let creditor = PartyKey::generate().party();
        let debtor = PartyKey::generate().party();
        let record = ObligationRecord::issue(usd(1000), creditor, debtor).unwrap();

        assert_eq!(record.settled, usd(0));
        assert_eq!(record.outstanding().unwrap(), usd(1000));
        assert_eq!(record.participants(), [creditor, debtor]);
    }

    #[test]
    fn test_issue_rejects_invalid_records() {
        let a = PartyKey::generate().party();
        let b = PartyKey::generate().party();

        assert_eq!(
            ObligationRecord::issue(usd(0), a, b),
            Err(RecordError::NonPositivePrincipal)
        );
        assert_eq!(
            ObligationRecord::issue(usd(10), a, a),
            Err(RecordError::SameParty)
        );
    }

    #[test]
    fn test_pay_produces_new_version() {
        let record = ObligationRecord::issue(
            usd(1000),
            PartyKey::generate().party(),
            PartyKey::generate().party(),
        )
        .unwrap();

        let paid = record.pay(usd(400)).unwrap();
        assert_eq!(record.settled, usd(0));
        assert_eq!(paid.settled, usd(400));
        assert_eq!(paid.lifecycle_id, record.lifecycle_id);

        assert_eq!(paid.pay(usd(601)), Err(RecordError::OverSettled));
        assert!(paid.pay(usd(600)).unwrap().is_fully_settled());
        assert!(matches!(
            paid.pay(Amount::new(1, Currency::GBP)),
            Err(RecordError::Money(MoneyError::CurrencyMismatch(_, _)))
        ));
    }

    #[test]
    fn test_with_new_creditor_keeps_everything_else() {
        let record = ObligationRecord::issue(
            usd(50),
            PartyKey::generate().party(),
            PartyKey::generate().party(),
        )
        .unwrap();
        let new_creditor = PartyKey::generate().party();
        let transferred = record.with_new_creditor(new_creditor);

        assert_eq!(transferred.creditor, new_creditor);
        assert_eq!(transferred.debtor, record.debtor);
        assert_eq!(transferred.principal, record.principal);
        assert_eq!(transferred.settled, record.settled);
        assert_eq!(transferred.lifecycle_id, record.lifecycle_id);
    }
}
