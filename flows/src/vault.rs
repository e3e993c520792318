use crate::error::{ReserveError, VaultError};
use crate::ledger::{PaymentLedger, Reservation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tally_core::{
    Amount, CashState, Currency, FinalizedTransaction, LedgerState, LifecycleId, PartyId,
    SignedProposal, StateAndRef, StateRef, TxId,
};
use tally_scaffold::content_hash;
use tracing::{debug, info};

/// One party's private store of the states it takes part in.
pub trait Vault: Send + Sync {
    fn owner(&self) -> PartyId;

    /// The latest unsuperseded version of an obligation.
    fn current_version(&self, lifecycle_id: &LifecycleId) -> Result<StateAndRef, VaultError>;

    /// Stores the relevant outputs of an accepted transaction and supersedes or
    /// spends its inputs. Recording the same transaction twice is a no-op.
    fn record_accepted(&self, tx: &FinalizedTransaction) -> Result<(), VaultError>;

    fn mark_superseded(&self, lifecycle_id: &LifecycleId, old: &StateRef)
        -> Result<(), VaultError>;

    /// Every version of an obligation this vault has seen, oldest first.
    fn history(&self, lifecycle_id: &LifecycleId) -> Vec<VaultEntry>;

    fn mark_in_flight(&self, signed: &SignedProposal) -> Result<(), VaultError>;

    fn clear_in_flight(&self, tx_id: &TxId);

    /// Proposals submitted for ordering whose outcome has not been recorded.
    fn in_flight(&self) -> Vec<SignedProposal>;

    /// Keeps a proposal this party countersigned but whose ordering outcome
    /// it could not learn. Ignored once the transaction is recorded.
    fn mark_pending(&self, signed: &SignedProposal) -> Result<(), VaultError>;

    fn clear_pending(&self, tx_id: &TxId);

    fn pending(&self) -> Vec<SignedProposal>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub version: StateAndRef,
    pub superseded: bool,
}

impl VaultEntry {
    fn lifecycle_id(&self) -> Option<LifecycleId> {
        self.version.obligation().map(|record| record.lifecycle_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CashEntry {
    state: StateAndRef,
    locked_by: Option<u64>,
}

impl CashEntry {
    fn amount(&self) -> Option<Amount> {
        self.state.cash().map(|cash| cash.amount)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct VaultData {
    obligations: Vec<VaultEntry>,
    cash: Vec<CashEntry>,
    in_flight: Vec<SignedProposal>,
    #[serde(default)]
    pending: Vec<SignedProposal>,
    transactions: Vec<FinalizedTransaction>,
    next_reservation: u64,
}

#[derive(Serialize, Deserialize)]
struct VaultSnapshot {
    owner: PartyId,
    data: VaultData,
}

/// Reference vault kept in memory, with JSON snapshots for restarts.
pub struct InMemoryVault {
    owner: PartyId,
    data: Mutex<VaultData>,
}

impl InMemoryVault {
    pub fn new(owner: PartyId) -> Self {
        Self {
            owner,
            data: Mutex::new(VaultData::default()),
        }
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), VaultError> {
        let snapshot = VaultSnapshot {
            owner: self.owner,
            data: self.lock().clone(),
        };
        let contents = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: VaultSnapshot = serde_json::from_str(&contents)?;
        Ok(Self {
            owner: snapshot.owner,
            data: Mutex::new(snapshot.data),
        })
    }

    /// All cash held in `currency`, reserved or not.
    pub fn balance(&self, currency: Currency) -> Amount {
        let quantity = self
            .lock()
            .cash
            .iter()
            .filter_map(CashEntry::amount)
            .filter(|amount| amount.currency == currency)
            .map(|amount| amount.quantity)
            .sum();
        Amount::new(quantity, currency)
    }

    pub fn transactions(&self) -> Vec<FinalizedTransaction> {
        self.lock().transactions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, VaultData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Vault for InMemoryVault {
    fn owner(&self) -> PartyId {
        self.owner
    }

    fn current_version(&self, lifecycle_id: &LifecycleId) -> Result<StateAndRef, VaultError> {
        self.lock()
            .obligations
            .iter()
            .rev()
            .find(|entry| !entry.superseded && entry.lifecycle_id() == Some(*lifecycle_id))
            .map(|entry| entry.version.clone())
            .ok_or(VaultError::NotFound(*lifecycle_id))
    }

    fn record_accepted(&self, tx: &FinalizedTransaction) -> Result<(), VaultError> {
        let tx_id = tx.id();
        let proposal = tx.proposal()?;
        let mut data = self.lock();
        if data.transactions.iter().any(|known| known.id() == tx_id) {
            debug!(%tx_id, "Transaction already recorded");
            return Ok(());
        }

        for input in &proposal.inputs {
            match &input.state {
                LedgerState::Obligation(_) => {
                    for entry in data.obligations.iter_mut() {
                        if entry.version.reference == input.reference {
                            entry.superseded = true;
                        }
                    }
                }
                LedgerState::Cash(_) => data
                    .cash
                    .retain(|entry| entry.state.reference != input.reference),
            }
        }

        for output in proposal.outputs_with_refs(tx_id) {
            if !output.state.participants().contains(&self.owner) {
                continue;
            }
            if output.obligation().is_some() {
                data.obligations.push(VaultEntry {
                    version: output,
                    superseded: false,
                });
            } else {
                data.cash.push(CashEntry {
                    state: output,
                    locked_by: None,
                });
            }
        }

        data.in_flight.retain(|signed| signed.id() != tx_id);
        data.pending.retain(|signed| signed.id() != tx_id);
        data.transactions.push(tx.clone());
        info!(owner = %self.owner, %tx_id, "Recorded transaction");
        Ok(())
    }

    fn mark_superseded(
        &self,
        lifecycle_id: &LifecycleId,
        old: &StateRef,
    ) -> Result<(), VaultError> {
        let mut data = self.lock();
        let entry = data
            .obligations
            .iter_mut()
            .find(|entry| {
                entry.version.reference == *old && entry.lifecycle_id() == Some(*lifecycle_id)
            })
            .ok_or(VaultError::NotFound(*lifecycle_id))?;
        entry.superseded = true;
        Ok(())
    }

    fn history(&self, lifecycle_id: &LifecycleId) -> Vec<VaultEntry> {
        self.lock()
            .obligations
            .iter()
            .filter(|entry| entry.lifecycle_id() == Some(*lifecycle_id))
            .cloned()
            .collect()
    }

    fn mark_in_flight(&self, signed: &SignedProposal) -> Result<(), VaultError> {
        let tx_id = signed.id();
        let mut data = self.lock();
        if !data.in_flight.iter().any(|known| known.id() == tx_id) {
            data.in_flight.push(signed.clone());
        }
        Ok(())
    }

    fn clear_in_flight(&self, tx_id: &TxId) {
        self.lock().in_flight.retain(|signed| signed.id() != *tx_id);
    }

    fn in_flight(&self) -> Vec<SignedProposal> {
        self.lock().in_flight.clone()
    }

    fn mark_pending(&self, signed: &SignedProposal) -> Result<(), VaultError> {
        let tx_id = signed.id();
        let mut data = self.lock();
        if data.transactions.iter().any(|known| known.id() == tx_id)
            || data.pending.iter().any(|known| known.id() == tx_id)
        {
            return Ok(());
        }
        data.pending.push(signed.clone());
        debug!(owner = %self.owner, %tx_id, "Round left pending");
        Ok(())
    }

    fn clear_pending(&self, tx_id: &TxId) {
        self.lock().pending.retain(|signed| signed.id() != *tx_id);
    }

    fn pending(&self) -> Vec<SignedProposal> {
        self.lock().pending.clone()
    }
}

impl PaymentLedger for InMemoryVault {
    fn reserve(&self, owner: &PartyId, amount: Amount) -> Result<Reservation, ReserveError> {
        let currency = amount.currency;
        let mut data = self.lock();
        let held_in_currency = |entry: &CashEntry| {
            entry
                .amount()
                .is_some_and(|held| held.currency == currency)
        };
        if *owner != self.owner || !data.cash.iter().any(held_in_currency) {
            return Err(ReserveError::InsufficientFunds { currency });
        }

        let mut selected = Vec::new();
        let mut total = 0u64;
        for (index, entry) in data.cash.iter().enumerate() {
            if total >= amount.quantity {
                break;
            }
            if entry.locked_by.is_none() && held_in_currency(entry) {
                total = total.saturating_add(entry.amount().map_or(0, |held| held.quantity));
                selected.push(index);
            }
        }
        if total < amount.quantity {
            return Err(ReserveError::InsufficientBalance {
                requested: amount,
                available: Amount::new(total, currency),
            });
        }

        data.next_reservation += 1;
        let id = data.next_reservation;
        let mut states = Vec::with_capacity(selected.len());
        for index in selected {
            data.cash[index].locked_by = Some(id);
            states.push(data.cash[index].state.clone());
        }
        debug!(owner = %self.owner, id, %amount, "Reserved cash");
        Ok(Reservation {
            id,
            states,
            total: Amount::new(total, currency),
        })
    }

    fn release_refs(&self, refs: &[StateRef]) {
        for entry in self.lock().cash.iter_mut() {
            if refs.contains(&entry.state.reference) {
                entry.locked_by = None;
            }
        }
    }

    fn issue_cash(&self, owner: PartyId, amount: Amount) -> Result<StateAndRef, VaultError> {
        let nonce: [u8; 32] = rand::random();
        let state = StateAndRef::new(
            CashState::new(amount, owner),
            StateRef::new(content_hash(&nonce), 0),
        );
        if owner == self.owner {
            self.lock().cash.push(CashEntry {
                state: state.clone(),
                locked_by: None,
            });
        }
        info!(%owner, %amount, "Issued cash");
        Ok(state)
    }
}
