use crate::error::OrderingError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tally_core::{
    FinalizedTransaction, NotaryReceipt, PartyId, PartyKey, SignedProposal, StateRef, TxId,
};
use tracing::{debug, info, warn};

/// What the ordering service decided about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingOutcome {
    Accepted(FinalizedTransaction),
    /// `state` was already consumed by `consumed_by`.
    Conflict { state: StateRef, consumed_by: TxId },
}

/// The single authority that decides which transaction consumes a state.
#[async_trait]
pub trait OrderingService: Send + Sync {
    /// Orders a fully signed proposal. Resubmitting a transaction returns the
    /// outcome recorded the first time.
    async fn submit(&self, signed: &SignedProposal) -> Result<OrderingOutcome, OrderingError>;

    /// The recorded outcome for `tx_id`, if the service has seen it.
    async fn outcome(&self, tx_id: &TxId) -> Result<Option<OrderingOutcome>, OrderingError>;
}

#[derive(Default)]
struct NotaryState {
    consumed: HashMap<StateRef, TxId>,
    outcomes: HashMap<TxId, OrderingOutcome>,
    dropped_responses: usize,
    unreachable: bool,
}

/// A non-validating notary that checks signatures and input uniqueness only.
pub struct InMemoryNotary {
    key: PartyKey,
    state: Mutex<NotaryState>,
}

impl InMemoryNotary {
    pub fn new(key: PartyKey) -> Self {
        Self {
            key,
            state: Mutex::new(NotaryState::default()),
        }
    }

    pub fn party(&self) -> PartyId {
        self.key.party()
    }

    /// The next submission is ordered as usual but its response is lost.
    pub fn drop_next_response(&self) {
        self.lock().dropped_responses += 1;
    }

    /// While unreachable every call fails and nothing is ordered.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    pub fn is_consumed(&self, state: &StateRef) -> bool {
        self.lock().consumed.contains_key(state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotaryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn order(
        &self,
        state: &mut NotaryState,
        signed: &SignedProposal,
    ) -> Result<OrderingOutcome, OrderingError> {
        let tx_id = signed.id();
        if let Some(outcome) = state.outcomes.get(&tx_id) {
            debug!(%tx_id, "Resubmission, returning recorded outcome");
            return Ok(outcome.clone());
        }

        let proposal = signed
            .proposal()
            .map_err(|e| OrderingError::Malformed(e.to_string()))?;
        signed
            .verify_signatures()
            .map_err(OrderingError::InvalidSignature)?;
        let missing = signed.missing_signers(&proposal);
        if !missing.is_empty() {
            return Err(OrderingError::MissingSignatures(missing.into_iter().collect()));
        }

        let conflict = proposal.input_refs().into_iter().find_map(|input| {
            state
                .consumed
                .get(&input)
                .map(|consumed_by| OrderingOutcome::Conflict {
                    state: input,
                    consumed_by: *consumed_by,
                })
        });
        let outcome = match conflict {
            Some(conflict) => {
                warn!(%tx_id, "Double spend rejected");
                conflict
            }
            None => {
                for input in proposal.input_refs() {
                    state.consumed.insert(input, tx_id);
                }
                info!(%tx_id, inputs = proposal.inputs.len(), "Transaction ordered");
                OrderingOutcome::Accepted(FinalizedTransaction {
                    signed: signed.clone(),
                    receipt: NotaryReceipt::new(tx_id, &self.key),
                })
            }
        };
        state.outcomes.insert(tx_id, outcome.clone());
        Ok(outcome)
    }
}

#[async_trait]
impl OrderingService for InMemoryNotary {
    async fn submit(&self, signed: &SignedProposal) -> Result<OrderingOutcome, OrderingError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(OrderingError::Unavailable("notary unreachable".to_string()));
        }
        let outcome = self.order(&mut state, signed)?;
        if state.dropped_responses > 0 {
            state.dropped_responses -= 1;
            return Err(OrderingError::Unavailable("response lost".to_string()));
        }
        Ok(outcome)
    }

    async fn outcome(&self, tx_id: &TxId) -> Result<Option<OrderingOutcome>, OrderingError> {
        let state = self.lock();
        if state.unreachable {
            return Err(OrderingError::Unavailable("notary unreachable".to_string()));
        }
        Ok(state.outcomes.get(tx_id).cloned())
    }
}
