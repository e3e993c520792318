//! The initiating side of every obligation flow.
//!
//! A [`Coordinator`] builds a proposal from its own vault, checks it against
//! the same rules its counterparties will apply, gathers their signatures over
//! the exact proposal bytes, and hands the result to the ordering service.
//! Nothing is submitted unless every required signer has signed, and nothing
//! is recorded unless the ordering service accepted it.

use crate::config::FlowConfig;
use crate::directory::PartyDirectory;
use crate::error::{FlowError, OrderingError, TransportError, VaultError};
use crate::ledger::{PaymentLedger, Reservation};
use crate::messages::FlowMessage;
use crate::ordering::{OrderingOutcome, OrderingService};
use crate::transport::{Session, Transport};
use crate::vault::Vault;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tally_core::{
    validate, Amount, CashState, FinalizedTransaction, Intent, LifecycleId, ObligationRecord,
    PartyId, PartyKey, PartySignature, Proposal, RecordError, Rule, SignedProposal, StateAndRef,
    TxId,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct Coordinator {
    key: PartyKey,
    directory: PartyDirectory,
    transport: Arc<dyn Transport>,
    ordering: Arc<dyn OrderingService>,
    vault: Arc<dyn Vault>,
    ledger: Arc<dyn PaymentLedger>,
    config: FlowConfig,
}

impl Coordinator {
    pub fn new(
        key: PartyKey,
        directory: PartyDirectory,
        transport: Arc<dyn Transport>,
        ordering: Arc<dyn OrderingService>,
        vault: Arc<dyn Vault>,
        ledger: Arc<dyn PaymentLedger>,
        config: FlowConfig,
    ) -> Self {
        Self {
            key,
            directory,
            transport,
            ordering,
            vault,
            ledger,
            config,
        }
    }

    pub fn party(&self) -> PartyId {
        self.key.party()
    }

    /// Creates a new obligation. The caller must be its creditor or debtor.
    pub async fn issue(
        &self,
        principal: Amount,
        creditor: PartyId,
        debtor: PartyId,
    ) -> Result<FinalizedTransaction, FlowError> {
        let record = ObligationRecord::issue(principal, creditor, debtor).map_err(Rule::from)?;
        if !record.is_participant(&self.party()) {
            return Err(FlowError::NotParticipant);
        }
        info!(lifecycle_id = %record.lifecycle_id, %principal, %creditor, %debtor, "Issuing obligation");

        let mut proposal = Proposal::new(Intent::Issue);
        proposal
            .add_output(record.clone())
            .add_signers(record.participants());
        self.commit(proposal).await
    }

    /// Hands the claim to `new_creditor`. Only the current creditor may do this.
    pub async fn transfer(
        &self,
        lifecycle_id: LifecycleId,
        new_creditor: PartyId,
    ) -> Result<FinalizedTransaction, FlowError> {
        let me = self.party();
        let mut proposal = Proposal::new(Intent::Transfer);
        match self.current_obligation(&lifecycle_id)? {
            Some((current, record)) => {
                if record.creditor != me {
                    return Err(FlowError::NotCurrentCreditor);
                }
                info!(%lifecycle_id, %new_creditor, "Transferring obligation");
                proposal
                    .add_input(current)
                    .add_output(record.with_new_creditor(new_creditor))
                    .add_signers([record.debtor, record.creditor, new_creditor]);
            }
            // Nothing to consume; validation reports it.
            None => {
                proposal.add_signers([me]);
            }
        }
        self.commit(proposal).await
    }

    /// Pays `amount` towards an obligation from the debtor's cash.
    ///
    /// The cash is reserved before the round starts and released if the round
    /// fails before ordering. If the ordering outcome is unknown it stays
    /// reserved until [`Coordinator::resume_in_flight`] learns the outcome.
    pub async fn settle(
        &self,
        lifecycle_id: LifecycleId,
        amount: Amount,
    ) -> Result<FinalizedTransaction, FlowError> {
        let me = self.party();
        let Some((current, record)) = self.current_obligation(&lifecycle_id)? else {
            let mut proposal = Proposal::new(Intent::Settle);
            proposal.add_signers([me]);
            return self.commit(proposal).await;
        };
        if record.debtor != me {
            return Err(FlowError::NotDebtor);
        }
        if amount.currency != record.principal.currency {
            return Err(Rule::PaymentCurrency.into());
        }

        let reservation = self.ledger.reserve(&me, amount)?;
        info!(%lifecycle_id, %amount, reserved = %reservation.total, "Settling obligation");
        let result = self.settle_with(current, &record, amount, &reservation).await;
        match &result {
            Err(FlowError::OrderingIndeterminate(tx_id)) => {
                warn!(%tx_id, reservation = reservation.id, "Keeping cash reserved until the outcome is known");
            }
            Err(_) => self.ledger.release(&reservation),
            Ok(_) => {}
        }
        result
    }

    async fn settle_with(
        &self,
        current: StateAndRef,
        record: &ObligationRecord,
        amount: Amount,
        reservation: &Reservation,
    ) -> Result<FinalizedTransaction, FlowError> {
        let next = record.pay(amount).map_err(|e| match e {
            RecordError::OverSettled => Rule::Overpayment,
            other => Rule::from(other),
        })?;
        let change = reservation
            .total
            .checked_sub(&amount)
            .map_err(|_| Rule::PaymentUnbalanced)?;

        let mut proposal = Proposal::new(Intent::Settle);
        proposal.add_input(current);
        for cash in &reservation.states {
            proposal.add_input(cash.clone());
        }
        if !next.is_fully_settled() {
            proposal.add_output(next);
        }
        proposal.add_output(CashState::new(amount, record.creditor));
        if !change.is_zero() {
            proposal.add_output(CashState::new(change, record.debtor));
        }
        proposal.add_signers(record.participants());
        self.commit(proposal).await
    }

    /// Drives every proposal left in flight by an earlier run to a definitive
    /// outcome. Resubmission is safe because ordering is idempotent.
    pub async fn resume_in_flight(&self) -> Vec<Result<FinalizedTransaction, FlowError>> {
        let pending = self.vault.in_flight();
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming in-flight transactions");
        }
        let mut results = Vec::with_capacity(pending.len());
        for signed in pending {
            results.push(self.resume(&signed).await);
        }
        results
    }

    async fn resume(&self, signed: &SignedProposal) -> Result<FinalizedTransaction, FlowError> {
        let tx_id = signed.id();
        let proposal = signed.proposal()?;
        match self.order(signed).await {
            Ok(OrderingOutcome::Accepted(finalized)) => {
                let finalized = self.accept(signed, finalized)?;
                let sessions = self.reopen_sessions(&proposal).await;
                self.broadcast_finality(&finalized, sessions).await;
                Ok(finalized)
            }
            Ok(OrderingOutcome::Conflict { state, consumed_by }) => {
                warn!(%tx_id, %state, %consumed_by, "In-flight transaction lost its ordering race");
                self.forget(&proposal, tx_id);
                Err(FlowError::OrderingConflict { state, consumed_by })
            }
            Err(e @ FlowError::OrderingIndeterminate(_)) => Err(e),
            Err(e) => {
                self.forget(&proposal, tx_id);
                Err(e)
            }
        }
    }

    fn forget(&self, proposal: &Proposal, tx_id: TxId) {
        self.vault.clear_in_flight(&tx_id);
        self.ledger.release_refs(&proposal.input_refs());
    }

    fn current_obligation(
        &self,
        lifecycle_id: &LifecycleId,
    ) -> Result<Option<(StateAndRef, ObligationRecord)>, FlowError> {
        match self.vault.current_version(lifecycle_id) {
            Ok(current) => {
                let record = current
                    .obligation()
                    .cloned()
                    .ok_or(VaultError::NotFound(*lifecycle_id))?;
                Ok(Some((current, record)))
            }
            Err(VaultError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&self, proposal: Proposal) -> Result<FinalizedTransaction, FlowError> {
        validate(&proposal)?;

        let me = self.party();
        let counterparties: Vec<PartyId> = proposal
            .signers
            .iter()
            .copied()
            .filter(|party| *party != me)
            .collect();
        for party in &counterparties {
            self.directory.require(party)?;
        }

        let mut signed = SignedProposal::new(&proposal)?;
        if proposal.signers.contains(&me) {
            signed.sign_with(&self.key);
        }
        debug!(tx_id = %signed.id(), intent = ?proposal.intents, counterparties = counterparties.len(), "Collecting signatures");

        let sessions = self.collect_signatures(&mut signed, &counterparties).await?;
        self.vault.mark_in_flight(&signed)?;
        self.order_and_finalize(&signed, sessions).await
    }

    /// Asks every counterparty at once and stops at the first refusal. Parties
    /// that already signed are told to abort.
    async fn collect_signatures(
        &self,
        signed: &mut SignedProposal,
        counterparties: &[PartyId],
    ) -> Result<Vec<Session>, FlowError> {
        let tx_id = signed.id();
        let bytes = signed.bytes.clone();
        let mut pending: FuturesUnordered<_> = counterparties
            .iter()
            .map(|party| self.request_signature(*party, &bytes))
            .collect();

        let mut sessions = Vec::with_capacity(counterparties.len());
        while let Some(reply) = pending.next().await {
            match reply {
                Ok((session, signature)) => {
                    signed.add_signature(signature.party, signature.signature);
                    sessions.push(session);
                }
                Err(e) => {
                    drop(pending);
                    warn!(%tx_id, "Signature round failed: {}", e);
                    abort(&sessions, tx_id).await;
                    return Err(e);
                }
            }
        }
        Ok(sessions)
    }

    async fn request_signature(
        &self,
        party: PartyId,
        bytes: &[u8],
    ) -> Result<(Session, PartySignature), FlowError> {
        let mut attempt = 0;
        let (session, reply) = loop {
            match self.propose_to(party, bytes).await {
                Ok(exchange) => break exchange,
                Err(e) if attempt < self.config.session_retries => {
                    attempt += 1;
                    warn!(%party, attempt, "Session failed ({}), resending proposal", e);
                }
                Err(e) => {
                    warn!(%party, "Giving up on session: {}", e);
                    return Err(FlowError::SessionFailure(party));
                }
            }
        };

        match reply {
            FlowMessage::Signed(signature) => {
                if signature.party != party || !party.verify(bytes, &signature.signature) {
                    return Err(FlowError::InvalidSignature(party));
                }
                Ok((session, signature))
            }
            FlowMessage::Refused(reason) => {
                info!(%party, %reason, "Signature refused");
                Err(FlowError::SignatureRefused { party, reason })
            }
            other => {
                warn!(%party, kind = other.kind(), "Unexpected reply to proposal");
                Err(FlowError::SessionFailure(party))
            }
        }
    }

    async fn propose_to(
        &self,
        party: PartyId,
        bytes: &[u8],
    ) -> Result<(Session, FlowMessage), TransportError> {
        let mut session = self.transport.open(&party).await?;
        let request = FlowMessage::Propose(bytes.to_vec());
        let reply = timeout(self.config.signature_timeout(), session.request(&request))
            .await
            .map_err(|_| TransportError::TimedOut)??;
        Ok((session, reply))
    }

    async fn order_and_finalize(
        &self,
        signed: &SignedProposal,
        sessions: Vec<Session>,
    ) -> Result<FinalizedTransaction, FlowError> {
        let tx_id = signed.id();
        let outcome = match self.order(signed).await {
            Ok(outcome) => outcome,
            Err(e @ FlowError::OrderingIndeterminate(_)) => {
                warn!(%tx_id, "Ordering outcome unknown, leaving transaction in flight");
                return Err(e);
            }
            Err(e) => {
                abort(&sessions, tx_id).await;
                self.vault.clear_in_flight(&tx_id);
                return Err(e);
            }
        };

        match outcome {
            OrderingOutcome::Accepted(finalized) => match self.accept(signed, finalized) {
                Ok(finalized) => {
                    self.broadcast_finality(&finalized, sessions).await;
                    Ok(finalized)
                }
                Err(e) => {
                    abort(&sessions, tx_id).await;
                    self.vault.clear_in_flight(&tx_id);
                    Err(e)
                }
            },
            OrderingOutcome::Conflict { state, consumed_by } => {
                warn!(%tx_id, %state, %consumed_by, "Lost ordering race");
                abort(&sessions, tx_id).await;
                self.vault.clear_in_flight(&tx_id);
                Err(FlowError::OrderingConflict { state, consumed_by })
            }
        }
    }

    /// Submits, and if the response is lost polls for the recorded outcome.
    async fn order(&self, signed: &SignedProposal) -> Result<OrderingOutcome, FlowError> {
        let tx_id = signed.id();
        match self.ordering.submit(signed).await {
            Ok(outcome) => return Ok(outcome),
            Err(OrderingError::Unavailable(reason)) => {
                warn!(%tx_id, %reason, "No response from ordering service, polling");
            }
            Err(e) => return Err(FlowError::OrderingRejected(e.to_string())),
        }

        for attempt in 1..=self.config.ordering_poll_attempts {
            tokio::time::sleep(self.config.ordering_poll_interval()).await;
            match self.ordering.outcome(&tx_id).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => debug!(%tx_id, attempt, "No outcome recorded yet"),
                Err(e) => debug!(%tx_id, attempt, "Outcome poll failed: {}", e),
            }
        }
        Err(FlowError::OrderingIndeterminate(tx_id))
    }

    fn accept(
        &self,
        signed: &SignedProposal,
        finalized: FinalizedTransaction,
    ) -> Result<FinalizedTransaction, FlowError> {
        let tx_id = signed.id();
        if finalized.signed.bytes != signed.bytes
            || finalized.receipt.tx_id != tx_id
            || !finalized.receipt.verify(&self.directory.notary())
        {
            return Err(FlowError::InvalidReceipt(tx_id));
        }
        self.vault.record_accepted(&finalized)?;
        self.vault.clear_in_flight(&tx_id);
        info!(%tx_id, "Transaction finalized");
        Ok(finalized)
    }

    async fn reopen_sessions(&self, proposal: &Proposal) -> Vec<Session> {
        let me = self.party();
        let mut sessions = Vec::new();
        for party in proposal.signers.iter().filter(|party| **party != me) {
            match self.transport.open(party).await {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(%party, "Cannot deliver finality: {}", e),
            }
        }
        sessions
    }

    /// Sends the finalized transaction to every counterparty and waits a
    /// bounded time for each to confirm it was recorded. A missing
    /// acknowledgement does not undo finality.
    async fn broadcast_finality(&self, finalized: &FinalizedTransaction, sessions: Vec<Session>) {
        let tx_id = finalized.id();
        let acks = sessions.into_iter().map(|mut session| async move {
            let peer = session.peer();
            let request = FlowMessage::Finalized(finalized.clone());
            match timeout(self.config.finality_ack_timeout(), session.request(&request)).await {
                Ok(Ok(FlowMessage::Recorded(id))) if id == tx_id => {
                    debug!(%peer, %tx_id, "Finality acknowledged");
                }
                Ok(Ok(other)) => {
                    warn!(%peer, %tx_id, kind = other.kind(), "Unexpected reply to finality");
                }
                Ok(Err(e)) => warn!(%peer, %tx_id, "Finality not acknowledged: {}", e),
                Err(_) => warn!(%peer, %tx_id, "Timed out waiting for finality acknowledgement"),
            }
        });
        join_all(acks).await;
    }
}

async fn abort(sessions: &[Session], tx_id: TxId) {
    for session in sessions {
        if let Err(e) = session.send_message(&FlowMessage::Abort(tx_id)).await {
            debug!(peer = %session.peer(), %tx_id, "Abort not delivered: {}", e);
        }
    }
}
