use crate::directory::PartyDirectory;
use crate::error::FlowError;
use crate::messages::{FlowMessage, Refusal};
use crate::ordering::{OrderingOutcome, OrderingService};
use crate::transport::{Inbox, Session};
use crate::vault::Vault;
use obligation_contract::{validate_bytes, validate_signed};
use std::sync::Arc;
use tally_core::{
    CodecError, FinalizedTransaction, PartyId, PartyKey, PartySignature, SignedProposal, TxId,
};
use tally_scaffold::{content_hash, ContractError};
use tracing::{debug, info, warn};

/// How one inbound session ended for this party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Recorded(TxId),
    Refused(Refusal),
    Aborted(TxId),
    /// The ordering service ordered a conflicting transaction instead.
    Discarded(TxId),
    /// The outcome could not be learned. The round stays in the vault until
    /// [`Responder::resume_pending`] finds one.
    Pending(TxId),
}

/// Countersigns proposals for one party after replaying the transition rules
/// on the exact bytes it was sent.
pub struct Responder {
    key: PartyKey,
    directory: PartyDirectory,
    ordering: Arc<dyn OrderingService>,
    vault: Arc<dyn Vault>,
}

impl Responder {
    pub fn new(
        key: PartyKey,
        directory: PartyDirectory,
        ordering: Arc<dyn OrderingService>,
        vault: Arc<dyn Vault>,
    ) -> Self {
        Self {
            key,
            directory,
            ordering,
            vault,
        }
    }

    pub fn party(&self) -> PartyId {
        self.key.party()
    }

    /// Handles every session arriving in `inbox`, each on its own task, until
    /// the inbox closes.
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(session) = inbox.accept().await {
            let responder = Arc::clone(&self);
            tokio::spawn(async move {
                let peer = session.peer();
                match responder.handle(session).await {
                    Ok(outcome) => debug!(%peer, ?outcome, "Session finished"),
                    Err(e) => warn!(%peer, "Session failed: {}", e),
                }
            });
        }
        debug!(party = %self.party(), "Inbox closed");
    }

    pub async fn handle(&self, mut session: Session) -> Result<RoundOutcome, FlowError> {
        let peer = session.peer();
        let opening = session
            .receive_message()
            .await
            .map_err(|_| FlowError::SessionFailure(peer))?;
        match opening {
            FlowMessage::Propose(bytes) => self.countersign(session, bytes).await,
            // Finality for a round whose original session was lost.
            FlowMessage::Finalized(tx) => {
                validate_signed(&tx.signed).map_err(|e| match e {
                    ContractError::Rejected(rule) => FlowError::ValidationFailed(rule),
                    ContractError::Deser(e) => FlowError::Codec(CodecError::Decode(e)),
                })?;
                self.record(&tx)?;
                acknowledge(&session, tx.id()).await;
                Ok(RoundOutcome::Recorded(tx.id()))
            }
            other => {
                warn!(%peer, kind = other.kind(), "Unexpected opening message");
                Err(FlowError::SessionFailure(peer))
            }
        }
    }

    async fn countersign(
        &self,
        mut session: Session,
        bytes: Vec<u8>,
    ) -> Result<RoundOutcome, FlowError> {
        let me = self.party();
        let peer = session.peer();
        let tx_id = content_hash(&bytes);

        let refusal = match validate_bytes(&bytes) {
            Err(ContractError::Deser(e)) => Some(Refusal::Undecodable(e)),
            Err(ContractError::Rejected(rule)) => Some(Refusal::Rule(rule)),
            Ok(proposal) if !proposal.signers.contains(&me) => Some(Refusal::NotASigner),
            Ok(_) => None,
        };
        if let Some(reason) = refusal {
            info!(%peer, %tx_id, %reason, "Refusing to sign");
            if let Err(e) = session
                .send_message(&FlowMessage::Refused(reason.clone()))
                .await
            {
                debug!(%peer, "Refusal not delivered: {}", e);
            }
            return Ok(RoundOutcome::Refused(reason));
        }

        let signature = PartySignature {
            party: me,
            signature: self.key.sign(&bytes),
        };
        if let Err(e) = session
            .send_message(&FlowMessage::Signed(signature.clone()))
            .await
        {
            debug!(%peer, "Signature not delivered: {}", e);
        }
        debug!(%peer, %tx_id, "Signed proposal, awaiting finality");

        match session.receive_message().await {
            Ok(FlowMessage::Finalized(tx)) if tx.signed.bytes == bytes => {
                self.record(&tx)?;
                acknowledge(&session, tx_id).await;
                Ok(RoundOutcome::Recorded(tx_id))
            }
            Ok(FlowMessage::Abort(_)) => {
                info!(%peer, %tx_id, "Round aborted");
                Ok(RoundOutcome::Aborted(tx_id))
            }
            Ok(other) => {
                warn!(%peer, %tx_id, kind = other.kind(), "Unexpected message while awaiting finality");
                self.reconcile(&countersigned(bytes, signature)).await
            }
            Err(e) => {
                debug!(%peer, %tx_id, "Session ended before finality ({}), reconciling", e);
                self.reconcile(&countersigned(bytes, signature)).await
            }
        }
    }

    /// Settles a round whose finality never arrived by asking the ordering
    /// service. Without a definitive answer the round is kept pending rather
    /// than assumed either way.
    pub async fn reconcile(&self, signed: &SignedProposal) -> Result<RoundOutcome, FlowError> {
        let tx_id = signed.id();
        match self.ordering.outcome(&tx_id).await {
            Ok(Some(OrderingOutcome::Accepted(tx))) if tx.id() == tx_id => {
                self.record(&tx)?;
                info!(%tx_id, "Reconciled accepted transaction");
                Ok(RoundOutcome::Recorded(tx_id))
            }
            Ok(Some(OrderingOutcome::Conflict { state, consumed_by })) => {
                self.vault.clear_pending(&tx_id);
                info!(%tx_id, %state, %consumed_by, "Round lost its ordering race, discarding");
                Ok(RoundOutcome::Discarded(tx_id))
            }
            Ok(outcome) => {
                debug!(%tx_id, ?outcome, "No outcome recorded yet");
                self.keep_pending(signed)
            }
            Err(e) => {
                warn!(%tx_id, "Cannot reach ordering service: {}", e);
                self.keep_pending(signed)
            }
        }
    }

    /// Asks the ordering service again about every round left pending.
    pub async fn resume_pending(&self) -> Vec<Result<RoundOutcome, FlowError>> {
        let pending = self.vault.pending();
        if !pending.is_empty() {
            info!(party = %self.party(), count = pending.len(), "Reconciling pending rounds");
        }
        let mut results = Vec::with_capacity(pending.len());
        for signed in pending {
            results.push(self.reconcile(&signed).await);
        }
        results
    }

    fn keep_pending(&self, signed: &SignedProposal) -> Result<RoundOutcome, FlowError> {
        self.vault.mark_pending(signed)?;
        Ok(RoundOutcome::Pending(signed.id()))
    }

    fn record(&self, tx: &FinalizedTransaction) -> Result<(), FlowError> {
        let tx_id = tx.id();
        if tx.receipt.tx_id != tx_id || !tx.receipt.verify(&self.directory.notary()) {
            return Err(FlowError::InvalidReceipt(tx_id));
        }
        tx.signed
            .verify_signatures()
            .map_err(FlowError::InvalidSignature)?;
        self.vault.record_accepted(tx)?;
        Ok(())
    }
}

/// The proposal as this party holds it: the bytes and its own signature.
fn countersigned(bytes: Vec<u8>, signature: PartySignature) -> SignedProposal {
    SignedProposal {
        bytes,
        signatures: vec![signature],
    }
}

async fn acknowledge(session: &Session, tx_id: TxId) {
    if let Err(e) = session.send_message(&FlowMessage::Recorded(tx_id)).await {
        debug!(peer = %session.peer(), %tx_id, "Acknowledgement not delivered: {}", e);
    }
}
