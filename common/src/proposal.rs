use crate::identity::{PartyId, PartyKey};
use crate::record::{LedgerState, StateAndRef, StateRef, TxId};
use crate::util::truncated_base64;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tally_scaffold::{content_hash, CanonicalBytes};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode proposal: {0}")]
    Encode(String),

    #[error("Failed to decode proposal: {0}")]
    Decode(String),
}

/// What a proposal claims to do to an obligation.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Intent {
    Issue,
    Transfer,
    Settle,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Issue => f.write_str("issue"),
            Intent::Transfer => f.write_str("transfer"),
            Intent::Settle => f.write_str("settle"),
        }
    }
}

/// A proposed transition: the states it consumes, the states it creates, what
/// it claims to be doing, and who has to sign it.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct Proposal {
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<LedgerState>,
    pub intents: Vec<Intent>,
    pub signers: BTreeSet<PartyId>,
}

impl Proposal {
    pub fn new(intent: Intent) -> Self {
        Self {
            intents: vec![intent],
            ..Default::default()
        }
    }

    pub fn add_input(&mut self, input: StateAndRef) -> &mut Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output(&mut self, output: impl Into<LedgerState>) -> &mut Self {
        self.outputs.push(output.into());
        self
    }

    pub fn add_signers<I: IntoIterator<Item = PartyId>>(&mut self, signers: I) -> &mut Self {
        self.signers.extend(signers);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        self.to_cbor().map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_cbor(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    pub fn id(&self) -> Result<TxId, CodecError> {
        Ok(content_hash(&self.to_bytes()?))
    }

    /// Output states paired with the references they will have once `tx` is
    /// accepted.
    pub fn outputs_with_refs(&self, tx: TxId) -> Vec<StateAndRef> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(index, state)| StateAndRef::new(state.clone(), StateRef::new(tx, index as u32)))
            .collect()
    }

    pub fn input_refs(&self) -> Vec<StateRef> {
        self.inputs.iter().map(|input| input.reference).collect()
    }

    /// Everyone who should end up holding a copy of the result.
    pub fn participants(&self) -> BTreeSet<PartyId> {
        self.inputs
            .iter()
            .map(|input| &input.state)
            .chain(self.outputs.iter())
            .flat_map(LedgerState::participants)
            .chain(self.signers.iter().copied())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartySignature {
    pub party: PartyId,
    pub signature: Signature,
}

impl fmt::Debug for PartySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartySignature")
            .field("party", &self.party)
            .field(
                "signature",
                &format_args!("{}", truncated_base64(self.signature.to_bytes())),
            )
            .finish()
    }
}

/// The exact bytes of a proposal plus the signatures collected over them.
/// Parties sign the bytes they received, never a re-encoding.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct SignedProposal {
    pub bytes: Vec<u8>,
    pub signatures: Vec<PartySignature>,
}

impl SignedProposal {
    pub fn new(proposal: &Proposal) -> Result<Self, CodecError> {
        Ok(Self {
            bytes: proposal.to_bytes()?,
            signatures: Vec::new(),
        })
    }

    pub fn id(&self) -> TxId {
        content_hash(&self.bytes)
    }

    pub fn proposal(&self) -> Result<Proposal, CodecError> {
        Proposal::from_bytes(&self.bytes)
    }

    pub fn sign_with(&mut self, key: &PartyKey) {
        let signature = key.sign(&self.bytes);
        self.add_signature(key.party(), signature);
    }

    /// Records `party`'s signature, replacing any earlier one from the same party.
    pub fn add_signature(&mut self, party: PartyId, signature: Signature) {
        self.signatures.retain(|s| s.party != party);
        self.signatures.push(PartySignature { party, signature });
        self.signatures.sort_by_key(|s| s.party);
    }

    pub fn signed_by(&self) -> BTreeSet<PartyId> {
        self.signatures.iter().map(|s| s.party).collect()
    }

    /// Returns the first party whose signature does not verify over the bytes.
    pub fn verify_signatures(&self) -> Result<(), PartyId> {
        match self
            .signatures
            .iter()
            .find(|s| !s.party.verify(&self.bytes, &s.signature))
        {
            Some(bad) => Err(bad.party),
            None => Ok(()),
        }
    }

    pub fn missing_signers(&self, proposal: &Proposal) -> BTreeSet<PartyId> {
        let signed = self.signed_by();
        proposal.signers.difference(&signed).copied().collect()
    }
}

/// The ordering service's signature over a transaction id, proof that the
/// transaction's inputs were consumed by it and nothing else.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NotaryReceipt {
    pub tx_id: TxId,
    pub notary: PartyId,
    pub signature: Signature,
}

impl NotaryReceipt {
    pub fn new(tx_id: TxId, notary_key: &PartyKey) -> Self {
        Self {
            tx_id,
            notary: notary_key.party(),
            signature: notary_key.sign(tx_id.as_bytes()),
        }
    }

    pub fn verify(&self, expected_notary: &PartyId) -> bool {
        self.notary == *expected_notary && self.notary.verify(self.tx_id.as_bytes(), &self.signature)
    }
}

impl fmt::Debug for NotaryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotaryReceipt")
            .field("tx_id", &self.tx_id)
            .field("notary", &self.notary)
            .field(
                "signature",
                &format_args!("{}", truncated_base64(self.signature.to_bytes())),
            )
            .finish()
    }
}

/// A fully signed proposal that the ordering service has accepted.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct FinalizedTransaction {
    pub signed: SignedProposal,
    pub receipt: NotaryReceipt,
}

impl FinalizedTransaction {
    pub fn id(&self) -> TxId {
        self.signed.id()
    }

    pub fn proposal(&self) -> Result<Proposal, CodecError> {
        self.signed.proposal()
    }

    pub fn outputs(&self) -> Result<Vec<StateAndRef>, CodecError> {
        Ok(self.proposal()?.outputs_with_refs(self.id()))
    }
}
