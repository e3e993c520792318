use tally_core::{validate, Proposal, Rule, SignedProposal};
use tally_scaffold::{Contract, ContractError};

pub struct ObligationContract;

impl Contract for ObligationContract {
    type Transaction = Proposal;
    type Rejection = Rule;

    fn verify(tx: &Proposal) -> Result<(), Rule> {
        validate(tx)
    }
}

/// Decodes and validates a proposal exactly as it arrived on the wire.
pub fn validate_bytes(bytes: &[u8]) -> Result<Proposal, ContractError<Rule>> {
    let verdict = ObligationContract::verify_bytes(bytes);
    if let Err(e) = &verdict {
        tracing::debug!(len = bytes.len(), "Rejected proposal bytes: {}", e);
    }
    verdict
}

/// Validates the bytes a signed proposal carries, ignoring its signatures.
pub fn validate_signed(signed: &SignedProposal) -> Result<Proposal, ContractError<Rule>> {
    validate_bytes(&signed.bytes)
}
