use crate::error::FlowError;
use std::collections::BTreeSet;
use tally_core::PartyId;

/// The parties a node is willing to open sessions with, and the notary whose
/// receipts it accepts.
#[derive(Debug, Clone)]
pub struct PartyDirectory {
    notary: PartyId,
    parties: BTreeSet<PartyId>,
}

impl PartyDirectory {
    pub fn new(notary: PartyId) -> Self {
        Self {
            notary,
            parties: BTreeSet::new(),
        }
    }

    pub fn with_parties<I: IntoIterator<Item = PartyId>>(mut self, parties: I) -> Self {
        self.parties.extend(parties);
        self
    }

    pub fn notary(&self) -> PartyId {
        self.notary
    }

    pub fn contains(&self, party: &PartyId) -> bool {
        self.parties.contains(party)
    }

    pub fn require(&self, party: &PartyId) -> Result<(), FlowError> {
        if self.contains(party) {
            Ok(())
        } else {
            Err(FlowError::UnknownParty(*party))
        }
    }
}
