use serde::{Deserialize, Serialize};
use std::fmt;
use tally_core::{FinalizedTransaction, PartySignature, Rule, TxId};

/// Everything exchanged over a session between an initiator and one
/// counterparty.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum FlowMessage {
    /// Exact proposal bytes to be countersigned.
    Propose(Vec<u8>),
    Signed(PartySignature),
    Refused(Refusal),
    Finalized(FinalizedTransaction),
    Abort(TxId),
    Recorded(TxId),
}

impl FlowMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMessage::Propose(_) => "propose",
            FlowMessage::Signed(_) => "signed",
            FlowMessage::Refused(_) => "refused",
            FlowMessage::Finalized(_) => "finalized",
            FlowMessage::Abort(_) => "abort",
            FlowMessage::Recorded(_) => "recorded",
        }
    }
}

/// Why a counterparty would not sign.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Refusal {
    Rule(Rule),
    Undecodable(String),
    NotASigner,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Rule(rule) => write!(f, "{}", rule),
            Refusal::Undecodable(e) => write!(f, "undecodable proposal: {}", e),
            Refusal::NotASigner => f.write_str("not a required signer"),
        }
    }
}
