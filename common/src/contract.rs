//! Transition rules for obligations.
//!
//! [`validate`] is a pure function of the proposal: it looks at nothing but the
//! consumed and produced states, the declared intent and the signer set, so
//! every party that replays it reaches the same verdict. Inputs and outputs are
//! grouped and summed without regard to the order they were added in.

use crate::identity::PartyId;
use crate::money::{Amount, Currency};
use crate::proposal::{Intent, Proposal};
use crate::record::{CashState, LifecycleId, ObligationRecord, RecordError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// The rule a rejected proposal broke. The message is stable and is what
/// counterparties report back when they refuse to sign.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    #[error("required signer set must not be empty")]
    EmptySignerSet,
    #[error("no matching rule")]
    NoMatchingRule,
    #[error("must affect exactly one obligation lifecycle")]
    MultipleLifecycles,
    #[error("record violates obligation invariants")]
    InvalidRecord,
    #[error("principal must be positive")]
    PositivePrincipal,
    #[error("creditor and debtor must differ")]
    DistinctParties,
    #[error("a payment may only accompany a settlement")]
    UnexpectedPayment,

    #[error("no inputs should be consumed when issuing")]
    IssueNoInputs,
    #[error("exactly one output must be created when issuing")]
    IssueOneOutput,
    #[error("a new obligation must have nothing settled")]
    IssueNothingSettled,
    #[error("creditor and debtor only must sign an issue")]
    IssueSigners,

    #[error("transfer must consume exactly one input")]
    TransferOneInput,
    #[error("transfer must create exactly one output")]
    TransferOneOutput,
    #[error("only the creditor may change")]
    OnlyCreditorMayChange,
    #[error("the creditor must change")]
    CreditorMustChange,
    #[error("debtor, old creditor and new creditor only must sign a transfer")]
    TransferSigners,

    #[error("must have one input")]
    SettleOneInput,
    #[error("there must be output cash")]
    PaymentMissing,
    #[error("payment currency must match the obligation")]
    PaymentCurrency,
    #[error("payment must be drawn from the debtor")]
    PaymentSource,
    #[error("payment may only go to the creditor or back to the debtor")]
    PaymentRecipient,
    #[error("cash inputs and outputs must balance")]
    PaymentUnbalanced,
    #[error("there must be output cash paid to the creditor")]
    PaymentToCreditor,
    #[error("cannot settle more than is outstanding")]
    Overpayment,
    #[error("there must be one output")]
    SettleOneOutput,
    #[error("there must be no output as the obligation is fully settled")]
    SettleNoOutput,
    #[error("only the settled amount may change")]
    OnlySettledMayChange,
    #[error("settled must grow by exactly the amount paid")]
    SettledIncrement,
    #[error("creditor and debtor only must sign a settlement")]
    SettleSigners,
}

impl From<RecordError> for Rule {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::NonPositivePrincipal => Rule::PositivePrincipal,
            RecordError::SameParty => Rule::DistinctParties,
            RecordError::OverSettled | RecordError::Money(_) => Rule::InvalidRecord,
        }
    }
}

/// Obligation versions of one lifecycle chain touched by a proposal.
#[derive(Default)]
struct ObligationGroup<'a> {
    inputs: Vec<&'a ObligationRecord>,
    outputs: Vec<&'a ObligationRecord>,
}

/// The payment-instrument states carried alongside the obligation.
#[derive(Default)]
struct PaymentLeg<'a> {
    inputs: Vec<&'a CashState>,
    outputs: Vec<&'a CashState>,
}

impl<'a> PaymentLeg<'a> {
    fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    fn states(&self) -> impl Iterator<Item = &'a CashState> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }
}

fn total<'a>(
    currency: Currency,
    states: impl Iterator<Item = &'a CashState>,
) -> Result<Amount, Rule> {
    Amount::sum(currency, states.map(|cash| &cash.amount)).map_err(|_| Rule::PaymentUnbalanced)
}

pub fn validate(proposal: &Proposal) -> Result<(), Rule> {
    if proposal.signers.is_empty() {
        return Err(Rule::EmptySignerSet);
    }
    let intent = single_intent(&proposal.intents)?;

    let (group, payment) = partition(proposal)?;
    for record in group.inputs.iter().chain(group.outputs.iter()) {
        record.check_invariants()?;
    }

    match intent {
        Intent::Issue => verify_issue(proposal, &group, &payment),
        Intent::Transfer => verify_transfer(proposal, &group, &payment),
        Intent::Settle => verify_settle(proposal, &group, &payment),
    }
}

fn single_intent(intents: &[Intent]) -> Result<Intent, Rule> {
    let distinct: BTreeSet<Intent> = intents.iter().copied().collect();
    match distinct.len() {
        1 => Ok(*distinct.iter().next().ok_or(Rule::NoMatchingRule)?),
        _ => Err(Rule::NoMatchingRule),
    }
}

/// Splits states into the single obligation chain being changed and the
/// payment leg. An empty proposal yields an empty group so that the intent's
/// own rules report what is missing.
fn partition(proposal: &Proposal) -> Result<(ObligationGroup<'_>, PaymentLeg<'_>), Rule> {
    let mut groups: BTreeMap<LifecycleId, ObligationGroup> = BTreeMap::new();
    let mut payment = PaymentLeg::default();

    for input in &proposal.inputs {
        if let Some(record) = input.obligation() {
            groups.entry(record.lifecycle_id).or_default().inputs.push(record);
        }
        if let Some(cash) = input.cash() {
            payment.inputs.push(cash);
        }
    }
    for output in &proposal.outputs {
        if let Some(record) = output.as_obligation() {
            groups.entry(record.lifecycle_id).or_default().outputs.push(record);
        }
        if let Some(cash) = output.as_cash() {
            payment.outputs.push(cash);
        }
    }

    if groups.len() > 1 {
        return Err(Rule::MultipleLifecycles);
    }
    let group = groups.into_values().next().unwrap_or_default();
    Ok((group, payment))
}

fn require(condition: bool, rule: Rule) -> Result<(), Rule> {
    if condition {
        Ok(())
    } else {
        Err(rule)
    }
}

fn signers_are<const N: usize>(proposal: &Proposal, expected: [PartyId; N]) -> bool {
    proposal.signers == expected.into_iter().collect::<BTreeSet<_>>()
}

fn verify_issue(
    proposal: &Proposal,
    group: &ObligationGroup,
    payment: &PaymentLeg,
) -> Result<(), Rule> {
    require(proposal.inputs.is_empty(), Rule::IssueNoInputs)?;
    require(payment.is_empty(), Rule::UnexpectedPayment)?;
    require(group.outputs.len() == 1, Rule::IssueOneOutput)?;

    let issued = group.outputs[0];
    require(!issued.principal.is_zero(), Rule::PositivePrincipal)?;
    require(issued.settled.is_zero(), Rule::IssueNothingSettled)?;
    require(issued.creditor != issued.debtor, Rule::DistinctParties)?;
    require(
        signers_are(proposal, [issued.creditor, issued.debtor]),
        Rule::IssueSigners,
    )
}

fn verify_transfer(
    proposal: &Proposal,
    group: &ObligationGroup,
    payment: &PaymentLeg,
) -> Result<(), Rule> {
    require(group.inputs.len() == 1, Rule::TransferOneInput)?;
    require(group.outputs.len() == 1, Rule::TransferOneOutput)?;
    require(payment.is_empty(), Rule::UnexpectedPayment)?;

    let before = group.inputs[0];
    let after = group.outputs[0];
    require(
        after.principal == before.principal
            && after.debtor == before.debtor
            && after.settled == before.settled,
        Rule::OnlyCreditorMayChange,
    )?;
    require(after.creditor != before.creditor, Rule::CreditorMustChange)?;
    require(
        signers_are(proposal, [before.debtor, before.creditor, after.creditor]),
        Rule::TransferSigners,
    )
}

fn verify_settle(
    proposal: &Proposal,
    group: &ObligationGroup,
    payment: &PaymentLeg,
) -> Result<(), Rule> {
    require(group.inputs.len() == 1, Rule::SettleOneInput)?;
    let before = group.inputs[0];
    let currency = before.principal.currency;

    require(!payment.outputs.is_empty(), Rule::PaymentMissing)?;
    require(
        payment.states().all(|cash| cash.amount.currency == currency),
        Rule::PaymentCurrency,
    )?;
    require(
        payment.inputs.iter().all(|cash| cash.owner == before.debtor),
        Rule::PaymentSource,
    )?;
    require(
        payment
            .outputs
            .iter()
            .all(|cash| cash.owner == before.creditor || cash.owner == before.debtor),
        Rule::PaymentRecipient,
    )?;

    let paid_in = total(currency, payment.inputs.iter().copied())?;
    let paid_out = total(currency, payment.outputs.iter().copied())?;
    require(paid_in == paid_out, Rule::PaymentUnbalanced)?;

    // Change handed back to the debtor is not a payment.
    let paid_now = total(
        currency,
        payment
            .outputs
            .iter()
            .copied()
            .filter(|cash| cash.owner == before.creditor),
    )?;
    require(!paid_now.is_zero(), Rule::PaymentToCreditor)?;

    let outstanding = before.outstanding()?;
    require(paid_now.quantity <= outstanding.quantity, Rule::Overpayment)?;
    let settled_after = before
        .settled
        .checked_add(&paid_now)
        .map_err(|_| Rule::Overpayment)?;

    if settled_after == before.principal {
        require(group.outputs.is_empty(), Rule::SettleNoOutput)?;
    } else {
        require(group.outputs.len() == 1, Rule::SettleOneOutput)?;
        let after = group.outputs[0];
        require(
            after.principal == before.principal
                && after.creditor == before.creditor
                && after.debtor == before.debtor,
            Rule::OnlySettledMayChange,
        )?;
        require(after.settled == settled_after, Rule::SettledIncrement)?;
    }

    require(
        signers_are(proposal, [before.creditor, before.debtor]),
        Rule::SettleSigners,
    )
}
