use tally_core::{
    validate, Amount, CashState, Currency, Intent, ObligationRecord, PartyId, PartyKey, Proposal,
    Rule, StateAndRef, StateRef,
};
use tally_scaffold::content_hash;

struct Parties {
    alice: PartyId,
    bob: PartyId,
    charlie: PartyId,
}

fn parties() -> Parties {
    Parties {
        alice: PartyKey::generate().party(),
        bob: PartyKey::generate().party(),
        charlie: PartyKey::generate().party(),
    }
}

fn usd(quantity: u64) -> Amount {
    Amount::new(quantity, Currency::USD)
}

fn gbp(quantity: u64) -> Amount {
    Amount::new(quantity, Currency::GBP)
}

fn consumed(state: impl Into<tally_core::LedgerState>, seed: &str) -> StateAndRef {
    StateAndRef::new(state, StateRef::new(content_hash(seed.as_bytes()), 0))
}

mod issue {
    use super::*;

    fn issue(record: ObligationRecord, signers: &[PartyId]) -> Proposal {
        let mut proposal = Proposal::new(Intent::Issue);
        proposal
            .add_output(record)
            .add_signers(signers.iter().copied());
        proposal
    }

    #[test]
    fn accepts_well_formed_issue() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        assert_eq!(validate(&issue(record, &[p.alice, p.bob])), Ok(()));
    }

    #[test]
    fn must_not_consume_inputs() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let mut proposal = issue(record.clone(), &[p.alice, p.bob]);
        proposal.add_input(consumed(record, "earlier"));
        assert_eq!(validate(&proposal), Err(Rule::IssueNoInputs));
    }

    #[test]
    fn must_create_exactly_one_output() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let mut proposal = issue(record.clone(), &[p.alice, p.bob]);
        proposal.add_output(record);
        assert_eq!(validate(&proposal), Err(Rule::IssueOneOutput));

        let mut empty = Proposal::new(Intent::Issue);
        empty.add_signers([p.alice, p.bob]);
        assert_eq!(validate(&empty), Err(Rule::IssueOneOutput));
    }

    #[test]
    fn principal_must_be_positive() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1), p.alice, p.bob).unwrap();
        let zero = ObligationRecord {
            principal: usd(0),
            ..record
        };
        assert_eq!(
            validate(&issue(zero, &[p.alice, p.bob])),
            Err(Rule::PositivePrincipal)
        );
    }

    #[test]
    fn nothing_may_be_settled_yet() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob)
            .unwrap()
            .pay(usd(1))
            .unwrap();
        assert_eq!(
            validate(&issue(record, &[p.alice, p.bob])),
            Err(Rule::IssueNothingSettled)
        );
    }

    #[test]
    fn creditor_and_debtor_must_differ() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let same = ObligationRecord {
            debtor: p.alice,
            ..record
        };
        assert_eq!(
            validate(&issue(same, &[p.alice])),
            Err(Rule::DistinctParties)
        );
    }

    #[test]
    fn exactly_creditor_and_debtor_sign() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        for signers in [
            vec![p.alice],
            vec![p.bob],
            vec![p.alice, p.bob, p.charlie],
        ] {
            assert_eq!(
                validate(&issue(record.clone(), &signers)),
                Err(Rule::IssueSigners)
            );
        }
    }

    #[test]
    fn payment_is_not_allowed() {
        let p = parties();
        let record = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let mut proposal = issue(record, &[p.alice, p.bob]);
        proposal.add_output(CashState::new(usd(5), p.alice));
        assert_eq!(validate(&proposal), Err(Rule::UnexpectedPayment));
    }
}

mod transfer {
    use super::*;

    fn transfer(before: &ObligationRecord, after: ObligationRecord, signers: &[PartyId]) -> Proposal {
        let mut proposal = Proposal::new(Intent::Transfer);
        proposal
            .add_input(consumed(before.clone(), "iou"))
            .add_output(after)
            .add_signers(signers.iter().copied());
        proposal
    }

    #[test]
    fn accepts_new_creditor() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let after = before.with_new_creditor(p.charlie);
        assert_eq!(
            validate(&transfer(&before, after, &[p.alice, p.bob, p.charlie])),
            Ok(())
        );
    }

    #[test]
    fn must_have_one_input_and_one_output() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let after = before.with_new_creditor(p.charlie);

        let mut no_input = Proposal::new(Intent::Transfer);
        no_input
            .add_output(after.clone())
            .add_signers([p.alice, p.bob, p.charlie]);
        assert_eq!(validate(&no_input), Err(Rule::TransferOneInput));

        let mut two_inputs = transfer(&before, after.clone(), &[p.alice, p.bob, p.charlie]);
        two_inputs.add_input(consumed(before.clone(), "other"));
        assert_eq!(validate(&two_inputs), Err(Rule::TransferOneInput));

        let mut two_outputs = transfer(&before, after.clone(), &[p.alice, p.bob, p.charlie]);
        two_outputs.add_output(after);
        assert_eq!(validate(&two_outputs), Err(Rule::TransferOneOutput));

        let mut no_output = Proposal::new(Intent::Transfer);
        no_output
            .add_input(consumed(before, "iou"))
            .add_signers([p.alice, p.bob, p.charlie]);
        assert_eq!(validate(&no_output), Err(Rule::TransferOneOutput));
    }

    #[test]
    fn only_the_creditor_may_change() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let signers = [p.alice, p.bob, p.charlie];

        let mut changed_principal = before.with_new_creditor(p.charlie);
        changed_principal.principal = usd(2000);
        let mut changed_settled = before.with_new_creditor(p.charlie);
        changed_settled.settled = usd(5);

        for after in [changed_principal, changed_settled] {
            assert_eq!(
                validate(&transfer(&before, after, &signers)),
                Err(Rule::OnlyCreditorMayChange)
            );
        }

        let mut changed_debtor = before.with_new_creditor(p.charlie);
        changed_debtor.debtor = p.alice;
        assert_eq!(
            validate(&transfer(&before, changed_debtor, &[p.alice, p.bob, p.charlie])),
            Err(Rule::OnlyCreditorMayChange)
        );
    }

    #[test]
    fn creditor_must_change() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        assert_eq!(
            validate(&transfer(&before, before.clone(), &[p.alice, p.bob])),
            Err(Rule::CreditorMustChange)
        );
    }

    #[test]
    fn debtor_cannot_become_creditor() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let after = before.with_new_creditor(p.bob);
        assert_eq!(
            validate(&transfer(&before, after, &[p.alice, p.bob])),
            Err(Rule::DistinctParties)
        );
    }

    #[test]
    fn debtor_old_and_new_creditor_sign() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let after = before.with_new_creditor(p.charlie);
        let outsider = PartyKey::generate().party();
        for signers in [
            vec![p.alice, p.bob],
            vec![p.bob, p.charlie],
            vec![p.alice, p.charlie],
            vec![p.alice, p.bob, p.charlie, outsider],
        ] {
            assert_eq!(
                validate(&transfer(&before, after.clone(), &signers)),
                Err(Rule::TransferSigners)
            );
        }
    }

    #[test]
    fn changing_lifecycle_is_two_obligations() {
        let p = parties();
        let before = ObligationRecord::issue(usd(1000), p.alice, p.bob).unwrap();
        let unrelated = ObligationRecord::issue(usd(1000), p.charlie, p.bob).unwrap();
        assert_eq!(
            validate(&transfer(&before, unrelated, &[p.alice, p.bob, p.charlie])),
            Err(Rule::MultipleLifecycles)
        );
    }
}

mod settle {
    use super::*;

    /// Alice is owed 1000 by Bob, 300 of it already settled.
    fn obligation(p: &Parties) -> ObligationRecord {
        ObligationRecord::issue(usd(1000), p.alice, p.bob)
            .unwrap()
            .pay(usd(300))
            .unwrap()
    }

    fn settle(before: &ObligationRecord, cash_in: Amount, paid: Amount) -> Proposal {
        let mut proposal = Proposal::new(Intent::Settle);
        proposal
            .add_input(consumed(before.clone(), "iou"))
            .add_input(consumed(CashState::new(cash_in, before.debtor), "cash"))
            .add_output(CashState::new(paid, before.creditor))
            .add_signers(before.participants());
        if cash_in.quantity > paid.quantity && cash_in.currency == paid.currency {
            proposal.add_output(CashState::new(cash_in.checked_sub(&paid).unwrap(), before.debtor));
        }
        proposal
    }

    #[test]
    fn partial_settlement_keeps_the_chain_open() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, usd(500), usd(400));
        proposal.add_output(before.pay(usd(400)).unwrap());
        assert_eq!(validate(&proposal), Ok(()));
    }

    #[test]
    fn full_settlement_closes_the_chain() {
        let p = parties();
        let before = obligation(&p);
        assert_eq!(validate(&settle(&before, usd(700), usd(700))), Ok(()));

        let mut with_output = settle(&before, usd(700), usd(700));
        with_output.add_output(before.pay(usd(700)).unwrap());
        assert_eq!(validate(&with_output), Err(Rule::SettleNoOutput));
    }

    #[test]
    fn partial_settlement_needs_an_output() {
        let p = parties();
        let before = obligation(&p);
        assert_eq!(
            validate(&settle(&before, usd(400), usd(400))),
            Err(Rule::SettleOneOutput)
        );
    }

    #[test]
    fn cannot_overpay() {
        let p = parties();
        let before = obligation(&p);
        assert_eq!(
            validate(&settle(&before, usd(701), usd(701))),
            Err(Rule::Overpayment)
        );
    }

    #[test]
    fn must_have_one_input() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, usd(700), usd(700));
        proposal.inputs.retain(|input| input.obligation().is_none());
        assert_eq!(validate(&proposal), Err(Rule::SettleOneInput));
    }

    #[test]
    fn must_pay_cash() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = Proposal::new(Intent::Settle);
        proposal
            .add_input(consumed(before.clone(), "iou"))
            .add_signers(before.participants());
        assert_eq!(validate(&proposal), Err(Rule::PaymentMissing));
    }

    #[test]
    fn cash_must_reach_the_creditor() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = Proposal::new(Intent::Settle);
        proposal
            .add_input(consumed(before.clone(), "iou"))
            .add_input(consumed(CashState::new(usd(100), p.bob), "cash"))
            .add_output(CashState::new(usd(100), p.bob))
            .add_output(before.clone())
            .add_signers(before.participants());
        assert_eq!(validate(&proposal), Err(Rule::PaymentToCreditor));

        let mut to_stranger = settle(&before, usd(100), usd(100));
        to_stranger.outputs[0] = CashState::new(usd(100), p.charlie).into();
        assert_eq!(validate(&to_stranger), Err(Rule::PaymentRecipient));
    }

    #[test]
    fn payment_must_be_in_obligation_currency() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, gbp(100), gbp(100));
        proposal.add_output(before.pay(usd(100)).unwrap());
        assert_eq!(validate(&proposal), Err(Rule::PaymentCurrency));
    }

    #[test]
    fn cash_must_balance() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, usd(100), usd(200));
        proposal.add_output(before.pay(usd(200)).unwrap());
        assert_eq!(validate(&proposal), Err(Rule::PaymentUnbalanced));
    }

    #[test]
    fn only_settled_may_change() {
        let p = parties();
        let before = obligation(&p);

        let mut new_creditor = before.pay(usd(100)).unwrap();
        new_creditor.creditor = p.charlie;
        let mut new_principal = before.pay(usd(100)).unwrap();
        new_principal.principal = usd(5000);

        for after in [new_creditor, new_principal] {
            let mut proposal = settle(&before, usd(100), usd(100));
            proposal.add_output(after);
            assert_eq!(validate(&proposal), Err(Rule::OnlySettledMayChange));
        }
    }

    #[test]
    fn settled_grows_by_amount_paid() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, usd(100), usd(100));
        proposal.add_output(before.pay(usd(50)).unwrap());
        assert_eq!(validate(&proposal), Err(Rule::SettledIncrement));
    }

    #[test]
    fn exactly_creditor_and_debtor_sign() {
        let p = parties();
        let before = obligation(&p);
        for signers in [vec![p.alice], vec![p.bob], vec![p.alice, p.bob, p.charlie]] {
            let mut proposal = settle(&before, usd(700), usd(700));
            proposal.signers = signers.into_iter().collect();
            assert_eq!(validate(&proposal), Err(Rule::SettleSigners));
        }
    }

    #[test]
    fn change_to_the_debtor_is_not_counted() {
        let p = parties();
        let before = obligation(&p);
        let mut proposal = settle(&before, usd(900), usd(200));
        proposal.add_output(before.pay(usd(200)).unwrap());
        assert_eq!(validate(&proposal), Ok(()));
    }
}
