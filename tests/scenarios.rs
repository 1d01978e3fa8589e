use anyhow::Context;
use chrono::Duration;
use sled::open;
use std::sync::Arc;
use tooloop_exchange::{
    Confirmation, ExchangeService, ProofError,
    agreement::HandbackCondition,
    error::MismatchField,
    closure::{LoanStatus, RequestState},
    config::ProtocolConfig,
    loan::{Direction, ExchangePass, Loan, Role},
    time::CalendarDate,
    verifier::{ProofSubmission, Step, derive_verifier_code},
};

use tempfile::tempdir; // Use for test db cleanup.

fn config_without_debounce() -> ProtocolConfig {
    ProtocolConfig {
        scan_dedup_window: Duration::zero(),
        ..ProtocolConfig::default()
    }
}

fn date(s: &str) -> CalendarDate {
    s.parse().expect("valid test date")
}

fn scan(service: &ExchangeService, lender: &Loan, pass: &ExchangePass, step: Step) -> ProofSubmission {
    let payload = service
        .issue_pass_qr(lender, pass, step)
        .expect("lender can issue a pass");
    ProofSubmission::Scanned(payload.to_json().expect("payload serialises"))
}

#[test]
fn changed_return_date_requires_reconfirmation() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(config_without_debounce());

    // the lender and the borrower look at the same loan from opposite sides
    let lender = Loan::new("l1", Direction::Outgoing, RequestState::Accepted);
    let borrower = lender.mirrored();
    let pass = ExchangePass::new("l1", "TL-L1-AB91");

    service.set_return_date(&lender, date("2026-03-01"))?;

    let code = derive_verifier_code(&pass.code_seed, Step::Pickup);
    assert_eq!(code, "CZ7O");

    let confirmation = service
        .confirm_pickup(&borrower, &pass, &ProofSubmission::Manual(code.clone()))
        .context("Pickup failed on first confirmation: ")?;
    assert!(matches!(
        confirmation,
        Confirmation::Recorded { accepted_at: Some(_), .. }
    ));
    assert!(service.agreements().is_pickup_accepted("l1"));

    // the lender moves the date: the earlier acceptance no longer holds
    assert!(service.set_return_date(&lender, date("2026-03-05"))?);
    assert!(!service.agreements().is_pickup_accepted("l1"));
    assert_eq!(service.agreements().pickup("l1").accepted_at, None);

    // the code itself is unchanged, but has to be presented again
    assert_eq!(derive_verifier_code(&pass.code_seed, Step::Pickup), code);
    service
        .confirm_pickup(&borrower, &pass, &ProofSubmission::Manual(code))
        .context("Pickup failed on reconfirmation: ")?;
    assert!(service.agreements().is_pickup_accepted("l1"));
    assert_eq!(service.agreements().return_date("l1"), Some(date("2026-03-05")));

    Ok(())
}

#[test]
fn full_exchange_with_qr_scans() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(config_without_debounce());

    let lender = Loan::new("l2", Direction::Outgoing, RequestState::Pending)
        .with_object_name("Cordless drill")
        .with_counterpart_name("Sam");
    let borrower = lender.mirrored();
    let pass = ExchangePass::issue("l2");

    service.accept_exchange(&lender)?;
    assert_eq!(service.status(&borrower), LoanStatus::Accepted);

    service.set_return_date(&lender, date("2026-04-10"))?;
    let pickup_scan = scan(&service, &lender, &pass, Step::Pickup);

    // a pickup QR is useless for the return
    service.set_handback_condition(&lender, HandbackCondition::PartiallyConforming)?;
    assert_eq!(
        service.confirm_return(&borrower, &pass, &pickup_scan),
        Err(ProofError::OutOfOrder)
    );

    service.confirm_pickup(&borrower, &pass, &pickup_scan)?;
    assert!(service.progress().progress("l2").pickup_validated);

    assert!(matches!(
        service.confirm_return(&borrower, &pass, &pickup_scan),
        Err(ProofError::Mismatch(_))
    ));

    let return_scan = scan(&service, &lender, &pass, Step::Return);
    let confirmation = service.confirm_return(&borrower, &pass, &return_scan)?;

    match confirmation {
        Confirmation::Recorded { step, progress, .. } => {
            assert_eq!(step, Step::Return);
            assert!(progress.pickup_validated && progress.return_validated);
        }
        Confirmation::Duplicate => panic!("first return scan must be recorded"),
    }
    assert_eq!(service.status(&lender), LoanStatus::Completed);
    assert!(service.closure().is_closed("l2"));
    assert!(!service.closure().is_refused("l2"));

    // nothing moves once closed
    assert_eq!(
        service.set_return_date(&lender, date("2026-05-01")),
        Err(ProofError::AlreadyClosed)
    );

    Ok(())
}

#[test]
fn scanning_another_loans_pass_is_a_mismatch() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(config_without_debounce());

    let drill = Loan::new("l-drill", Direction::Outgoing, RequestState::Accepted);
    let ladder = Loan::new("l-ladder", Direction::Outgoing, RequestState::Accepted);
    let drill_pass = ExchangePass::issue("l-drill");
    let ladder_pass = ExchangePass::issue("l-ladder");

    service.set_return_date(&drill, date("2026-04-10"))?;
    service.set_return_date(&ladder, date("2026-04-12"))?;

    let ladder_scan = scan(&service, &ladder, &ladder_pass, Step::Pickup);
    let err = service
        .confirm_pickup(&drill.mirrored(), &drill_pass, &ladder_scan)
        .unwrap_err();

    assert!(err.to_string().contains("doesn't correspond to this step"));
    assert!(!service.agreements().is_pickup_accepted("l-drill"));

    Ok(())
}

#[test]
fn repeated_scans_count_once() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(ProtocolConfig::default());

    let lender = Loan::new("l3", Direction::Outgoing, RequestState::Accepted);
    let borrower = lender.mirrored();
    let pass = ExchangePass::new("l3", "TL-L3-0000");
    service.set_return_date(&lender, date("2026-04-10"))?;

    // a burst of frames showing a bad payload is one rejection, not several
    let junk = ProofSubmission::Scanned("https://example.com/not-a-pass".to_string());
    assert_eq!(
        service.confirm_pickup(&borrower, &pass, &junk),
        Err(ProofError::Malformed)
    );
    assert_eq!(service.confirm_pickup(&borrower, &pass, &junk), Ok(Confirmation::Duplicate));

    let pickup_scan = scan(&service, &lender, &pass, Step::Pickup);

    let first = service.confirm_pickup(&borrower, &pass, &pickup_scan)?;
    let second = service.confirm_pickup(&borrower, &pass, &pickup_scan)?;

    assert!(matches!(first, Confirmation::Recorded { .. }));
    assert_eq!(second, Confirmation::Duplicate);

    // typed codes are never debounced
    let code = ProofSubmission::Manual(derive_verifier_code(&pass.code_seed, Step::Pickup));
    assert!(matches!(
        service.confirm_pickup(&borrower, &pass, &code)?,
        Confirmation::Recorded { .. }
    ));

    Ok(())
}

#[test]
fn same_qr_on_the_right_loan_is_not_a_duplicate() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(ProtocolConfig::default());

    let drill = Loan::new("l-drill", Direction::Outgoing, RequestState::Accepted);
    let ladder = Loan::new("l-ladder", Direction::Outgoing, RequestState::Accepted);
    let drill_pass = ExchangePass::new("l-drill", "TL-DRILL-01");
    let ladder_pass = ExchangePass::new("l-ladder", "TL-LADDER-01");
    service.set_return_date(&drill, date("2026-04-10"))?;
    service.set_return_date(&ladder, date("2026-04-12"))?;

    let drill_scan = scan(&service, &drill, &drill_pass, Step::Pickup);

    // the borrower opens the wrong loan first, then the right one, within the window
    assert_eq!(
        service.confirm_pickup(&ladder.mirrored(), &ladder_pass, &drill_scan),
        Err(ProofError::Mismatch(MismatchField::LoanId))
    );
    let confirmation = service.confirm_pickup(&drill.mirrored(), &drill_pass, &drill_scan)?;

    assert!(matches!(confirmation, Confirmation::Recorded { .. }));
    assert!(service.progress().progress("l-drill").pickup_validated);
    assert!(!service.progress().progress("l-ladder").pickup_validated);

    Ok(())
}

#[test]
fn only_the_borrower_confirms() -> anyhow::Result<()> {
    let mut service = ExchangeService::new(config_without_debounce());

    let lender = Loan::new("l4", Direction::Outgoing, RequestState::Accepted);
    let pass = ExchangePass::new("l4", "TL-L4-AB91");
    service.set_return_date(&lender, date("2026-04-10"))?;

    let code = ProofSubmission::Manual(derive_verifier_code(&pass.code_seed, Step::Pickup));
    assert_eq!(
        service.confirm_pickup(&lender, &pass, &code),
        Err(ProofError::WrongParty(Role::Borrower))
    );
    assert_eq!(
        service.set_return_date(&lender.mirrored(), date("2026-04-11")),
        Err(ProofError::WrongParty(Role::Lender))
    );

    Ok(())
}

#[test]
fn state_survives_restart() -> anyhow::Result<()> {
    // Sled uses file-based locking to prevent concurrent access, so only one test
    // can hold the lock at a time. Each test gets its own database on temp for
    // simplified cleanup.
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("state_survives_restart.db");
    let db = Arc::new(open(db_path)?);

    // reset the db for each test run
    db.clear()?;

    let lender = Loan::new("l5", Direction::Outgoing, RequestState::Pending);
    let refused = Loan::new("l6", Direction::Outgoing, RequestState::Pending);
    let pass = ExchangePass::new("l5", "TL-L5-AB91");

    {
        let mut service = ExchangeService::open(config_without_debounce(), db.clone())?;
        service.accept_exchange(&lender)?;
        service.set_return_date(&lender, date("2026-06-01"))?;
        let code = derive_verifier_code(&pass.code_seed, Step::Pickup);
        service.confirm_pickup(&lender.mirrored(), &pass, &ProofSubmission::Manual(code))?;
        service.refuse_exchange(&refused)?;
    }

    // a fresh service over the same database picks up where the last one stopped
    let service = ExchangeService::open(config_without_debounce(), db)?;

    assert_eq!(service.status(&lender), LoanStatus::Accepted);
    assert_eq!(service.agreements().return_date("l5"), Some(date("2026-06-01")));
    assert!(service.agreements().is_pickup_accepted("l5"));
    assert!(service.progress().progress("l5").pickup_validated);
    assert_eq!(service.status(&refused), LoanStatus::Refused);

    Ok(())
}
