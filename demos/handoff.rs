//! Walks one loan through both handoffs, playing the lender and the borrower.
//!
//! `RUST_LOG=debug cargo run --example handoff`. Set `TOOLOOP_DB_PATH` to keep
//! the state in a sled database between runs.

use std::sync::Arc;
use tooloop_exchange::{
    ExchangeService,
    agreement::{HandbackCondition, date_label, timestamp_label},
    closure::RequestState,
    config::ProtocolConfig,
    loan::{Direction, ExchangePass, Loan, new_loan_id},
    service::Confirmation,
    time::CalendarDate,
    verifier::{ProofSubmission, Step},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();
    let config = ProtocolConfig::from_env()?;

    let mut service = match &config.database_path {
        Some(path) => ExchangeService::open(config.clone(), Arc::new(sled::open(path)?))?,
        None => ExchangeService::new(config.clone()),
    };

    let lender = Loan::new(new_loan_id()?, Direction::Outgoing, RequestState::Pending)
        .with_object_name("Hedge trimmer")
        .with_counterpart_name("Alex");
    let borrower = lender.mirrored();
    let pass = ExchangePass::issue(lender.id.clone());

    service.accept_exchange(&lender)?;

    let return_date: CalendarDate = "2026-11-02".parse()?;
    service.set_return_date(&lender, return_date)?;
    info!(loan_id = %lender.id, "return date agreed: {}", date_label(&return_date));

    let pickup = service.issue_pass_qr(&lender, &pass, Step::Pickup)?;
    info!(code = %pickup.verifier_code, "lender shows pickup code");

    let scanned = ProofSubmission::Scanned(pickup.to_json()?);
    if let Confirmation::Recorded {
        accepted_at: Some(at),
        ..
    } = service.confirm_pickup(&borrower, &pass, &scanned)?
    {
        info!("pickup confirmed on {}", timestamp_label(&at));
    }
    // the camera keeps seeing the same code for a few frames
    let again = service.confirm_pickup(&borrower, &pass, &scanned)?;
    info!(?again, "second frame");

    service.set_handback_condition(&lender, HandbackCondition::Conforming)?;
    let handback = service.issue_pass_qr(&lender, &pass, Step::Return)?;
    let typed = ProofSubmission::Manual(handback.verifier_code.to_lowercase());
    service.confirm_return(&borrower, &pass, &typed)?;

    let view = service.exchange_view(&lender);
    info!(status = ?view.status, progress = ?view.progress, "exchange finished");

    Ok(())
}
