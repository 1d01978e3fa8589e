//! Service layer API for the exchange workflow
//!
//! `ExchangeService` owns one instance of every store and is the only thing a
//! UI layer needs to hold. Each handoff confirmation updates the agreement, the
//! progress ledger and the closure flags in a single call, so a screen can
//! never record an acceptance without the matching progress.
use super::agreement::{AgreementStore, HandbackCondition, PickupAgreement, ReturnAgreement};
use super::closure::{ClosureStore, LoanStatus, RequestState};
use super::config::ProtocolConfig;
use super::error::{MismatchField, ProofError};
use super::loan::{ExchangePass, Loan, Role};
use super::progress::{ProgressTracker, ProofProgress};
use super::repository::{LedgerRepository, LedgerStore, LoanRecord};
use super::scan::{ScanDebouncer, ScanDisposition};
use super::time::{CalendarDate, TimeStamp};
use super::verifier::{self, ExchangeQrPayload, ProofSubmission, Step};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ExchangeService {
    config: ProtocolConfig,
    agreements: AgreementStore,
    progress: ProgressTracker,
    closure: ClosureStore,
    scans: ScanDebouncer,
    repository: Option<Box<dyn LedgerStore>>,
}

/// Result of a borrower confirming a handoff step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Recorded {
        step: Step,
        accepted_at: Option<TimeStamp<Utc>>,
        progress: ProofProgress,
    },
    /// Same scan seen again within the debounce window; nothing was checked or changed.
    Duplicate,
}

/// Snapshot of a loan for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeView {
    pub loan_id: String,
    pub status: LoanStatus,
    pub effective_state: RequestState,
    pub progress: ProofProgress,
    pub pickup: PickupAgreement,
    pub handback: ReturnAgreement,
    /// Who has to act next, if anyone.
    pub awaiting: Option<Role>,
}

impl ExchangeService {
    pub fn new(config: ProtocolConfig) -> Self {
        let scans = ScanDebouncer::new(config.scan_dedup_window);
        Self {
            config,
            agreements: AgreementStore::new(),
            progress: ProgressTracker::new(),
            closure: ClosureStore::new(),
            scans,
            repository: None,
        }
    }

    /// Loads every persisted loan and writes each later change back to `instance`.
    pub fn open(config: ProtocolConfig, instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        Self::with_store(config, LedgerRepository::new(instance))
    }

    /// Same as [`Self::open`] over any [`LedgerStore`].
    pub fn with_store(
        config: ProtocolConfig,
        store: impl LedgerStore + 'static,
    ) -> anyhow::Result<Self> {
        let mut service = Self::new(config);

        let records = store.load_all()?;
        info!(loans = records.len(), "restoring exchange state");
        for record in records {
            service.restore(record);
        }
        service.repository = Some(Box::new(store));

        Ok(service)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn agreements(&self) -> &AgreementStore {
        &self.agreements
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn closure(&self) -> &ClosureStore {
        &self.closure
    }

    fn restore(&mut self, record: LoanRecord) {
        let LoanRecord {
            loan_id,
            pickup,
            handback,
            progress,
            closure,
        } = record;
        self.agreements.restore(&loan_id, pickup, handback);
        self.progress.restore(&loan_id, progress);
        self.closure.restore(&loan_id, closure);
    }

    pub fn snapshot(&self, loan_id: &str) -> LoanRecord {
        LoanRecord {
            loan_id: loan_id.to_string(),
            pickup: self.agreements.pickup(loan_id),
            handback: self.agreements.handback(loan_id),
            progress: self.progress.progress(loan_id),
            closure: self.closure.flags(loan_id),
        }
    }

    /// Writes the loan's current state through. On failure the stores are put
    /// back to `before`, so memory never runs ahead of disk.
    fn commit(&mut self, before: LoanRecord) -> Result<(), ProofError> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let saved = repository.save(&self.snapshot(&before.loan_id));
        if let Err(e) = saved {
            error!(loan_id = %before.loan_id, "failed to persist exchange state: {e:#}");
            self.restore(before);
            return Err(ProofError::Persistence(e.to_string()));
        }
        Ok(())
    }

    fn require_role(loan: &Loan, role: Role) -> Result<(), ProofError> {
        if loan.actor_role() != role {
            return Err(ProofError::WrongParty(role));
        }
        Ok(())
    }

    fn require_open(&self, loan: &Loan) -> Result<(), ProofError> {
        if self.closure.is_closed(&loan.id) {
            return Err(ProofError::AlreadyClosed);
        }
        Ok(())
    }

    fn require_state(&self, loan: &Loan, expected: RequestState) -> Result<(), ProofError> {
        let actual = self.effective_state(loan);
        if actual != expected {
            return Err(ProofError::InvalidState { expected, actual });
        }
        Ok(())
    }

    fn require_pass(loan: &Loan, pass: &ExchangePass) -> Result<(), ProofError> {
        if pass.loan_id != loan.id {
            return Err(ProofError::Mismatch(MismatchField::LoanId));
        }
        Ok(())
    }

    fn require_precondition(&self, loan: &Loan, step: Step) -> Result<(), ProofError> {
        let present = match step {
            Step::Pickup => self.agreements.return_date(&loan.id).is_some(),
            Step::Return => self.agreements.handback_condition(&loan.id).is_some(),
        };
        if !present {
            return Err(ProofError::PreconditionMissing {
                step,
                party: Role::Lender,
            });
        }
        Ok(())
    }

    pub fn effective_state(&self, loan: &Loan) -> RequestState {
        self.closure.effective_state(&loan.id, loan.base_state)
    }

    pub fn status(&self, loan: &Loan) -> LoanStatus {
        self.closure.display_status(&loan.id, loan.base_state)
    }

    /// Lender accepts a pending request
    pub fn accept_exchange(&mut self, loan: &Loan) -> Result<(), ProofError> {
        Self::require_role(loan, Role::Lender)?;
        self.require_open(loan)?;
        self.require_state(loan, RequestState::Pending)?;

        let before = self.snapshot(&loan.id);
        self.closure.accept_exchange(&loan.id);
        self.commit(before)?;

        info!(loan_id = %loan.id, "exchange accepted");
        Ok(())
    }

    /// Lender refuses a pending request. Terminal.
    pub fn refuse_exchange(&mut self, loan: &Loan) -> Result<(), ProofError> {
        Self::require_role(loan, Role::Lender)?;
        self.require_open(loan)?;
        self.require_state(loan, RequestState::Pending)?;

        let before = self.snapshot(&loan.id);
        self.closure.refuse_exchange(&loan.id);
        self.commit(before)?;

        info!(loan_id = %loan.id, "exchange refused");
        Ok(())
    }

    /// Close a loan that completed outside the handoff flow. Closing twice is a no-op.
    pub fn close_exchange(&mut self, loan: &Loan) -> Result<(), ProofError> {
        if self.closure.is_closed(&loan.id) {
            return Ok(());
        }
        let before = self.snapshot(&loan.id);
        self.closure.close_exchange(&loan.id);
        self.commit(before)?;

        info!(loan_id = %loan.id, "exchange closed");
        Ok(())
    }

    /// Lender fixes the return date. Returns whether the stored date changed;
    /// a change withdraws the borrower's pickup acceptance.
    pub fn set_return_date(&mut self, loan: &Loan, date: CalendarDate) -> Result<bool, ProofError> {
        Self::require_role(loan, Role::Lender)?;
        self.require_open(loan)?;

        let before = self.snapshot(&loan.id);
        let was_accepted = before.pickup.borrower_accepted;
        if !self.agreements.set_return_date(&loan.id, date) {
            return Ok(false);
        }
        self.commit(before)?;

        info!(loan_id = %loan.id, %date, "return date set");
        if was_accepted {
            info!(loan_id = %loan.id, "pickup acceptance withdrawn, borrower must confirm again");
        }
        Ok(true)
    }

    /// Lender records the handback condition. Same change rule as [`Self::set_return_date`].
    pub fn set_handback_condition(
        &mut self,
        loan: &Loan,
        condition: HandbackCondition,
    ) -> Result<bool, ProofError> {
        Self::require_role(loan, Role::Lender)?;
        self.require_open(loan)?;

        let before = self.snapshot(&loan.id);
        let was_accepted = before.handback.borrower_accepted;
        if !self.agreements.set_handback_condition(&loan.id, condition) {
            return Ok(false);
        }
        self.commit(before)?;

        info!(loan_id = %loan.id, condition = condition.label(), "handback condition set");
        if was_accepted {
            info!(loan_id = %loan.id, "return acceptance withdrawn, borrower must confirm again");
        }
        Ok(true)
    }

    /// Lender builds the QR payload (and manual code) to show the borrower.
    pub fn issue_pass_qr(
        &self,
        loan: &Loan,
        pass: &ExchangePass,
        step: Step,
    ) -> Result<ExchangeQrPayload, ProofError> {
        Self::require_role(loan, Role::Lender)?;
        self.require_open(loan)?;
        Self::require_pass(loan, pass)?;
        if step == Step::Return && !self.progress.progress(&loan.id).pickup_validated {
            return Err(ProofError::OutOfOrder);
        }
        self.require_precondition(loan, step)?;

        Ok(verifier::build_qr_payload_with(
            self.config.code_scheme,
            pass,
            step,
        ))
    }

    fn is_duplicate_scan(&mut self, loan: &Loan, step: Step, submission: &ProofSubmission) -> bool {
        let ProofSubmission::Scanned(raw) = submission else {
            return false;
        };
        // the same QR shown on another loan's screen is a separate attempt
        let key = format!("{}/{step}/{raw}", loan.id);
        if self.scans.observe(&key) == ScanDisposition::Duplicate {
            debug!(loan_id = %loan.id, %step, "ignoring repeated scan");
            return true;
        }
        false
    }

    fn verify(
        &self,
        loan: &Loan,
        pass: &ExchangePass,
        step: Step,
        submission: &ProofSubmission,
    ) -> Result<(), ProofError> {
        verifier::verify_submission(self.config.code_scheme, pass, step, submission).inspect_err(
            |e| warn!(loan_id = %loan.id, %step, "handoff proof rejected: {e}"),
        )
    }

    /// Borrower proves the pickup. Records acceptance against the current
    /// return date and marks the pickup validated.
    pub fn confirm_pickup(
        &mut self,
        loan: &Loan,
        pass: &ExchangePass,
        submission: &ProofSubmission,
    ) -> Result<Confirmation, ProofError> {
        Self::require_role(loan, Role::Borrower)?;
        if self.is_duplicate_scan(loan, Step::Pickup, submission) {
            return Ok(Confirmation::Duplicate);
        }
        self.require_open(loan)?;
        self.require_state(loan, RequestState::Accepted)?;
        Self::require_pass(loan, pass)?;
        self.require_precondition(loan, Step::Pickup)?;
        self.verify(loan, pass, Step::Pickup, submission)?;

        let before = self.snapshot(&loan.id);
        self.agreements.set_pickup_accepted(&loan.id, true);
        self.progress.set_pickup_validated(&loan.id, true);
        self.commit(before)?;

        info!(loan_id = %loan.id, "pickup validated");
        Ok(Confirmation::Recorded {
            step: Step::Pickup,
            accepted_at: self.agreements.pickup(&loan.id).accepted_at,
            progress: self.progress.progress(&loan.id),
        })
    }

    /// Borrower proves the return. Requires a validated pickup and closes the exchange.
    pub fn confirm_return(
        &mut self,
        loan: &Loan,
        pass: &ExchangePass,
        submission: &ProofSubmission,
    ) -> Result<Confirmation, ProofError> {
        Self::require_role(loan, Role::Borrower)?;
        if self.is_duplicate_scan(loan, Step::Return, submission) {
            return Ok(Confirmation::Duplicate);
        }
        self.require_open(loan)?;
        Self::require_pass(loan, pass)?;
        if !self.progress.progress(&loan.id).pickup_validated {
            return Err(ProofError::OutOfOrder);
        }
        self.require_precondition(loan, Step::Return)?;
        self.verify(loan, pass, Step::Return, submission)?;

        let before = self.snapshot(&loan.id);
        self.progress.set_return_validated(&loan.id, true)?;
        self.agreements.set_return_accepted(&loan.id, true);
        self.closure.close_exchange(&loan.id);
        self.commit(before)?;

        info!(loan_id = %loan.id, "return validated, exchange closed");
        Ok(Confirmation::Recorded {
            step: Step::Return,
            accepted_at: self.agreements.handback(&loan.id).accepted_at,
            progress: self.progress.progress(&loan.id),
        })
    }

    pub fn exchange_view(&self, loan: &Loan) -> ExchangeView {
        let status = self.status(loan);
        let pickup = self.agreements.pickup(&loan.id);
        let handback = self.agreements.handback(&loan.id);

        let awaiting = match status {
            LoanStatus::Pending => Some(Role::Lender),
            LoanStatus::Refused | LoanStatus::Completed => None,
            LoanStatus::Accepted => {
                if pickup.return_date.is_none() {
                    Some(Role::Lender)
                } else if !pickup.borrower_accepted {
                    Some(Role::Borrower)
                } else if handback.handback_condition.is_none() {
                    Some(Role::Lender)
                } else if !handback.borrower_accepted {
                    Some(Role::Borrower)
                } else {
                    None
                }
            }
        };

        ExchangeView {
            loan_id: loan.id.clone(),
            status,
            effective_state: self.effective_state(loan),
            progress: self.progress.progress(&loan.id),
            pickup,
            handback,
            awaiting,
        }
    }

    /// Drops all in-memory state. Persisted records are left alone.
    pub fn reset(&mut self) {
        self.agreements.reset();
        self.progress.reset();
        self.closure.reset();
        self.scans.reset();
    }
}
