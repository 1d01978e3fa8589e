//! Local lifecycle overlay for loans
//!
//! The backend owns the base request state, but an accept or refuse made on
//! this device must show up immediately. The flags kept here are layered on
//! top of whatever state was last synced to compute the effective state.
use std::{collections::HashMap, fmt};

/// Request state as synced from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestState {
    Pending,
    Accepted,
    Completed,
}

/// What the UI shows. Refusal collapses to `Completed` in the effective
/// state but is surfaced separately here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Pending,
    Accepted,
    Refused,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ClosureFlags {
    #[n(0)]
    pub accepted: bool,
    #[n(1)]
    pub refused: bool,
    #[n(2)]
    pub closed: bool, // terminal
}

/// Holds closure flags per loan. It records whatever it is told; refusing
/// transitions on a closed loan is up to the caller.
#[derive(Debug, Default)]
pub struct ClosureStore {
    flags: HashMap<String, ClosureFlags>,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Pending => "pending",
            RequestState::Accepted => "accepted",
            RequestState::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl ClosureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, loan_id: &str) -> &mut ClosureFlags {
        self.flags.entry(loan_id.to_string()).or_default()
    }

    pub fn flags(&self, loan_id: &str) -> ClosureFlags {
        self.flags.get(loan_id).copied().unwrap_or_default()
    }

    pub fn accept_exchange(&mut self, loan_id: &str) {
        let flags = self.entry(loan_id);
        flags.refused = false;
        flags.accepted = true;
    }

    pub fn refuse_exchange(&mut self, loan_id: &str) {
        let flags = self.entry(loan_id);
        flags.accepted = false;
        flags.refused = true;
        flags.closed = true;
    }

    pub fn close_exchange(&mut self, loan_id: &str) {
        self.entry(loan_id).closed = true;
    }

    pub fn is_accepted(&self, loan_id: &str) -> bool {
        self.flags(loan_id).accepted
    }

    pub fn is_refused(&self, loan_id: &str) -> bool {
        self.flags(loan_id).refused
    }

    pub fn is_closed(&self, loan_id: &str) -> bool {
        self.flags(loan_id).closed
    }

    pub fn effective_state(&self, loan_id: &str, base: RequestState) -> RequestState {
        let flags = self.flags(loan_id);

        if flags.closed {
            RequestState::Completed
        } else if base == RequestState::Pending && flags.accepted {
            RequestState::Accepted
        } else {
            base
        }
    }

    pub fn display_status(&self, loan_id: &str, base: RequestState) -> LoanStatus {
        if self.is_refused(loan_id) {
            return LoanStatus::Refused;
        }
        match self.effective_state(loan_id, base) {
            RequestState::Pending => LoanStatus::Pending,
            RequestState::Accepted => LoanStatus::Accepted,
            RequestState::Completed => LoanStatus::Completed,
        }
    }

    pub(crate) fn restore(&mut self, loan_id: &str, flags: ClosureFlags) {
        self.flags.insert(loan_id.to_string(), flags);
    }

    pub fn reset(&mut self) {
        self.flags.clear();
    }
}
