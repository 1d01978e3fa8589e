//! Loan records as handed to us by the data layer
use super::closure::RequestState;
use bech32::Bech32m;
use std::fmt;
use uuid7::uuid7;

const LOAN_ID_HRP: &str = "loan_";

/// Direction of a loan from the current actor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    /// I am borrowing.
    Incoming,
    /// I am lending.
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Lender,
    Borrower,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: String,
    pub direction: Direction,
    pub base_state: RequestState, // last value synced from the backend
    pub object_name: String,
    pub counterpart_name: String,
}

/// The per-loan secret both devices derive verifier codes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePass {
    pub loan_id: String,
    pub code_seed: String,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Lender => f.write_str("lender"),
            Role::Borrower => f.write_str("borrower"),
        }
    }
}

impl Loan {
    pub fn new(id: impl Into<String>, direction: Direction, base_state: RequestState) -> Self {
        Self {
            id: id.into(),
            direction,
            base_state,
            object_name: String::new(),
            counterpart_name: String::new(),
        }
    }
    pub fn with_object_name(mut self, name: impl Into<String>) -> Self {
        self.object_name = name.into();
        self
    }
    pub fn with_counterpart_name(mut self, name: impl Into<String>) -> Self {
        self.counterpart_name = name.into();
        self
    }
    /// The same loan as seen from the other device.
    pub fn mirrored(&self) -> Self {
        let direction = match self.direction {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        };
        Self {
            direction,
            ..self.clone()
        }
    }
    pub fn actor_role(&self) -> Role {
        match self.direction {
            Direction::Incoming => Role::Borrower,
            Direction::Outgoing => Role::Lender,
        }
    }
}

/// Mint a loan id (`loan_1...`), a bech32m-encoded uuid7.
pub fn new_loan_id() -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(LOAN_ID_HRP)?;
    Ok(bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?)
}

impl ExchangePass {
    pub fn new(loan_id: impl Into<String>, code_seed: impl Into<String>) -> Self {
        Self {
            loan_id: loan_id.into(),
            code_seed: code_seed.into(),
        }
    }
    /// Mint a fresh pass. The seed takes the random tail of a uuid7 so two
    /// passes issued in the same millisecond still differ.
    pub fn issue(loan_id: impl Into<String>) -> Self {
        let id = uuid7();
        let seed = format!("TL-{}", hex::encode_upper(&id.as_bytes()[8..]));

        Self::new(loan_id, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_maps_to_role() {
        let lending = Loan::new("l1", Direction::Outgoing, RequestState::Pending);
        let borrowing = lending.mirrored();

        assert_eq!(lending.actor_role(), Role::Lender);
        assert_eq!(borrowing.actor_role(), Role::Borrower);
        assert_eq!(borrowing.id, lending.id);
    }

    #[test]
    fn loan_ids_are_prefixed_and_unique() {
        let a = new_loan_id().unwrap();
        let b = new_loan_id().unwrap();

        assert!(a.starts_with("loan_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn issued_seeds_are_unique() {
        let a = ExchangePass::issue("l1");
        let b = ExchangePass::issue("l1");

        assert!(a.code_seed.starts_with("TL-"));
        assert_eq!(a.code_seed.len(), 3 + 16);
        assert_ne!(a.code_seed, b.code_seed);
    }
}
