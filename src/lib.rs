//! Exchange lifecycle and proof-of-handoff protocol for peer-to-peer lending.
//!
//! A loan moves from request to completion through two physical handoffs,
//! pickup and return. For each one the lender sets a precondition and shows a
//! verifier code (as a QR payload or typed by hand); the borrower presents it
//! back to accept. [`service::ExchangeService`] ties the stores together.

pub mod agreement;
pub mod closure;
pub mod config;
pub mod error;
pub mod loan;
pub mod progress;
pub mod repository;
pub mod scan;
pub mod service;
pub mod time;
pub mod verifier;

pub use error::ProofError;
pub use service::{Confirmation, ExchangeService, ExchangeView};
