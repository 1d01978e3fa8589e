//! Per-phase agreements between lender and borrower
//!
//! The lender fixes a precondition for each phase (a return date before the
//! pickup, the object's condition before the return) and the borrower accepts
//! it by presenting the matching verifier code. Any change to the precondition
//! drops the borrower's acceptance: an acceptance only ever refers to the
//! value it was given against.
use super::time::{CalendarDate, TimeStamp};
use chrono::{Local, TimeZone, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum HandbackCondition {
    #[n(0)]
    Conforming,
    #[n(1)]
    PartiallyConforming,
    #[n(2)]
    Damaged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PickupAgreement {
    #[n(0)]
    pub return_date: Option<CalendarDate>, // set by the lender
    #[n(1)]
    pub borrower_accepted: bool,
    #[n(2)]
    pub accepted_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ReturnAgreement {
    #[n(0)]
    pub handback_condition: Option<HandbackCondition>, // set by the lender
    #[n(1)]
    pub borrower_accepted: bool,
    #[n(2)]
    pub accepted_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Default)]
pub struct AgreementStore {
    pickups: HashMap<String, PickupAgreement>,
    handbacks: HashMap<String, ReturnAgreement>,
}

impl HandbackCondition {
    pub fn label(&self) -> &'static str {
        match self {
            HandbackCondition::Conforming => "Conforming",
            HandbackCondition::PartiallyConforming => "Partially conforming",
            HandbackCondition::Damaged => "Damaged",
        }
    }
}

impl PickupAgreement {
    /// Returns true when the stored date actually changed.
    fn set_return_date(&mut self, date: CalendarDate) -> bool {
        if self.return_date == Some(date) {
            return false;
        }
        self.return_date = Some(date);
        self.set_accepted(false);
        true
    }
    fn set_accepted(&mut self, value: bool) {
        self.borrower_accepted = value;
        self.accepted_at = value.then(TimeStamp::new);
    }
}

impl ReturnAgreement {
    /// Returns true when the stored condition actually changed.
    fn set_condition(&mut self, condition: HandbackCondition) -> bool {
        if self.handback_condition == Some(condition) {
            return false;
        }
        self.handback_condition = Some(condition);
        self.set_accepted(false);
        true
    }
    fn set_accepted(&mut self, value: bool) {
        self.borrower_accepted = value;
        self.accepted_at = value.then(TimeStamp::new);
    }
}

impl AgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pickup_mut(&mut self, loan_id: &str) -> &mut PickupAgreement {
        self.pickups.entry(loan_id.to_string()).or_default()
    }

    fn handback_mut(&mut self, loan_id: &str) -> &mut ReturnAgreement {
        self.handbacks.entry(loan_id.to_string()).or_default()
    }

    pub fn pickup(&self, loan_id: &str) -> PickupAgreement {
        self.pickups.get(loan_id).cloned().unwrap_or_default()
    }

    pub fn handback(&self, loan_id: &str) -> ReturnAgreement {
        self.handbacks.get(loan_id).cloned().unwrap_or_default()
    }

    // pickup phase

    pub fn return_date(&self, loan_id: &str) -> Option<CalendarDate> {
        self.pickups.get(loan_id).and_then(|a| a.return_date)
    }

    /// Stores the lender's return date. A new value drops the borrower's
    /// acceptance; resubmitting the current value leaves it alone.
    pub fn set_return_date(&mut self, loan_id: &str, date: CalendarDate) -> bool {
        self.pickup_mut(loan_id).set_return_date(date)
    }

    pub fn is_pickup_accepted(&self, loan_id: &str) -> bool {
        self.pickups
            .get(loan_id)
            .is_some_and(|a| a.borrower_accepted)
    }

    pub fn set_pickup_accepted(&mut self, loan_id: &str, value: bool) {
        self.pickup_mut(loan_id).set_accepted(value);
    }

    // return phase

    pub fn handback_condition(&self, loan_id: &str) -> Option<HandbackCondition> {
        self.handbacks
            .get(loan_id)
            .and_then(|a| a.handback_condition)
    }

    /// Same rule as [`AgreementStore::set_return_date`], applied to the handback condition.
    pub fn set_handback_condition(&mut self, loan_id: &str, condition: HandbackCondition) -> bool {
        self.handback_mut(loan_id).set_condition(condition)
    }

    pub fn is_return_accepted(&self, loan_id: &str) -> bool {
        self.handbacks
            .get(loan_id)
            .is_some_and(|a| a.borrower_accepted)
    }

    pub fn set_return_accepted(&mut self, loan_id: &str, value: bool) {
        self.handback_mut(loan_id).set_accepted(value);
    }

    pub(crate) fn restore(&mut self, loan_id: &str, pickup: PickupAgreement, handback: ReturnAgreement) {
        self.pickups.insert(loan_id.to_string(), pickup);
        self.handbacks.insert(loan_id.to_string(), handback);
    }

    pub fn reset(&mut self) {
        self.pickups.clear();
        self.handbacks.clear();
    }
}

pub fn date_label(date: &CalendarDate) -> String {
    date.to_naive_date().format("%-d %B %Y").to_string()
}

/// Acceptance time in the device's local time zone.
pub fn timestamp_label(at: &TimeStamp<Utc>) -> String {
    timestamp_label_in(at, &Local)
}

pub fn timestamp_label_in<Tz>(at: &TimeStamp<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.to_datetime_utc()
        .with_timezone(tz)
        .format("%-d %B %Y at %H:%M")
        .to_string()
}
