//! Which handoff phases of a loan have been validated
use super::error::ProofError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ProofProgress {
    #[n(0)]
    pub pickup_validated: bool,
    #[n(1)]
    pub return_validated: bool,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: HashMap<String, ProofProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self, loan_id: &str) -> ProofProgress {
        self.entries.get(loan_id).copied().unwrap_or_default()
    }

    pub fn set_pickup_validated(&mut self, loan_id: &str, value: bool) {
        self.entries
            .entry(loan_id.to_string())
            .or_default()
            .pickup_validated = value;
    }

    /// A return can only be marked validated once the pickup is.
    pub fn set_return_validated(&mut self, loan_id: &str, value: bool) -> Result<(), ProofError> {
        if value && !self.progress(loan_id).pickup_validated {
            return Err(ProofError::OutOfOrder);
        }
        self.entries
            .entry(loan_id.to_string())
            .or_default()
            .return_validated = value;
        Ok(())
    }

    pub(crate) fn restore(&mut self, loan_id: &str, progress: ProofProgress) {
        self.entries.insert(loan_id.to_string(), progress);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_nothing_validated() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.progress("l1"), ProofProgress::default());
    }

    #[test]
    fn flags_are_set_independently() {
        let mut tracker = ProgressTracker::new();
        tracker.set_pickup_validated("l1", true);

        assert!(tracker.progress("l1").pickup_validated);
        assert!(!tracker.progress("l1").return_validated);

        tracker.set_return_validated("l1", true).unwrap();
        tracker.set_pickup_validated("l2", true);
        assert_eq!(
            tracker.progress("l1"),
            ProofProgress {
                pickup_validated: true,
                return_validated: true
            }
        );
    }

    #[test]
    fn return_before_pickup_is_out_of_order() {
        let mut tracker = ProgressTracker::new();

        assert_eq!(
            tracker.set_return_validated("l1", true),
            Err(ProofError::OutOfOrder)
        );
        assert!(!tracker.progress("l1").return_validated);
        // clearing is always allowed
        assert_eq!(tracker.set_return_validated("l1", false), Ok(()));
    }
}
