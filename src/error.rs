use super::closure::RequestState;
use super::loan::Role;
use super::verifier::Step;

/// Why a handoff action was turned down. The display text is the notice shown to the user.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Scanned content is not a recognised exchange pass")]
    Malformed,
    #[error("Scanned content is not a recognised exchange pass (unexpected format)")]
    WrongShape,
    #[error("This code doesn't correspond to this step ({0} differs)")]
    Mismatch(MismatchField),
    #[error("Verification codes are exactly 4 letters or digits")]
    IncompleteCode,
    #[error("The {party} must {} before the {step} can be validated", .step.precondition_action())]
    PreconditionMissing { step: Step, party: Role },
    #[error("The pickup must be validated before the return")]
    OutOfOrder,
    #[error("Only the {0} can perform this action")]
    WrongParty(Role),
    #[error("This exchange is already closed")]
    AlreadyClosed,
    #[error("This exchange must be {expected} but is {actual}")]
    InvalidState {
        expected: RequestState,
        actual: RequestState,
    },
    #[error("Failed to save exchange state: {0}")]
    Persistence(String),
}

/// Which part of a submission disagreed with the expected pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchField {
    LoanId,
    Step,
    VerifierCode,
}

impl std::fmt::Display for MismatchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MismatchField::LoanId => "loan",
            MismatchField::Step => "step",
            MismatchField::VerifierCode => "code",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
