//! Verifier codes and QR payloads for the pickup and return handoffs
//!
//! Both devices derive the same 4-character code from the loan's code seed and
//! the step, so nothing has to be looked up online at the moment of the handoff.
//! The step is folded into the seed, which keeps a pickup code from validating
//! a return.
use super::error::{MismatchField, ProofError};
use super::loan::ExchangePass;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

pub const PAYLOAD_TYPE: &str = "tooloop-pass-step";
pub const PAYLOAD_VERSION: u64 = 1;
pub const CODE_LEN: usize = 4;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Pickup,
    Return,
}

/// How the 4-character code is derived from a step seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeScheme {
    /// 31-multiplier rolling hash. Cheap and reproducible on any client.
    #[default]
    Rolling,
    /// Leading 32 bits of a SHA-256 digest.
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeQrPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u64,
    pub loan_id: String,
    pub step: Step,
    pub verifier_code: String,
    pub code_seed: String, // step scoped
}

/// Proof offered by the borrower's device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofSubmission {
    /// Raw text decoded from the lender's QR code.
    Scanned(String),
    /// Code typed in by hand.
    Manual(String),
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Pickup => "pickup",
            Step::Return => "return",
        }
    }
    pub fn label(&self) -> &'static str {
        match self {
            Step::Pickup => "PICKUP",
            Step::Return => "RETURN",
        }
    }
    pub(crate) fn precondition_action(&self) -> &'static str {
        match self {
            Step::Pickup => "set a return date",
            Step::Return => "record the object's condition",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rolling" => Ok(CodeScheme::Rolling),
            "digest" | "sha256" => Ok(CodeScheme::Digest),
            other => Err(other.to_string()),
        }
    }
}

pub fn derive_step_seed(seed: &str, step: Step) -> String {
    format!("{seed}-{}", step.label())
}

/// The default code derivation. Pure: the same seed and step always give the same code.
pub fn derive_verifier_code(seed: &str, step: Step) -> String {
    derive_code(CodeScheme::Rolling, seed, step)
}

pub fn derive_code(scheme: CodeScheme, seed: &str, step: Step) -> String {
    let step_seed = derive_step_seed(seed, step);
    let hash = match scheme {
        CodeScheme::Rolling => rolling_hash(&step_seed),
        CodeScheme::Digest => digest_hash(&step_seed),
    };

    let mut code: String = to_base36(hash)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(CODE_LEN)
        .collect();
    while code.len() < CODE_LEN {
        code.push('0');
    }
    code
}

// acc = acc * 31 + unit over UTF-16 units, wrapped to i32
fn rolling_hash(input: &str) -> u32 {
    let acc = input
        .encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(i32::from(unit)));
    acc.unsigned_abs()
}

fn digest_hash(input: &str) -> u32 {
    let digest = sha256::digest(input);
    let mut prefix = [0u8; 4];
    if hex::decode_to_slice(&digest[..8], &mut prefix).is_err() {
        return 0;
    }
    u32::from_be_bytes(prefix)
}

fn to_base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

pub fn build_qr_payload(pass: &ExchangePass, step: Step) -> ExchangeQrPayload {
    build_qr_payload_with(CodeScheme::default(), pass, step)
}

pub fn build_qr_payload_with(
    scheme: CodeScheme,
    pass: &ExchangePass,
    step: Step,
) -> ExchangeQrPayload {
    ExchangeQrPayload {
        kind: PAYLOAD_TYPE.to_string(),
        version: PAYLOAD_VERSION,
        loan_id: pass.loan_id.clone(),
        step,
        verifier_code: derive_code(scheme, &pass.code_seed, step),
        code_seed: derive_step_seed(&pass.code_seed, step),
    }
}

impl ExchangeQrPayload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Structural guard run before any semantic comparison.
pub fn is_valid_payload_shape(value: &Value) -> bool {
    let is_text = |key: &str| value.get(key).is_some_and(Value::is_string);

    value.get("type").and_then(Value::as_str) == Some(PAYLOAD_TYPE)
        && value.get("version").and_then(Value::as_u64) == Some(PAYLOAD_VERSION)
        && matches!(
            value.get("step").and_then(Value::as_str),
            Some("pickup") | Some("return")
        )
        && is_text("loanId")
        && is_text("verifierCode")
        && is_text("codeSeed")
}

pub fn parse_payload(raw: &str) -> Result<ExchangeQrPayload, ProofError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ProofError::Malformed)?;
    if !is_valid_payload_shape(&value) {
        return Err(ProofError::WrongShape);
    }
    serde_json::from_value(value).map_err(|_| ProofError::WrongShape)
}

/// Applied as the user types: uppercase, alphanumerics only, at most 4 characters.
pub fn normalize_manual_code(input: &str) -> String {
    canonical_code(input).chars().take(CODE_LEN).collect()
}

// uppercase alphanumerics, full length kept
fn canonical_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Checks a submission against the pass for `step`. Never mutates anything.
pub fn verify_submission(
    scheme: CodeScheme,
    pass: &ExchangePass,
    step: Step,
    submission: &ProofSubmission,
) -> Result<(), ProofError> {
    let expected = derive_code(scheme, &pass.code_seed, step);

    match submission {
        ProofSubmission::Scanned(raw) => {
            let payload = parse_payload(raw)?;
            if payload.loan_id != pass.loan_id {
                return Err(ProofError::Mismatch(MismatchField::LoanId));
            }
            if payload.step != step {
                return Err(ProofError::Mismatch(MismatchField::Step));
            }
            if payload.verifier_code != expected {
                return Err(ProofError::Mismatch(MismatchField::VerifierCode));
            }
        }
        ProofSubmission::Manual(code) => {
            let code = canonical_code(code);
            if code.len() < CODE_LEN {
                return Err(ProofError::IncompleteCode);
            }
            if code != expected {
                return Err(ProofError::Mismatch(MismatchField::VerifierCode));
            }
        }
    }
    Ok(())
}
