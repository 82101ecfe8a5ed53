//! Swipe cards used for door check-in.
//!
//! # Invariants
//! - `code` is a 13-digit EAN-13 with a valid check digit.
//! - A beneficiary has at most one enabled card (enforced by the
//!   check-in service).

use super::membership::BeneficiaryId;
use super::ValidationError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SwipeCardId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeCard {
    pub id: SwipeCardId,
    pub beneficiary_id: BeneficiaryId,
    pub code: String,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
    pub disabled_at: Option<NaiveDateTime>,
}

impl SwipeCard {
    pub fn new(
        beneficiary_id: BeneficiaryId,
        code: impl Into<String>,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            beneficiary_id,
            code: code.into().trim().to_string(),
            enabled: true,
            created_at,
            disabled_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_ean13(&self.code) {
            return Err(ValidationError::InvalidCardCode(self.code.clone()));
        }
        Ok(())
    }

    pub fn disable(&mut self, at: NaiveDateTime) {
        if self.enabled {
            self.enabled = false;
            self.disabled_at = Some(at);
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.disabled_at = None;
    }
}

/// One door swipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeCardLog {
    pub id: Uuid,
    pub card_id: SwipeCardId,
    pub swiped_at: NaiveDateTime,
}

impl SwipeCardLog {
    pub fn new(card_id: SwipeCardId, swiped_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id,
            swiped_at,
        }
    }
}

/// Check digit for the first 12 digits of an EAN-13 code.
///
/// Returns `None` unless `digits` is exactly 12 ASCII digits.
pub fn ean13_check_digit(digits: &str) -> Option<u8> {
    if digits.len() != 12 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let weighted: u32 = digits
        .bytes()
        .enumerate()
        .map(|(index, byte)| {
            let digit = u32::from(byte - b'0');
            if index % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    Some(((10 - weighted % 10) % 10) as u8)
}

pub fn is_valid_ean13(code: &str) -> bool {
    if code.len() != 13 || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return false;
    }
    let (body, check) = code.split_at(12);
    match (ean13_check_digit(body), check.parse::<u8>()) {
        (Some(expected), Ok(actual)) => expected == actual,
        _ => false,
    }
}

/// Builds a valid code from a card sequence number.
///
/// Returns `None` when `number` does not fit in 12 digits.
pub fn ean13_from_number(number: u64) -> Option<String> {
    if number > 999_999_999_999 {
        return None;
    }
    let body = format!("{number:012}");
    let check = ean13_check_digit(&body)?;
    Some(format!("{body}{check}"))
}

#[cfg(test)]
mod tests {
    use super::{ean13_check_digit, ean13_from_number, is_valid_ean13};

    #[test]
    fn check_digit_matches_known_code() {
        assert_eq!(ean13_check_digit("400638133393"), Some(1));
        assert!(is_valid_ean13("4006381333931"));
        assert!(!is_valid_ean13("4006381333932"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(ean13_check_digit("12345"), None);
        assert_eq!(ean13_check_digit("40063813339a"), None);
        assert!(!is_valid_ean13("400638133393"));
        assert!(!is_valid_ean13("40063813339311"));
    }

    #[test]
    fn from_number_pads_and_appends_check_digit() {
        let code = ean13_from_number(42).unwrap();
        assert_eq!(code.len(), 13);
        assert!(code.starts_with("000000000042"));
        assert!(is_valid_ean13(&code));
        assert_eq!(ean13_from_number(1_000_000_000_000), None);
    }
}
