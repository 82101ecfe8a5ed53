//! Membership (household) and beneficiary (person) records.
//!
//! # Responsibility
//! - Define the membership account, its beneficiaries and registrations.
//! - Normalize and validate beneficiary identity fields.
//!
//! # Invariants
//! - `member_number` is unique across memberships.
//! - `frozen_change` is a pending toggle applied at the next cycle start.
//! - `first_shift_date` anchors per-member cycles and is set once.

use super::ValidationError;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex")
});

pub type MembershipId = Uuid;
pub type BeneficiaryId = Uuid;
pub type FormationId = Uuid;
pub type RegistrationId = Uuid;

/// Household account that owns registrations, time logs and exemptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub member_number: i64,
    pub withdrawn: bool,
    pub frozen: bool,
    /// Pending freeze/unfreeze request, applied at next cycle start.
    pub frozen_change: bool,
    /// Anchor of the member's own cycle. `None` until the first booking.
    pub first_shift_date: Option<NaiveDate>,
    pub main_beneficiary_id: Option<BeneficiaryId>,
    pub created_at: NaiveDateTime,
}

impl Membership {
    pub fn new(member_number: i64, created_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_number,
            withdrawn: false,
            frozen: false,
            frozen_change: false,
            first_shift_date: None,
            main_beneficiary_id: None,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.member_number <= 0 {
            return Err(ValidationError::OutOfRange {
                field: "member_number",
                value: self.member_number,
            });
        }
        Ok(())
    }

    /// Whether the member is frozen after the pending change is applied.
    pub fn frozen_after_change(&self) -> bool {
        self.frozen != self.frozen_change
    }
}

/// One person attached to a membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: BeneficiaryId,
    pub membership_id: MembershipId,
    pub first_name: String,
    pub last_name: String,
    /// Stored lowercase.
    pub email: String,
    pub phone: Option<String>,
    pub formations: BTreeSet<FormationId>,
}

impl Beneficiary {
    pub fn new(membership_id: MembershipId, draft: BeneficiaryDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            membership_id,
            first_name: draft.first_name.trim().to_string(),
            last_name: draft.last_name.trim().to_string(),
            email: normalize_email(&draft.email),
            phone: draft
                .phone
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            formations: BTreeSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::BlankField("first_name"));
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::BlankField("last_name"));
        }
        if !EMAIL_RE.is_match(&self.email) {
            return Err(ValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_formation(&self, formation_id: FormationId) -> bool {
        self.formations.contains(&formation_id)
    }
}

/// Caller-provided identity fields for a new beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeneficiaryDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Qualification required by some shifts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
    pub id: FormationId,
    pub name: String,
}

impl Formation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Cheque,
    Card,
    Transfer,
    #[serde(rename = "helloasso")]
    HelloAsso,
}

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Cheque => "cheque",
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::HelloAsso => "helloasso",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(Self::Cash),
            "cheque" => Some(Self::Cheque),
            "card" => Some(Self::Card),
            "transfer" => Some(Self::Transfer),
            "helloasso" => Some(Self::HelloAsso),
            _ => None,
        }
    }
}

/// Membership renewal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub membership_id: MembershipId,
    pub date: NaiveDate,
    pub amount_cents: i64,
    pub mode: PaymentMode,
    pub created_at: NaiveDateTime,
}

impl Registration {
    pub fn new(
        membership_id: MembershipId,
        date: NaiveDate,
        amount_cents: i64,
        mode: PaymentMode,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            membership_id,
            date,
            amount_cents,
            mode,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount_cents < 0 {
            return Err(ValidationError::NegativeAmount(self.amount_cents));
        }
        Ok(())
    }
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}
