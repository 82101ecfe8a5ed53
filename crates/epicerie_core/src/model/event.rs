//! General-assembly events and vote proxies.
//!
//! # Invariants
//! - A proxy always has at least one side (giver or owner).
//! - A proxy with exactly one side is pending and waits to be paired.

use super::membership::{BeneficiaryId, MembershipId};
use super::ValidationError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;
pub type ProxyId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub date: NaiveDateTime,
    /// Members must hold a registration dated on or after this day to vote.
    pub min_registration_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

impl Event {
    pub fn new(title: impl Into<String>, date: NaiveDateTime, created_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into().trim().to_string(),
            date,
            min_registration_date: None,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.is_empty() {
            return Err(ValidationError::BlankField("event.title"));
        }
        Ok(())
    }

    pub fn is_past(&self, now: NaiveDateTime) -> bool {
        self.date <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: ProxyId,
    pub event_id: EventId,
    /// Membership delegating its vote.
    pub giver_id: Option<MembershipId>,
    /// Beneficiary carrying the vote.
    pub owner_id: Option<BeneficiaryId>,
    pub created_at: NaiveDateTime,
}

impl Proxy {
    pub fn new(
        event_id: EventId,
        giver_id: Option<MembershipId>,
        owner_id: Option<BeneficiaryId>,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            giver_id,
            owner_id,
            created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.giver_id.is_none() || self.owner_id.is_none()
    }
}
