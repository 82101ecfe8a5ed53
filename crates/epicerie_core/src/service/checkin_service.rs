//! Swipe-card issuing and door check-in.
//!
//! # Responsibility
//! - Issue, disable and re-enable swipe cards.
//! - Record door swipes and report the shifter's in-progress shifts.
//!
//! # Invariants
//! - A beneficiary has at most one enabled card.
//! - Every accepted swipe is logged, with or without shifts in progress.

use super::shift_service::{ShiftService, ShiftServiceError};
use crate::config::CheckinConfig;
use crate::model::membership::{Beneficiary, BeneficiaryId};
use crate::model::shift::Shift;
use crate::model::swipe_card::{SwipeCard, SwipeCardId, SwipeCardLog};
use crate::model::ValidationError;
use crate::repo::card_repo::CardRepository;
use crate::repo::ledger_repo::LedgerRepository;
use crate::repo::member_repo::MemberRepository;
use crate::repo::shift_repo::ShiftRepository;
use crate::repo::RepoError;
use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum CheckinError {
    BeneficiaryNotFound(BeneficiaryId),
    CardNotFound(SwipeCardId),
    UnknownCode(String),
    CardDisabled(SwipeCardId),
    DuplicateCode(String),
    /// The beneficiary already has another enabled card.
    AnotherCardEnabled(SwipeCardId),
    Shift(ShiftServiceError),
    Validation(ValidationError),
    Repo(RepoError),
}

impl Display for CheckinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeneficiaryNotFound(id) => write!(f, "beneficiary not found: {id}"),
            Self::CardNotFound(id) => write!(f, "swipe card not found: {id}"),
            Self::UnknownCode(code) => write!(f, "no card with code `{code}`"),
            Self::CardDisabled(id) => write!(f, "swipe card {id} is disabled"),
            Self::DuplicateCode(code) => write!(f, "card code `{code}` is already issued"),
            Self::AnotherCardEnabled(id) => write!(f, "swipe card {id} is still enabled"),
            Self::Shift(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CheckinError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Shift(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CheckinError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for CheckinError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ShiftServiceError> for CheckinError {
    fn from(value: ShiftServiceError) -> Self {
        Self::Shift(value)
    }
}

/// Result of an accepted door swipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    pub beneficiary: Beneficiary,
    pub swipe: SwipeCardLog,
    /// Shifts of the beneficiary in progress at swipe time.
    pub shifts: Vec<Shift>,
    /// Shifts newly validated by this swipe.
    pub validated: usize,
}

pub struct CheckinService<C, S, M, L> {
    cards: C,
    members: M,
    shift_repo: S,
    shift_service: ShiftService<S, M, L>,
    config: CheckinConfig,
}

impl<C, S, M, L> CheckinService<C, S, M, L>
where
    C: CardRepository,
    S: ShiftRepository,
    M: MemberRepository,
    L: LedgerRepository,
{
    /// `members` and `shift_repo` serve lookups; `shift_service` applies
    /// validations under its own rules.
    pub fn new(
        cards: C,
        members: M,
        shift_repo: S,
        shift_service: ShiftService<S, M, L>,
        config: CheckinConfig,
    ) -> Self {
        Self {
            cards,
            members,
            shift_repo,
            shift_service,
            config,
        }
    }

    /// Issues a new enabled card, disabling the beneficiary's previous one.
    pub fn issue_card(
        &self,
        beneficiary_id: BeneficiaryId,
        code: &str,
        now: NaiveDateTime,
    ) -> Result<SwipeCard, CheckinError> {
        if self.members.get_beneficiary(beneficiary_id)?.is_none() {
            return Err(CheckinError::BeneficiaryNotFound(beneficiary_id));
        }
        let card = SwipeCard::new(beneficiary_id, code, now);
        card.validate()?;
        self.cards.issue_card(&card).map_err(|err| match err {
            RepoError::Duplicate(_) => CheckinError::DuplicateCode(card.code.clone()),
            other => other.into(),
        })?;
        info!(
            "event=card_issue module=checkin status=ok beneficiary_id={}",
            beneficiary_id
        );
        Ok(card)
    }

    pub fn list_cards(
        &self,
        beneficiary_id: BeneficiaryId,
    ) -> Result<Vec<SwipeCard>, CheckinError> {
        Ok(self.cards.list_cards(beneficiary_id)?)
    }

    pub fn disable_card(
        &self,
        card_id: SwipeCardId,
        now: NaiveDateTime,
    ) -> Result<SwipeCard, CheckinError> {
        let mut card = self.card(card_id)?;
        card.disable(now);
        self.cards.update_card(&card)?;
        Ok(card)
    }

    pub fn enable_card(&self, card_id: SwipeCardId) -> Result<SwipeCard, CheckinError> {
        let mut card = self.card(card_id)?;
        if card.enabled {
            return Ok(card);
        }
        if let Some(other) = self
            .cards
            .list_cards(card.beneficiary_id)?
            .into_iter()
            .find(|other| other.enabled && other.id != card_id)
        {
            return Err(CheckinError::AnotherCardEnabled(other.id));
        }
        card.enable();
        self.cards.update_card(&card)?;
        Ok(card)
    }

    /// Accepts a swipe of `code` and reports the shifts in progress.
    ///
    /// A shift is in progress from `checkin.tolerance_minutes` before its
    /// start until its end.
    pub fn check_in(&self, code: &str, now: NaiveDateTime) -> Result<CheckIn, CheckinError> {
        let card = self
            .cards
            .get_card_by_code(code)?
            .ok_or_else(|| CheckinError::UnknownCode(code.trim().to_string()))?;
        if !card.enabled {
            warn!(
                "event=checkin module=checkin status=refused reason=card_disabled card_id={}",
                card.id
            );
            return Err(CheckinError::CardDisabled(card.id));
        }
        let beneficiary = self
            .members
            .get_beneficiary(card.beneficiary_id)?
            .ok_or(CheckinError::BeneficiaryNotFound(card.beneficiary_id))?;

        let swipe = SwipeCardLog::new(card.id, now);
        self.cards.log_swipe(&swipe)?;

        let tolerance = Duration::minutes(self.config.tolerance_minutes);
        let shifts: Vec<Shift> = self
            .shift_repo
            .list_shifts_of(&[beneficiary.id], None, Some(now + tolerance))?
            .into_iter()
            .filter(|shift| shift.start - tolerance <= now && now < shift.end)
            .collect();

        let mut validated = 0;
        if self.config.validate_shifts {
            for shift in &shifts {
                // Early swipes wait for the shift start.
                if shift.has_started(now) && self.shift_service.validate(shift.id, now)? {
                    validated += 1;
                }
            }
        }

        info!(
            "event=checkin module=checkin status=ok beneficiary_id={} in_progress={} validated={}",
            beneficiary.id,
            shifts.len(),
            validated
        );
        Ok(CheckIn {
            beneficiary,
            swipe,
            shifts,
            validated,
        })
    }

    fn card(&self, card_id: SwipeCardId) -> Result<SwipeCard, CheckinError> {
        self.cards
            .get_card(card_id)?
            .ok_or(CheckinError::CardNotFound(card_id))
    }
}
