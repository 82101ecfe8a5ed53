//! General-assembly events and vote proxies.
//!
//! # Responsibility
//! - Create events.
//! - Record vote delegations, pairing givers with volunteers to carry.
//!
//! # Invariants
//! - A membership gives at most one proxy per event and cannot give one
//!   while one of its beneficiaries carries a vote.
//! - A beneficiary carries at most `proxy.max_per_beneficiary` votes per
//!   event, pending offers included.
//! - Pending entries are paired oldest first.

use super::membership_service::is_uptodate_on;
use crate::config::{ProxyConfig, RegistrationConfig};
use crate::model::event::{Event, EventId, Proxy, ProxyId};
use crate::model::membership::{Beneficiary, BeneficiaryId, MembershipId};
use crate::model::ValidationError;
use crate::repo::event_repo::EventRepository;
use crate::repo::member_repo::MemberRepository;
use crate::repo::RepoError;
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ProxyError {
    EventNotFound(EventId),
    EventPast(EventId),
    MembershipNotFound(MembershipId),
    BeneficiaryNotFound(BeneficiaryId),
    ProxyNotFound(ProxyId),
    Withdrawn(MembershipId),
    /// Registration expires before the event.
    NotUpToDate(MembershipId),
    /// No registration on or after the event's minimum date.
    RegisteredTooLate {
        membership_id: MembershipId,
        min_registration_date: NaiveDate,
    },
    AlreadyGiven(MembershipId),
    /// One of the giver's beneficiaries carries a vote for this event.
    GiverIsCarrier(MembershipId),
    SameMembership(BeneficiaryId),
    OwnerHasGiven(BeneficiaryId),
    OwnerFull {
        beneficiary_id: BeneficiaryId,
        max: u32,
    },
    Validation(ValidationError),
    Repo(RepoError),
}

impl Display for ProxyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventNotFound(id) => write!(f, "event not found: {id}"),
            Self::EventPast(id) => write!(f, "event {id} is over"),
            Self::MembershipNotFound(id) => write!(f, "membership not found: {id}"),
            Self::BeneficiaryNotFound(id) => write!(f, "beneficiary not found: {id}"),
            Self::ProxyNotFound(id) => write!(f, "proxy not found: {id}"),
            Self::Withdrawn(id) => write!(f, "membership {id} is withdrawn"),
            Self::NotUpToDate(id) => {
                write!(f, "membership {id} is not up to date at the event date")
            }
            Self::RegisteredTooLate {
                membership_id,
                min_registration_date,
            } => write!(
                f,
                "membership {membership_id} has no registration since {min_registration_date}"
            ),
            Self::AlreadyGiven(id) => write!(f, "membership {id} already gave a proxy"),
            Self::GiverIsCarrier(id) => {
                write!(f, "membership {id} already carries a proxy for this event")
            }
            Self::SameMembership(id) => {
                write!(f, "beneficiary {id} belongs to the giving membership")
            }
            Self::OwnerHasGiven(id) => {
                write!(f, "membership of beneficiary {id} already gave its proxy")
            }
            Self::OwnerFull {
                beneficiary_id,
                max,
            } => write!(f, "beneficiary {beneficiary_id} already carries {max} proxies"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProxyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ProxyError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                record: "proxy",
                id,
            } => Self::ProxyNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

pub struct ProxyService<E, M> {
    events: E,
    members: M,
    registration: RegistrationConfig,
    config: ProxyConfig,
}

impl<E, M> ProxyService<E, M>
where
    E: EventRepository,
    M: MemberRepository,
{
    pub fn new(
        events: E,
        members: M,
        registration: RegistrationConfig,
        config: ProxyConfig,
    ) -> Self {
        Self {
            events,
            members,
            registration,
            config,
        }
    }

    pub fn create_event(
        &self,
        title: impl Into<String>,
        date: NaiveDateTime,
        min_registration_date: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> Result<Event, ProxyError> {
        let mut event = Event::new(title, date, now);
        event.min_registration_date = min_registration_date;
        self.events.create_event(&event)?;
        Ok(event)
    }

    pub fn list_events(&self) -> Result<Vec<Event>, ProxyError> {
        Ok(self.events.list_events()?)
    }

    pub fn list_proxies(&self, event_id: EventId) -> Result<Vec<Proxy>, ProxyError> {
        self.open_event(event_id, None)?;
        Ok(self.events.list_proxies(event_id)?)
    }

    pub fn remove_proxy(&self, proxy_id: ProxyId) -> Result<(), ProxyError> {
        self.events.delete_proxy(proxy_id)?;
        Ok(())
    }

    /// Delegates `giver`'s vote, to `owner` or to the oldest volunteer.
    ///
    /// Without a volunteer the proxy stays pending until someone offers
    /// to carry it.
    pub fn give_proxy(
        &self,
        event_id: EventId,
        giver_id: MembershipId,
        owner_id: Option<BeneficiaryId>,
        now: NaiveDateTime,
    ) -> Result<Proxy, ProxyError> {
        let event = self.open_event(event_id, Some(now))?;
        self.ensure_can_vote(&event, giver_id)?;

        let proxies = self.events.list_proxies(event_id)?;
        if proxies.iter().any(|proxy| proxy.giver_id == Some(giver_id)) {
            return Err(ProxyError::AlreadyGiven(giver_id));
        }
        let giver_beneficiaries = self.members.list_beneficiaries(giver_id)?;
        let carries = proxies.iter().any(|proxy| {
            proxy.owner_id.is_some_and(|owner| {
                giver_beneficiaries
                    .iter()
                    .any(|beneficiary| beneficiary.id == owner)
            })
        });
        if carries {
            return Err(ProxyError::GiverIsCarrier(giver_id));
        }

        let proxy = match owner_id {
            Some(owner_id) => {
                let owner = self.beneficiary(owner_id)?;
                if owner.membership_id == giver_id {
                    return Err(ProxyError::SameMembership(owner_id));
                }
                self.ensure_can_vote(&event, owner.membership_id)?;
                self.ensure_can_carry(&owner, &proxies)?;
                let proxy = Proxy::new(event_id, Some(giver_id), Some(owner_id), now);
                self.events.create_proxy(&proxy)?;
                proxy
            }
            None => {
                let volunteer = proxies.into_iter().find(|proxy| {
                    proxy.giver_id.is_none()
                        && proxy.owner_id.is_some_and(|owner| {
                            !giver_beneficiaries
                                .iter()
                                .any(|beneficiary| beneficiary.id == owner)
                        })
                });
                match volunteer {
                    Some(mut proxy) => {
                        proxy.giver_id = Some(giver_id);
                        self.events.update_proxy(&proxy)?;
                        proxy
                    }
                    None => {
                        let proxy = Proxy::new(event_id, Some(giver_id), None, now);
                        self.events.create_proxy(&proxy)?;
                        proxy
                    }
                }
            }
        };

        info!(
            "event=proxy_give module=proxy status=ok event_id={} pending={}",
            event_id,
            proxy.is_pending()
        );
        Ok(proxy)
    }

    /// Offers `beneficiary` as a carrier for the event.
    pub fn offer_to_carry(
        &self,
        event_id: EventId,
        beneficiary_id: BeneficiaryId,
        now: NaiveDateTime,
    ) -> Result<Proxy, ProxyError> {
        let event = self.open_event(event_id, Some(now))?;
        let owner = self.beneficiary(beneficiary_id)?;
        self.ensure_can_vote(&event, owner.membership_id)?;

        let proxies = self.events.list_proxies(event_id)?;
        self.ensure_can_carry(&owner, &proxies)?;

        let pending_giver = proxies.into_iter().find(|proxy| {
            proxy.owner_id.is_none()
                && proxy
                    .giver_id
                    .is_some_and(|giver| giver != owner.membership_id)
        });
        let proxy = match pending_giver {
            Some(mut proxy) => {
                proxy.owner_id = Some(beneficiary_id);
                self.events.update_proxy(&proxy)?;
                proxy
            }
            None => {
                let proxy = Proxy::new(event_id, None, Some(beneficiary_id), now);
                self.events.create_proxy(&proxy)?;
                proxy
            }
        };

        info!(
            "event=proxy_offer module=proxy status=ok event_id={} pending={}",
            event_id,
            proxy.is_pending()
        );
        Ok(proxy)
    }

    fn open_event(
        &self,
        event_id: EventId,
        now: Option<NaiveDateTime>,
    ) -> Result<Event, ProxyError> {
        let event = self
            .events
            .get_event(event_id)?
            .ok_or(ProxyError::EventNotFound(event_id))?;
        if now.is_some_and(|now| event.is_past(now)) {
            return Err(ProxyError::EventPast(event_id));
        }
        Ok(event)
    }

    fn ensure_can_vote(
        &self,
        event: &Event,
        membership_id: MembershipId,
    ) -> Result<(), ProxyError> {
        let membership = self
            .members
            .get_membership(membership_id)?
            .ok_or(ProxyError::MembershipNotFound(membership_id))?;
        if membership.withdrawn {
            return Err(ProxyError::Withdrawn(membership_id));
        }

        let registrations = self.members.list_registrations(membership_id)?;
        if !is_uptodate_on(&self.registration, registrations.last(), event.date.date()) {
            return Err(ProxyError::NotUpToDate(membership_id));
        }
        if let Some(min_registration_date) = event.min_registration_date {
            if !registrations
                .iter()
                .any(|registration| registration.date >= min_registration_date)
            {
                return Err(ProxyError::RegisteredTooLate {
                    membership_id,
                    min_registration_date,
                });
            }
        }
        Ok(())
    }

    fn ensure_can_carry(&self, owner: &Beneficiary, proxies: &[Proxy]) -> Result<(), ProxyError> {
        if proxies
            .iter()
            .any(|proxy| proxy.giver_id == Some(owner.membership_id))
        {
            return Err(ProxyError::OwnerHasGiven(owner.id));
        }
        let carried = proxies
            .iter()
            .filter(|proxy| proxy.owner_id == Some(owner.id))
            .count();
        let max = self.config.max_per_beneficiary;
        if carried >= max as usize {
            return Err(ProxyError::OwnerFull {
                beneficiary_id: owner.id,
                max,
            });
        }
        Ok(())
    }

    fn beneficiary(&self, id: BeneficiaryId) -> Result<Beneficiary, ProxyError> {
        self.members
            .get_beneficiary(id)?
            .ok_or(ProxyError::BeneficiaryNotFound(id))
    }
}
