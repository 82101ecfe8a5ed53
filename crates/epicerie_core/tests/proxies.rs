use chrono::{NaiveDate, NaiveDateTime};
use epicerie_core::config::{ProxyConfig, RegistrationConfig};
use epicerie_core::model::event::Event;
use epicerie_core::model::membership::{Beneficiary, Membership};
use epicerie_core::repo::event_repo::SqliteEventRepository;
use epicerie_core::repo::ledger_repo::SqliteLedgerRepository;
use epicerie_core::repo::member_repo::SqliteMemberRepository;
use epicerie_core::repo::shift_repo::SqliteShiftRepository;
use epicerie_core::service::proxy_service::{ProxyError, ProxyService};
use epicerie_core::{open_db_in_memory, BeneficiaryDraft, CoopConfig, MembershipService, PaymentMode};
use rusqlite::Connection;

type Proxies<'conn> = ProxyService<SqliteEventRepository<'conn>, SqliteMemberRepository<'conn>>;
type Members<'conn> = MembershipService<
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
    SqliteShiftRepository<'conn>,
>;

#[test]
fn pending_proxy_is_paired_with_the_next_volunteer() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, _) = registered(&members, 1, "ada");
    let (_, grace) = registered(&members, 3, "grace");
    let proxies = proxies(&conn);
    let event = assembly(&proxies, None);

    let given = proxies.give_proxy(event.id, ada.id, None, at(1, 10)).unwrap();
    assert!(given.is_pending());
    assert_eq!(given.owner_id, None);

    let carried = proxies.offer_to_carry(event.id, grace.id, at(2, 10)).unwrap();
    assert_eq!(carried.id, given.id);
    assert_eq!(carried.giver_id, Some(ada.id));
    assert_eq!(carried.owner_id, Some(grace.id));
    assert!(!carried.is_pending());
    assert_eq!(proxies.list_proxies(event.id).unwrap(), vec![carried]);
}

#[test]
fn volunteers_waiting_first_receive_the_next_proxy() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, _) = registered(&members, 1, "ada");
    let (_, alan) = registered(&members, 2, "alan");
    let (_, grace) = registered(&members, 3, "grace");
    let proxies = proxies(&conn);
    let event = assembly(&proxies, None);

    let first = proxies.offer_to_carry(event.id, alan.id, at(1, 10)).unwrap();
    proxies.offer_to_carry(event.id, grace.id, at(2, 10)).unwrap();
    assert!(first.is_pending());

    let paired = proxies.give_proxy(event.id, ada.id, None, at(3, 10)).unwrap();
    assert_eq!(paired.id, first.id);
    assert_eq!(paired.owner_id, Some(alan.id));

    let listed = proxies.list_proxies(event.id).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.iter().filter(|proxy| proxy.is_pending()).count(), 1);
}

#[test]
fn carriers_are_limited_and_cannot_give_their_own_vote() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, ada_main) = registered(&members, 1, "ada");
    let (alan, alan_main) = registered(&members, 2, "alan");
    let (grace, grace_main) = registered(&members, 3, "grace");
    let proxies = proxies(&conn);
    let event = assembly(&proxies, None);

    let err = proxies
        .give_proxy(event.id, ada.id, Some(ada_main.id), at(1, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::SameMembership(id) if id == ada_main.id));

    let direct = proxies
        .give_proxy(event.id, ada.id, Some(alan_main.id), at(1, 10))
        .unwrap();
    assert!(!direct.is_pending());

    let err = proxies
        .give_proxy(event.id, ada.id, Some(grace_main.id), at(1, 11))
        .unwrap_err();
    assert!(matches!(err, ProxyError::AlreadyGiven(id) if id == ada.id));

    let err = proxies
        .give_proxy(event.id, grace.id, Some(alan_main.id), at(1, 12))
        .unwrap_err();
    match err {
        ProxyError::OwnerFull {
            beneficiary_id,
            max,
        } => {
            assert_eq!(beneficiary_id, alan_main.id);
            assert_eq!(max, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = proxies.give_proxy(event.id, alan.id, None, at(1, 13)).unwrap_err();
    assert!(matches!(err, ProxyError::GiverIsCarrier(id) if id == alan.id));

    proxies.give_proxy(event.id, grace.id, None, at(1, 14)).unwrap();
    let err = proxies
        .offer_to_carry(event.id, grace_main.id, at(1, 15))
        .unwrap_err();
    assert!(matches!(err, ProxyError::OwnerHasGiven(id) if id == grace_main.id));
}

#[test]
fn only_up_to_date_members_take_part() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, _) = registered(&members, 1, "ada");
    let (unregistered, _) = members
        .create_membership(4, draft("late"), at(1, 9))
        .unwrap();
    let (withdrawn, _) = registered(&members, 5, "gone");
    members.withdraw(withdrawn.id).unwrap();
    let proxies = proxies(&conn);

    let event = assembly(&proxies, None);
    let err = proxies
        .give_proxy(event.id, unregistered.id, None, at(1, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::NotUpToDate(_)));
    let err = proxies
        .give_proxy(event.id, withdrawn.id, None, at(1, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Withdrawn(_)));

    let strict = assembly(&proxies, NaiveDate::from_ymd_opt(2026, 2, 1));
    let err = proxies
        .give_proxy(strict.id, ada.id, None, at(1, 10))
        .unwrap_err();
    match err {
        ProxyError::RegisteredTooLate {
            membership_id,
            min_registration_date,
        } => {
            assert_eq!(membership_id, ada.id);
            assert_eq!(min_registration_date, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = proxies
        .give_proxy(event.id, ada.id, None, at(21, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::EventPast(_)));
}

#[test]
fn named_carriers_must_be_up_to_date() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, ada_main) = registered(&members, 1, "ada");
    let (unregistered, unregistered_main) = members
        .create_membership(4, draft("late"), at(1, 9))
        .unwrap();
    let (withdrawn, withdrawn_main) = registered(&members, 5, "gone");
    members.withdraw(withdrawn.id).unwrap();
    let proxies = proxies(&conn);
    let event = assembly(&proxies, None);

    let err = proxies
        .give_proxy(event.id, ada.id, Some(unregistered_main.id), at(1, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::NotUpToDate(id) if id == unregistered.id));
    let err = proxies
        .give_proxy(event.id, ada.id, Some(withdrawn_main.id), at(1, 10))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Withdrawn(id) if id == withdrawn.id));

    let strict = assembly(&proxies, NaiveDate::from_ymd_opt(2026, 2, 1));
    let (bob, _) = members
        .create_membership(6, draft("bob"), at(1, 9))
        .unwrap();
    members
        .record_registration(
            bob.id,
            NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
            1000,
            PaymentMode::Cash,
            at(1, 9),
        )
        .unwrap();
    let err = proxies
        .give_proxy(strict.id, bob.id, Some(ada_main.id), at(1, 10))
        .unwrap_err();
    assert!(matches!(
        err,
        ProxyError::RegisteredTooLate { membership_id, .. } if membership_id == ada.id
    ));

    assert!(proxies.list_proxies(event.id).unwrap().is_empty());
    assert!(proxies.list_proxies(strict.id).unwrap().is_empty());
}

#[test]
fn removed_proxies_free_the_giver() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (ada, _) = registered(&members, 1, "ada");
    let proxies = proxies(&conn);
    let event = assembly(&proxies, None);

    let given = proxies.give_proxy(event.id, ada.id, None, at(1, 10)).unwrap();
    proxies.remove_proxy(given.id).unwrap();
    assert!(proxies.list_proxies(event.id).unwrap().is_empty());
    let err = proxies.remove_proxy(given.id).unwrap_err();
    assert!(matches!(err, ProxyError::ProxyNotFound(id) if id == given.id));

    proxies.give_proxy(event.id, ada.id, None, at(1, 11)).unwrap();
}

/// General assembly on 2026-06-20 at 18:00.
fn assembly(proxies: &Proxies<'_>, min_registration_date: Option<NaiveDate>) -> Event {
    proxies
        .create_event("Assemblée générale", at(20, 18), min_registration_date, at(1, 9))
        .unwrap()
}

fn proxies(conn: &Connection) -> Proxies<'_> {
    ProxyService::new(
        SqliteEventRepository::try_new(conn).unwrap(),
        SqliteMemberRepository::try_new(conn).unwrap(),
        RegistrationConfig::default(),
        ProxyConfig::default(),
    )
}

fn members(conn: &Connection) -> Members<'_> {
    MembershipService::new(
        SqliteMemberRepository::try_new(conn).unwrap(),
        SqliteLedgerRepository::try_new(conn).unwrap(),
        SqliteShiftRepository::try_new(conn).unwrap(),
        CoopConfig::default(),
    )
}

fn registered(members: &Members<'_>, number: i64, name: &str) -> (Membership, Beneficiary) {
    let (membership, main) = members
        .create_membership(number, draft(name), at(1, 9))
        .unwrap();
    members
        .record_registration(
            membership.id,
            NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            1000,
            PaymentMode::HelloAsso,
            at(1, 9),
        )
        .unwrap();
    (membership, main)
}

fn draft(name: &str) -> BeneficiaryDraft {
    BeneficiaryDraft {
        first_name: name.to_string(),
        last_name: "Tester".to_string(),
        email: format!("{name}@example.org"),
        phone: None,
    }
}

/// Day of June 2026 at `hour`.
fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 6, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}
