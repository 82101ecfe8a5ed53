use chrono::{NaiveDate, NaiveDateTime};
use epicerie_core::repo::ledger_repo::SqliteLedgerRepository;
use epicerie_core::repo::member_repo::SqliteMemberRepository;
use epicerie_core::repo::shift_repo::SqliteShiftRepository;
use epicerie_core::service::membership_service::MemberServiceError;
use epicerie_core::{
    open_db_in_memory, BeneficiaryDraft, CoopConfig, MembershipService, PaymentMode,
    TimeLogKind, ValidationError,
};
use rusqlite::Connection;
use std::collections::BTreeSet;

type Service<'conn> = MembershipService<
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
    SqliteShiftRepository<'conn>,
>;

#[test]
fn create_membership_stores_main_beneficiary() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let (membership, main) = service
        .create_membership(12, draft("Ada", "Lovelace", " Ada@Example.org "), at(2026, 1, 5))
        .unwrap();

    assert_eq!(membership.main_beneficiary_id, Some(main.id));
    assert_eq!(main.email, "ada@example.org");
    assert!(membership.first_shift_date.is_none());

    let loaded = service.find_by_number(12).unwrap().unwrap();
    assert_eq!(loaded, membership);
    let beneficiaries = service.list_beneficiaries(membership.id).unwrap();
    assert_eq!(beneficiaries, vec![main]);
}

#[test]
fn member_numbers_and_emails_are_unique() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let now = at(2026, 1, 5);
    service
        .create_membership(1, draft("Ada", "Lovelace", "ada@example.org"), now)
        .unwrap();

    let err = service
        .create_membership(1, draft("Alan", "Turing", "alan@example.org"), now)
        .unwrap_err();
    assert!(matches!(err, MemberServiceError::DuplicateMemberNumber(1)));

    let err = service
        .create_membership(2, draft("Other", "Ada", "ADA@example.org"), now)
        .unwrap_err();
    match err {
        MemberServiceError::DuplicateEmail(email) => assert_eq!(email, "ada@example.org"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(service.find_by_number(2).unwrap().is_none());
}

#[test]
fn invalid_identity_is_rejected_before_storage() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let err = service
        .create_membership(3, draft("  ", "Hopper", "grace@example.org"), at(2026, 1, 5))
        .unwrap_err();
    assert!(matches!(
        err,
        MemberServiceError::Validation(ValidationError::BlankField("first_name"))
    ));

    let err = service
        .create_membership(3, draft("Grace", "Hopper", "not-an-email"), at(2026, 1, 5))
        .unwrap_err();
    assert!(matches!(
        err,
        MemberServiceError::Validation(ValidationError::InvalidEmail(_))
    ));
    assert!(service.find_by_number(3).unwrap().is_none());
}

#[test]
fn withdrawn_membership_accepts_no_new_beneficiary() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let (membership, _) = service
        .create_membership(4, draft("Ada", "Lovelace", "ada@example.org"), at(2026, 1, 5))
        .unwrap();

    let partner = service
        .add_beneficiary(membership.id, draft("Charles", "Babbage", "charles@example.org"))
        .unwrap();
    assert_eq!(service.list_beneficiaries(membership.id).unwrap().len(), 2);

    service.withdraw(membership.id).unwrap();
    let err = service
        .add_beneficiary(membership.id, draft("Late", "Comer", "late@example.org"))
        .unwrap_err();
    assert!(matches!(err, MemberServiceError::Withdrawn(id) if id == membership.id));

    let membership = service.reactivate(membership.id).unwrap();
    assert!(!membership.withdrawn);
    let err = service.reactivate(membership.id).unwrap_err();
    assert!(matches!(err, MemberServiceError::NotWithdrawn(_)));

    let renamed = service
        .update_beneficiary(partner.id, draft("Charles", "Babbage", "cb@example.org"))
        .unwrap();
    assert_eq!(renamed.id, partner.id);
    assert_eq!(service.get_beneficiary(partner.id).unwrap().email, "cb@example.org");
}

#[test]
fn formations_replace_the_whole_set() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let (_, main) = service
        .create_membership(5, draft("Ada", "Lovelace", "ada@example.org"), at(2026, 1, 5))
        .unwrap();

    let cashier = service.create_formation("Caisse").unwrap();
    let reception = service.create_formation("Accueil").unwrap();
    let err = service.create_formation("caisse").unwrap_err();
    assert!(matches!(err, MemberServiceError::DuplicateFormation(_)));

    let updated = service
        .set_formations(main.id, BTreeSet::from([cashier.id, reception.id]))
        .unwrap();
    assert!(updated.has_formation(cashier.id));
    assert!(updated.has_formation(reception.id));

    let updated = service
        .set_formations(main.id, BTreeSet::from([reception.id]))
        .unwrap();
    assert!(!updated.has_formation(cashier.id));
    assert_eq!(updated.formations.len(), 1);
    assert_eq!(service.list_formations().unwrap().len(), 2);
}

#[test]
fn registration_renewal_opens_thirty_days_before_expiry() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let (membership, _) = service
        .create_membership(6, draft("Ada", "Lovelace", "ada@example.org"), at(2026, 1, 5))
        .unwrap();

    assert!(!service.is_uptodate(membership.id, day(2026, 1, 5)).unwrap());
    assert!(service.can_register(membership.id, day(2026, 1, 5)).unwrap());

    service
        .record_registration(
            membership.id,
            day(2026, 1, 10),
            1000,
            PaymentMode::Cash,
            at(2026, 1, 10),
        )
        .unwrap();
    assert_eq!(
        service.expire_date(membership.id).unwrap(),
        Some(day(2027, 1, 10))
    );
    assert!(service.is_uptodate(membership.id, day(2027, 1, 9)).unwrap());
    assert!(!service.is_uptodate(membership.id, day(2027, 1, 10)).unwrap());

    let err = service
        .record_registration(
            membership.id,
            day(2026, 12, 1),
            1000,
            PaymentMode::Card,
            at(2026, 12, 1),
        )
        .unwrap_err();
    match err {
        MemberServiceError::RegistrationTooEarly { allowed_from, .. } => {
            assert_eq!(allowed_from, day(2026, 12, 11));
        }
        other => panic!("unexpected error: {other}"),
    }

    service
        .record_registration(
            membership.id,
            day(2026, 12, 11),
            1000,
            PaymentMode::Transfer,
            at(2026, 12, 11),
        )
        .unwrap();
    assert_eq!(service.list_registrations(membership.id).unwrap().len(), 2);
    assert_eq!(
        service.expire_date(membership.id).unwrap(),
        Some(day(2027, 12, 11))
    );
}

#[test]
fn freeze_requests_wait_for_the_next_cycle() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let (membership, _) = service
        .create_membership(7, draft("Ada", "Lovelace", "ada@example.org"), at(2026, 1, 5))
        .unwrap();

    let err = service.request_unfreeze(membership.id).unwrap_err();
    assert!(matches!(err, MemberServiceError::NotFrozen(_)));

    let requested = service.request_freeze(membership.id).unwrap();
    assert!(!requested.frozen);
    assert!(requested.frozen_change);
    assert!(requested.frozen_after_change());

    let err = service.request_freeze(membership.id).unwrap_err();
    assert!(matches!(err, MemberServiceError::FreezeChangePending(_)));

    let cancelled = service.cancel_freeze_change(membership.id).unwrap();
    assert!(!cancelled.frozen_change);
    let err = service.cancel_freeze_change(membership.id).unwrap_err();
    assert!(matches!(err, MemberServiceError::NoFreezeChangePending(_)));
}

#[test]
fn corrections_move_the_balance_but_not_savings() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let (membership, _) = service
        .create_membership(8, draft("Ada", "Lovelace", "ada@example.org"), at(2026, 1, 5))
        .unwrap();

    let err = service
        .add_correction(membership.id, 0, "nothing", at(2026, 1, 6))
        .unwrap_err();
    assert!(matches!(err, MemberServiceError::EmptyCorrection));
    let err = service
        .add_correction(membership.id, 30, "   ", at(2026, 1, 6))
        .unwrap_err();
    assert!(matches!(err, MemberServiceError::Validation(_)));

    service
        .add_correction(membership.id, -90, "missed shift", at(2026, 1, 6))
        .unwrap();
    service
        .add_correction(membership.id, 30, "helped at inventory", at(2026, 1, 8))
        .unwrap();

    assert_eq!(service.time_count(membership.id, None).unwrap(), -60);
    assert_eq!(
        service
            .time_count(membership.id, Some(at(2026, 1, 7)))
            .unwrap(),
        -90
    );
    assert_eq!(service.savings_count(membership.id, None).unwrap(), 0);

    let logs = service.list_time_logs(membership.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.kind == TimeLogKind::Custom));
}

fn service(conn: &Connection) -> Service<'_> {
    MembershipService::new(
        SqliteMemberRepository::try_new(conn).unwrap(),
        SqliteLedgerRepository::try_new(conn).unwrap(),
        SqliteShiftRepository::try_new(conn).unwrap(),
        CoopConfig::default(),
    )
}

fn draft(first_name: &str, last_name: &str, email: &str) -> BeneficiaryDraft {
    BeneficiaryDraft {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.to_string(),
        phone: None,
    }
}

fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn at(year: i32, month: u32, day_of_month: u32) -> NaiveDateTime {
    day(year, month, day_of_month).and_hms_opt(10, 0, 0).unwrap()
}
