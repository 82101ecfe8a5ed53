use chrono::{NaiveDate, NaiveDateTime};
use epicerie_core::config::CheckinConfig;
use epicerie_core::model::membership::Beneficiary;
use epicerie_core::model::shift::Shift;
use epicerie_core::model::swipe_card::ean13_from_number;
use epicerie_core::repo::card_repo::{CardRepository, SqliteCardRepository};
use epicerie_core::repo::ledger_repo::SqliteLedgerRepository;
use epicerie_core::repo::member_repo::SqliteMemberRepository;
use epicerie_core::repo::shift_repo::SqliteShiftRepository;
use epicerie_core::service::checkin_service::{CheckinError, CheckinService};
use epicerie_core::{
    open_db_in_memory, BeneficiaryDraft, CoopConfig, MembershipService, PaymentMode,
    ShiftService, ValidationError,
};
use rusqlite::Connection;

type Checkin<'conn> = CheckinService<
    SqliteCardRepository<'conn>,
    SqliteShiftRepository<'conn>,
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
>;

#[test]
fn issuing_a_card_disables_the_previous_one() {
    let conn = open_db_in_memory().unwrap();
    let ada = beneficiary(&conn);
    let checkin = checkin(&conn, CheckinConfig::default());

    let err = checkin
        .issue_card(ada.id, "1234567890123", at(9, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        CheckinError::Validation(ValidationError::InvalidCardCode(_))
    ));

    let first = checkin.issue_card(ada.id, &code(1), at(9, 0)).unwrap();
    let second = checkin.issue_card(ada.id, &code(2), at(9, 5)).unwrap();
    let cards = checkin.list_cards(ada.id).unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].id, second.id);
    assert!(cards[0].enabled);
    assert_eq!(cards[1].id, first.id);
    assert!(!cards[1].enabled);
    assert_eq!(cards[1].disabled_at, Some(at(9, 5)));

    let err = checkin.issue_card(ada.id, &code(2), at(9, 10)).unwrap_err();
    assert!(matches!(err, CheckinError::DuplicateCode(_)));

    let err = checkin.enable_card(first.id).unwrap_err();
    assert!(matches!(err, CheckinError::AnotherCardEnabled(id) if id == second.id));

    checkin.disable_card(second.id, at(9, 15)).unwrap();
    let first = checkin.enable_card(first.id).unwrap();
    assert!(first.enabled);
    assert!(first.disabled_at.is_none());
}

#[test]
fn swipe_reports_shifts_in_progress() {
    let conn = open_db_in_memory().unwrap();
    let ada = beneficiary(&conn);
    let shift = booked_shift(&conn, &ada);
    let checkin = checkin(&conn, CheckinConfig::default());
    let card = checkin.issue_card(ada.id, &code(7), at(8, 0)).unwrap();

    let early = checkin.check_in(&code(7), at(8, 30)).unwrap();
    assert!(early.shifts.is_empty());

    let in_tolerance = checkin.check_in(&format!(" {} ", code(7)), at(8, 50)).unwrap();
    assert_eq!(in_tolerance.beneficiary.id, ada.id);
    assert_eq!(in_tolerance.shifts.len(), 1);
    assert_eq!(in_tolerance.shifts[0].id, shift.id);
    assert_eq!(in_tolerance.validated, 0);

    let swipes = SqliteCardRepository::try_new(&conn)
        .unwrap()
        .list_swipes(card.id, None)
        .unwrap();
    assert_eq!(swipes.len(), 2);
    assert_eq!(swipes[1].swiped_at, at(8, 50));
}

#[test]
fn swipe_validates_started_shifts_when_enabled() {
    let conn = open_db_in_memory().unwrap();
    let ada = beneficiary(&conn);
    let shift = booked_shift(&conn, &ada);
    let config = CheckinConfig {
        validate_shifts: true,
        ..CheckinConfig::default()
    };
    let checkin = checkin(&conn, config);
    checkin.issue_card(ada.id, &code(7), at(8, 0)).unwrap();

    let before_start = checkin.check_in(&code(7), at(8, 55)).unwrap();
    assert_eq!(before_start.shifts.len(), 1);
    assert_eq!(before_start.validated, 0);

    let started = checkin.check_in(&code(7), at(9, 10)).unwrap();
    assert_eq!(started.validated, 1);
    let again = checkin.check_in(&code(7), at(9, 20)).unwrap();
    assert_eq!(again.validated, 0);

    let members = members(&conn);
    assert_eq!(members.time_count(ada.membership_id, None).unwrap(), 180);
    let shifts = shift_service(&conn);
    assert!(shifts.get_shift(shift.id).unwrap().was_carried_out);
}

#[test]
fn unknown_and_disabled_cards_are_refused() {
    let conn = open_db_in_memory().unwrap();
    let ada = beneficiary(&conn);
    let checkin = checkin(&conn, CheckinConfig::default());

    let err = checkin.check_in(&code(99), at(9, 0)).unwrap_err();
    assert!(matches!(err, CheckinError::UnknownCode(_)));

    let card = checkin.issue_card(ada.id, &code(3), at(8, 0)).unwrap();
    checkin.disable_card(card.id, at(8, 30)).unwrap();
    let err = checkin.check_in(&code(3), at(9, 0)).unwrap_err();
    assert!(matches!(err, CheckinError::CardDisabled(id) if id == card.id));

    let swipes = SqliteCardRepository::try_new(&conn)
        .unwrap()
        .list_swipes(card.id, None)
        .unwrap();
    assert!(swipes.is_empty());
}

fn checkin(conn: &Connection, config: CheckinConfig) -> Checkin<'_> {
    CheckinService::new(
        SqliteCardRepository::try_new(conn).unwrap(),
        SqliteMemberRepository::try_new(conn).unwrap(),
        SqliteShiftRepository::try_new(conn).unwrap(),
        shift_service(conn),
        config,
    )
}

fn shift_service(
    conn: &Connection,
) -> ShiftService<SqliteShiftRepository<'_>, SqliteMemberRepository<'_>, SqliteLedgerRepository<'_>>
{
    ShiftService::new(
        SqliteShiftRepository::try_new(conn).unwrap(),
        SqliteMemberRepository::try_new(conn).unwrap(),
        SqliteLedgerRepository::try_new(conn).unwrap(),
        CoopConfig::default(),
    )
}

fn members(
    conn: &Connection,
) -> MembershipService<SqliteMemberRepository<'_>, SqliteLedgerRepository<'_>, SqliteShiftRepository<'_>>
{
    MembershipService::new(
        SqliteMemberRepository::try_new(conn).unwrap(),
        SqliteLedgerRepository::try_new(conn).unwrap(),
        SqliteShiftRepository::try_new(conn).unwrap(),
        CoopConfig::default(),
    )
}

fn beneficiary(conn: &Connection) -> Beneficiary {
    let members = members(conn);
    let (membership, main) = members
        .create_membership(
            1,
            BeneficiaryDraft {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.org".to_string(),
                phone: None,
            },
            booking_time(),
        )
        .unwrap();
    members
        .record_registration(
            membership.id,
            NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            1000,
            PaymentMode::Card,
            booking_time(),
        )
        .unwrap();
    main
}

/// Shift from 09:00 to 12:00 on the swipe day, booked in advance.
fn booked_shift(conn: &Connection, shifter: &Beneficiary) -> Shift {
    let shifts = shift_service(conn);
    let job = shifts.create_job("Caisse", "#ff8800").unwrap();
    let shift = shifts
        .create_shift(job.id, at(9, 0), at(12, 0), None, booking_time())
        .unwrap();
    shifts.book(shift.id, shifter.id, None, booking_time()).unwrap()
}

fn code(number: u64) -> String {
    ean13_from_number(number).unwrap()
}

fn booking_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

/// Time of day on the swipe day, 2026-03-10.
fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 10)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}
