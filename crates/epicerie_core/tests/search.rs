use chrono::{NaiveDate, NaiveDateTime};
use epicerie_core::repo::ledger_repo::SqliteLedgerRepository;
use epicerie_core::repo::member_repo::SqliteMemberRepository;
use epicerie_core::repo::shift_repo::SqliteShiftRepository;
use epicerie_core::{
    open_db_in_memory, search_beneficiaries, BeneficiaryDraft, BeneficiaryQuery, CoopConfig,
    MembershipService,
};
use rusqlite::Connection;

type Members<'conn> = MembershipService<
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
    SqliteShiftRepository<'conn>,
>;

#[test]
fn search_matches_name_prefixes() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (membership, ada) = members
        .create_membership(12, draft("Ada", "Lovelace", "ada@example.org"), now())
        .unwrap();
    members
        .create_membership(13, draft("Alan", "Turing", "alan@example.org"), now())
        .unwrap();

    let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new("love")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].beneficiary_id, ada.id);
    assert_eq!(hits[0].membership_id, membership.id);
    assert_eq!(hits[0].member_number, 12);
    assert_eq!(hits[0].display_name(), "Ada Lovelace");

    let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new("ada love")).unwrap();
    assert_eq!(hits.len(), 1);
    let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new("ada turing")).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn search_ignores_case_and_diacritics() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (_, helene) = members
        .create_membership(1, draft("Hélène", "Grégoire", "helene@example.org"), now())
        .unwrap();

    for text in ["helene", "HÉLÈNE", "gregoire"] {
        let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new(text)).unwrap();
        assert_eq!(hits.len(), 1, "no hit for `{text}`");
        assert_eq!(hits[0].beneficiary_id, helene.id);
    }
}

#[test]
fn search_reflects_updated_names() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (_, main) = members
        .create_membership(1, draft("Grace", "Murray", "grace@example.org"), now())
        .unwrap();
    members
        .update_beneficiary(main.id, draft("Grace", "Hopper", "grace@example.org"))
        .unwrap();

    assert!(search_beneficiaries(&conn, &BeneficiaryQuery::new("murray"))
        .unwrap()
        .is_empty());
    let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new("hopper")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].last_name, "Hopper");
}

#[test]
fn withdrawn_members_are_hidden_unless_requested() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    let (membership, _) = members
        .create_membership(1, draft("Charles", "Babbage", "charles@example.org"), now())
        .unwrap();
    members.withdraw(membership.id).unwrap();

    let query = BeneficiaryQuery::new("babbage");
    assert!(search_beneficiaries(&conn, &query).unwrap().is_empty());

    let query = BeneficiaryQuery {
        include_withdrawn: true,
        ..query
    };
    assert_eq!(search_beneficiaries(&conn, &query).unwrap().len(), 1);
}

#[test]
fn search_applies_limit_and_orders_ties_by_last_name() {
    let conn = open_db_in_memory().unwrap();
    let members = members(&conn);
    for (number, last_name) in [(1, "Curie"), (2, "Ampère"), (3, "Bohr")] {
        members
            .create_membership(
                number,
                draft("Marie", last_name, &format!("m{number}@coop.example")),
                now(),
            )
            .unwrap();
    }

    let hits = search_beneficiaries(&conn, &BeneficiaryQuery::new("marie")).unwrap();
    let names: Vec<&str> = hits.iter().map(|hit| hit.last_name.as_str()).collect();
    assert_eq!(names, vec!["Ampère", "Bohr", "Curie"]);

    let query = BeneficiaryQuery {
        limit: 2,
        ..BeneficiaryQuery::new("marie")
    };
    assert_eq!(search_beneficiaries(&conn, &query).unwrap().len(), 2);

    assert!(search_beneficiaries(&conn, &BeneficiaryQuery::new("   "))
        .unwrap()
        .is_empty());
}

fn members(conn: &Connection) -> Members<'_> {
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

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}
