//! Operator command line for the cooperative core.
//!
//! # Responsibility
//! - Open the database and rules file named on the command line.
//! - Map each subcommand onto one core service call and print the outcome.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Args, Parser, Subcommand};
use epicerie_core::logging::{self, LogSettings};
use epicerie_core::model::membership::{BeneficiaryDraft, PaymentMode};
use epicerie_core::model::shift::ShiftState;
use epicerie_core::repo::card_repo::SqliteCardRepository;
use epicerie_core::repo::ledger_repo::SqliteLedgerRepository;
use epicerie_core::repo::member_repo::SqliteMemberRepository;
use epicerie_core::repo::shift_repo::SqliteShiftRepository;
use epicerie_core::service::checkin_service::CheckinService;
use epicerie_core::service::generator_service::GeneratorService;
use epicerie_core::service::membership_service::MembershipService;
use epicerie_core::service::shift_service::{Actor, ShiftService};
use epicerie_core::{open_db, search_beneficiaries, BeneficiaryQuery, CoopConfig};
use log::info;
use rusqlite::Connection;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "epicerie")]
#[command(version)]
#[command(about = "Membership and volunteer shift administration", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "epicerie.sqlite3")]
    db: PathBuf,

    /// JSON rules file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run as if the current time were this instant (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, global = true)]
    at: Option<NaiveDateTime>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the database
    Init,
    /// Memberships and registrations
    #[command(subcommand)]
    Member(MemberCommand),
    /// Shift generation and booking
    #[command(subcommand)]
    Shifts(ShiftCommand),
    /// Membership cycles
    #[command(subcommand)]
    Cycle(CycleCommand),
    /// Swipe cards
    #[command(subcommand)]
    Card(CardCommand),
    /// Record a door swipe
    Checkin {
        code: String,
    },
    /// Find beneficiaries by name or email
    Search {
        text: Vec<String>,
        #[arg(long)]
        include_withdrawn: bool,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum MemberCommand {
    /// Create a membership with its main beneficiary
    Add {
        #[arg(long)]
        number: i64,
        #[command(flatten)]
        identity: Identity,
    },
    /// Record a registration or renewal
    Register {
        #[arg(long)]
        number: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Amount in cents
        #[arg(long)]
        amount: i64,
        /// cash, cheque, card, transfer or helloasso
        #[arg(long, default_value = "cash")]
        mode: String,
    },
    /// Show a membership with its balance and current cycle
    Show {
        #[arg(long)]
        number: i64,
    },
}

#[derive(Args)]
struct Identity {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: Option<String>,
}

#[derive(Subcommand)]
enum ShiftCommand {
    /// Generate shifts from weekly periods
    Generate {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Hold new slots for last cycle's shifters
        #[arg(long)]
        reserve: bool,
    },
    /// List buckets starting in a date range
    Buckets {
        #[arg(long)]
        from: NaiveDate,
        /// Inclusive last day; defaults to one week after `from`
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Book a shift for a beneficiary
    Book {
        #[arg(long)]
        shift: Uuid,
        #[arg(long)]
        beneficiary: Uuid,
        /// Take any open slot of the shift's bucket
        #[arg(long)]
        any_slot: bool,
    },
    /// Free a booked shift
    Free {
        #[arg(long)]
        shift: Uuid,
        /// Act as this beneficiary instead of an administrator
        #[arg(long)]
        member: Option<Uuid>,
    },
    /// Validate a shift as carried out
    Validate {
        #[arg(long)]
        shift: Uuid,
    },
}

#[derive(Subcommand)]
enum CycleCommand {
    /// Run cycle starts for a day (today by default)
    Start {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum CardCommand {
    /// Issue a new card, disabling the previous one
    Issue {
        #[arg(long)]
        beneficiary: Uuid,
        #[arg(long)]
        code: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoopConfig::load(path)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => CoopConfig::default(),
    };
    if let Some(settings) = LogSettings::from_config(&config.logging)? {
        logging::start(settings)?;
    }

    let now = cli.at.unwrap_or_else(|| Local::now().naive_local());
    let conn = open_db(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;
    info!("event=cli_command module=cli status=start");

    match cli.command {
        Commands::Init => {
            println!(
                "database {} ready (epicerie_core {})",
                cli.db.display(),
                epicerie_core::core_version()
            );
        }
        Commands::Member(command) => run_member(&conn, &config, command, now)?,
        Commands::Shifts(command) => run_shifts(&conn, &config, command, now)?,
        Commands::Cycle(CycleCommand::Start { date }) => {
            let service = membership_service(&conn, &config)?;
            let outcomes = service.start_cycles(date.unwrap_or(now.date()))?;
            for outcome in &outcomes {
                let total: i64 = outcome
                    .logs
                    .iter()
                    .filter(|log| !log.kind.is_saving())
                    .map(|log| log.minutes)
                    .sum();
                println!(
                    "{} {} {:+} min",
                    outcome.membership_id,
                    outcome.cycle_end_kind.as_str(),
                    total
                );
            }
            println!("{} cycle(s) started", outcomes.len());
        }
        Commands::Card(CardCommand::Issue { beneficiary, code }) => {
            let service = checkin_service(&conn, &config)?;
            let card = service.issue_card(beneficiary, &code, now)?;
            println!("card {} issued ({})", card.code, card.id);
        }
        Commands::Checkin { code } => {
            let service = checkin_service(&conn, &config)?;
            let check_in = service.check_in(&code, now)?;
            println!("welcome {}", check_in.beneficiary.display_name());
            for shift in &check_in.shifts {
                println!(
                    "  shift {} {}-{}",
                    shift.id,
                    shift.start.format("%H:%M"),
                    shift.end.format("%H:%M")
                );
            }
            if check_in.validated > 0 {
                println!("{} shift(s) validated", check_in.validated);
            }
        }
        Commands::Search {
            text,
            include_withdrawn,
            limit,
        } => {
            let mut query = BeneficiaryQuery::new(text.join(" "));
            query.include_withdrawn = include_withdrawn;
            query.limit = limit;
            for hit in search_beneficiaries(&conn, &query)? {
                println!(
                    "#{:<5} {} <{}> {}",
                    hit.member_number,
                    hit.display_name(),
                    hit.email,
                    hit.beneficiary_id
                );
            }
        }
    }
    Ok(())
}

fn run_member(
    conn: &Connection,
    config: &CoopConfig,
    command: MemberCommand,
    now: NaiveDateTime,
) -> Result<()> {
    let service = membership_service(conn, config)?;
    match command {
        MemberCommand::Add { number, identity } => {
            let (membership, beneficiary) = service.create_membership(
                number,
                BeneficiaryDraft {
                    first_name: identity.first_name,
                    last_name: identity.last_name,
                    email: identity.email,
                    phone: identity.phone,
                },
                now,
            )?;
            println!(
                "membership #{} created ({}), main beneficiary {}",
                membership.member_number, membership.id, beneficiary.id
            );
        }
        MemberCommand::Register {
            number,
            date,
            amount,
            mode,
        } => {
            let mode = PaymentMode::parse(&mode)
                .ok_or_else(|| anyhow!("unknown payment mode `{mode}`"))?;
            let membership = service
                .find_by_number(number)?
                .ok_or_else(|| anyhow!("no membership #{number}"))?;
            let registration = service.record_registration(
                membership.id,
                date.unwrap_or(now.date()),
                amount,
                mode,
                now,
            )?;
            let expiry = service.expire_date(membership.id)?;
            println!(
                "registration of {} recorded, valid until {}",
                registration.date,
                expiry.map_or_else(|| "-".to_string(), |date| date.to_string())
            );
        }
        MemberCommand::Show { number } => {
            let membership = service
                .find_by_number(number)?
                .ok_or_else(|| anyhow!("no membership #{number}"))?;
            println!("membership #{} ({})", membership.member_number, membership.id);
            println!(
                "  withdrawn={} frozen={} freeze_change_pending={}",
                membership.withdrawn, membership.frozen, membership.frozen_change
            );
            for beneficiary in service.list_beneficiaries(membership.id)? {
                println!(
                    "  {} <{}> {}",
                    beneficiary.display_name(),
                    beneficiary.email,
                    beneficiary.id
                );
            }
            println!(
                "  up to date: {}",
                service.is_uptodate(membership.id, now.date())?
            );
            println!(
                "  balance: {} min, savings: {} min",
                service.time_count(membership.id, None)?,
                service.savings_count(membership.id, None)?
            );
            match service.cycle_report(membership.id, now)? {
                Some(report) => println!(
                    "  cycle {}..{}: validated {} min, upcoming {} min, remaining due {} min",
                    report.window.start,
                    report.window.end,
                    report.validated_minutes,
                    report.upcoming_minutes,
                    report.remaining_due
                ),
                None => println!("  no cycle yet"),
            }
        }
    }
    Ok(())
}

fn run_shifts(
    conn: &Connection,
    config: &CoopConfig,
    command: ShiftCommand,
    now: NaiveDateTime,
) -> Result<()> {
    match command {
        ShiftCommand::Generate { from, to, reserve } => {
            let service = GeneratorService::new(
                SqliteShiftRepository::try_new(conn)?,
                SqliteMemberRepository::try_new(conn)?,
                config.clone(),
            );
            let report = service.generate(from, to, reserve, now)?;
            println!(
                "{} shift(s) created, {} bucket(s) skipped, {} fixed, {} reserved",
                report.created.len(),
                report.skipped_buckets,
                report.fixed,
                report.reserved
            );
        }
        ShiftCommand::Buckets { from, to } => {
            let to = to.unwrap_or(from + Duration::days(6));
            if to < from {
                bail!("--to must not be before --from");
            }
            let service = shift_service(conn, config)?;
            let buckets = service.buckets_between(
                from.and_time(NaiveTime::MIN),
                (to + Duration::days(1)).and_time(NaiveTime::MIN),
            )?;
            for bucket in &buckets {
                println!(
                    "{} {}-{} job={} {}/{} booked",
                    bucket.start().date(),
                    bucket.start().format("%H:%M"),
                    bucket.end().format("%H:%M"),
                    bucket.job_id(),
                    bucket.booked_count(),
                    bucket.len()
                );
                for shift in bucket.shifts() {
                    println!("    {} {}", shift.id, state_label(shift.state(now)));
                }
            }
        }
        ShiftCommand::Book {
            shift,
            beneficiary,
            any_slot,
        } => {
            let service = shift_service(conn, config)?;
            let booked = if any_slot {
                service.book_in_bucket(shift, beneficiary, None, now)?
            } else {
                service.book(shift, beneficiary, None, now)?
            };
            println!("shift {} booked", booked.id);
        }
        ShiftCommand::Free { shift, member } => {
            let service = shift_service(conn, config)?;
            let actor = member.map_or(Actor::Admin, Actor::Member);
            if service.free(shift, actor, now)? {
                println!("shift {shift} freed");
            } else {
                println!("shift {shift} was already free");
            }
        }
        ShiftCommand::Validate { shift } => {
            let service = shift_service(conn, config)?;
            if service.validate(shift, now)? {
                println!("shift {shift} validated");
            } else {
                println!("shift {shift} was already validated");
            }
        }
    }
    Ok(())
}

fn state_label(state: ShiftState) -> &'static str {
    match state {
        ShiftState::Free => "free",
        ShiftState::Reserved => "reserved",
        ShiftState::Booked => "booked",
        ShiftState::Dismissed => "dismissed",
        ShiftState::CarriedOut => "carried out",
        ShiftState::Invalidated => "not carried out",
    }
}

type SqliteMembershipService<'conn> = MembershipService<
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
    SqliteShiftRepository<'conn>,
>;

type SqliteShiftService<'conn> = ShiftService<
    SqliteShiftRepository<'conn>,
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
>;

type SqliteCheckinService<'conn> = CheckinService<
    SqliteCardRepository<'conn>,
    SqliteShiftRepository<'conn>,
    SqliteMemberRepository<'conn>,
    SqliteLedgerRepository<'conn>,
>;

fn membership_service<'conn>(
    conn: &'conn Connection,
    config: &CoopConfig,
) -> Result<SqliteMembershipService<'conn>> {
    Ok(MembershipService::new(
        SqliteMemberRepository::try_new(conn)?,
        SqliteLedgerRepository::try_new(conn)?,
        SqliteShiftRepository::try_new(conn)?,
        config.clone(),
    ))
}

fn shift_service<'conn>(
    conn: &'conn Connection,
    config: &CoopConfig,
) -> Result<SqliteShiftService<'conn>> {
    Ok(ShiftService::new(
        SqliteShiftRepository::try_new(conn)?,
        SqliteMemberRepository::try_new(conn)?,
        SqliteLedgerRepository::try_new(conn)?,
        config.clone(),
    ))
}

fn checkin_service<'conn>(
    conn: &'conn Connection,
    config: &CoopConfig,
) -> Result<SqliteCheckinService<'conn>> {
    Ok(CheckinService::new(
        SqliteCardRepository::try_new(conn)?,
        SqliteMemberRepository::try_new(conn)?,
        SqliteShiftRepository::try_new(conn)?,
        shift_service(conn, config)?,
        config.checkin.clone(),
    ))
}
