//! Core domain logic for the cooperative grocery.
//! This crate is the single source of truth for membership, shift and
//! volunteer-time invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use config::{ConfigError, CoopConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::membership::{Beneficiary, BeneficiaryDraft, Membership, PaymentMode};
pub use model::shift::{Shift, ShiftState};
pub use model::time_log::{TimeLog, TimeLogKind};
pub use model::ValidationError;
pub use repo::{RepoError, RepoResult};
pub use search::fts::{
    search_beneficiaries, BeneficiaryHit, BeneficiaryQuery, SearchError, SearchResult,
};
pub use service::membership_service::{CycleReport, CycleWindow, MembershipService};
pub use service::shift_service::{Actor, BookingRefusal, ShiftService};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
