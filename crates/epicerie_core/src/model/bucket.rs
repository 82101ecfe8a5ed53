//! Shift bucket aggregate.
//!
//! A bucket is the set of shifts sharing identical start, end and job. It
//! is never persisted; it is rebuilt from shift rows to render and
//! allocate slots.
//!
//! # Invariants
//! - Every shift in a bucket has the bucket key's start, end and job.
//! - `shifts()` is always sorted by [`compare_shifts`].
//! - Grouping yields buckets ordered by `(start, end, job_id)`.

use super::membership::{Beneficiary, BeneficiaryId, FormationId};
use super::shift::{JobId, Shift};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Identity shared by all shifts of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BucketKey {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub job_id: JobId,
}

impl BucketKey {
    pub fn of(shift: &Shift) -> Self {
        Self {
            start: shift.start,
            end: shift.end,
            job_id: shift.job_id,
        }
    }
}

/// How many of a bucket's slots have an active shifter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillState {
    Empty,
    Partial,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftBucket {
    key: BucketKey,
    shifts: Vec<Shift>,
}

impl ShiftBucket {
    pub fn new(first: Shift) -> Self {
        Self {
            key: BucketKey::of(&first),
            shifts: vec![first],
        }
    }

    /// Adds a shift, handing it back when it belongs to another bucket.
    pub fn try_push(&mut self, shift: Shift) -> Result<(), Shift> {
        if BucketKey::of(&shift) != self.key {
            return Err(shift);
        }
        let index = self
            .shifts
            .binary_search_by(|slot| compare_shifts(slot, &shift))
            .unwrap_or_else(|index| index);
        self.shifts.insert(index, shift);
        Ok(())
    }

    /// Groups shifts into buckets ordered by `(start, end, job_id)`.
    pub fn group(shifts: impl IntoIterator<Item = Shift>) -> Vec<ShiftBucket> {
        let mut grouped: BTreeMap<BucketKey, Vec<Shift>> = BTreeMap::new();
        for shift in shifts {
            grouped.entry(BucketKey::of(&shift)).or_default().push(shift);
        }
        grouped
            .into_iter()
            .map(|(key, mut shifts)| {
                shifts.sort_by(compare_shifts);
                ShiftBucket { key, shifts }
            })
            .collect()
    }

    pub fn key(&self) -> BucketKey {
        self.key
    }

    pub fn start(&self) -> NaiveDateTime {
        self.key.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.key.end
    }

    pub fn job_id(&self) -> JobId {
        self.key.job_id
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.key.end - self.key.start).num_minutes()
    }

    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    /// No slot of the bucket has an active shifter.
    pub fn has_no_shifter(&self) -> bool {
        self.booked_count() == 0
    }

    pub fn booked_count(&self) -> usize {
        self.shifts.iter().filter(|shift| shift.is_booked()).count()
    }

    pub fn free_count(&self) -> usize {
        self.shifts.len() - self.booked_count()
    }

    pub fn is_full(&self) -> bool {
        self.booked_count() == self.shifts.len()
    }

    pub fn fill_state(&self) -> FillState {
        match self.booked_count() {
            0 => FillState::Empty,
            count if count == self.shifts.len() => FillState::Full,
            _ => FillState::Partial,
        }
    }

    pub fn contains_beneficiary(&self, beneficiary_id: BeneficiaryId) -> bool {
        self.shifts
            .iter()
            .any(|shift| shift.active_shifter() == Some(beneficiary_id))
    }

    /// Formations required by at least one shift of the bucket.
    pub fn formations(&self) -> BTreeSet<FormationId> {
        self.shifts
            .iter()
            .filter_map(|shift| shift.formation_id)
            .collect()
    }

    /// First available shift, in sort order, that `beneficiary` may take.
    ///
    /// Formation-gated slots sort first, so qualified beneficiaries fill
    /// them before plain slots. A slot reserved for someone else is skipped.
    pub fn first_bookable_for(&self, beneficiary: &Beneficiary) -> Option<&Shift> {
        filter_by_formations(&self.shifts, &beneficiary.formations)
            .into_iter()
            .find(|shift| {
                shift.is_available()
                    && !shift.locked
                    && shift
                        .last_shifter_id
                        .map_or(true, |holder| holder == beneficiary.id)
            })
    }
}

/// Keeps shifts without formation or with a formation in `formations`.
pub fn filter_by_formations<'a>(
    shifts: &'a [Shift],
    formations: &BTreeSet<FormationId>,
) -> Vec<&'a Shift> {
    shifts
        .iter()
        .filter(|shift| {
            shift
                .formation_id
                .map_or(true, |formation| formations.contains(&formation))
        })
        .collect()
}

/// Bucket sort order: formation group, then booked time, unassigned last.
///
/// 1. Shifts requiring a formation come first, grouped by formation id.
/// 2. Within a group, shifts with an active shifter come before free ones,
///    ordered by `booked_time` ascending.
/// 3. Ties break on shift id.
pub fn compare_shifts(a: &Shift, b: &Shift) -> Ordering {
    let formation_order = match (a.formation_id, b.formation_id) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    let booked_order = match (a.is_booked(), b.is_booked()) {
        (true, true) => a.booked_time.cmp(&b.booked_time),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    };

    formation_order
        .then(booked_order)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::{compare_shifts, FillState, ShiftBucket};
    use crate::model::membership::{Beneficiary, BeneficiaryDraft};
    use crate::model::shift::Shift;
    use chrono::{NaiveDate, NaiveDateTime};
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn slot(job: Uuid) -> Shift {
        Shift::new(job, at(9, 0), at(12, 0), at(0, 0))
    }

    fn beneficiary() -> Beneficiary {
        Beneficiary::new(
            Uuid::new_v4(),
            BeneficiaryDraft {
                first_name: "Alex".to_string(),
                last_name: "Martin".to_string(),
                email: "alex@example.org".to_string(),
                phone: None,
            },
        )
    }

    #[test]
    fn sort_puts_formation_first_then_booked_time_then_free() {
        let job = Uuid::new_v4();
        let formation = Uuid::new_v4();

        let free_plain = slot(job);
        let mut late_plain = slot(job);
        late_plain.book(Uuid::new_v4(), None, at(8, 30)).unwrap();
        let mut early_plain = slot(job);
        early_plain.book(Uuid::new_v4(), None, at(7, 0)).unwrap();
        let gated = slot(job).with_formation(Some(formation));

        let buckets = ShiftBucket::group(vec![
            free_plain.clone(),
            late_plain.clone(),
            gated.clone(),
            early_plain.clone(),
        ]);
        assert_eq!(buckets.len(), 1);
        let order: Vec<Uuid> = buckets[0].shifts().iter().map(|shift| shift.id).collect();
        assert_eq!(
            order,
            vec![gated.id, early_plain.id, late_plain.id, free_plain.id]
        );
    }

    #[test]
    fn group_splits_by_job_and_orders_by_start() {
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        let later = Shift::new(job_a, at(14, 0), at(17, 0), at(0, 0));
        let buckets = ShiftBucket::group(vec![later, slot(job_a), slot(job_b), slot(job_a)]);

        assert_eq!(buckets.len(), 3);
        assert!(buckets[0].start() <= buckets[1].start());
        assert_eq!(buckets[2].start(), at(14, 0));
        let sizes: usize = buckets.iter().map(ShiftBucket::len).sum();
        assert_eq!(sizes, 4);
    }

    #[test]
    fn fill_state_tracks_active_shifters() {
        let job = Uuid::new_v4();
        let mut bucket = ShiftBucket::new(slot(job));
        bucket.try_push(slot(job)).unwrap();
        assert_eq!(bucket.fill_state(), FillState::Empty);
        assert!(bucket.has_no_shifter());
        assert!(!bucket.is_empty());
        assert_eq!(bucket.len(), 2);

        let mut booked = slot(job);
        booked.book(Uuid::new_v4(), None, at(8, 0)).unwrap();
        bucket.try_push(booked).unwrap();
        assert_eq!(bucket.fill_state(), FillState::Partial);
        assert!(!bucket.has_no_shifter());
        assert_eq!(bucket.free_count(), 2);

        let other_bucket_shift = Shift::new(job, at(13, 0), at(16, 0), at(0, 0));
        assert!(bucket.try_push(other_bucket_shift).is_err());
    }

    #[test]
    fn first_bookable_prefers_qualified_slot_and_skips_foreign_reservation() {
        let job = Uuid::new_v4();
        let formation = Uuid::new_v4();
        let mut member = beneficiary();

        let mut reserved = slot(job);
        reserved.reserve_for(Uuid::new_v4()).unwrap();
        let plain = slot(job);
        let gated = slot(job).with_formation(Some(formation));

        let buckets = ShiftBucket::group(vec![reserved, plain.clone(), gated.clone()]);
        let bucket = &buckets[0];

        let pick = bucket.first_bookable_for(&member).unwrap();
        assert_eq!(pick.id, plain.id);

        member.formations.insert(formation);
        let pick = bucket.first_bookable_for(&member).unwrap();
        assert_eq!(pick.id, gated.id);
    }

    #[test]
    fn compare_is_total_on_identical_slots() {
        let job = Uuid::new_v4();
        let a = slot(job);
        let b = slot(job);
        assert_ne!(compare_shifts(&a, &b), std::cmp::Ordering::Equal);
    }
}
