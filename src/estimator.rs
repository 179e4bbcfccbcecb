//! Wait-time estimation: the two wait formulas and the synthetic fallback
//! used when a facility has neither cameras nor a cached estimate.

use crate::freshness::format_timestamp;
use crate::store::{OccupancyRecord, Provenance};
use rand::Rng;
use serde::Deserialize;
use time::OffsetDateTime;

/// Which wait formula to apply. The two variants existed side by side in
/// production; `doctor-aware` is the shipped default, `simple` stays
/// selectable until stakeholders settle on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitFormula {
    /// `people * per_person_minutes`
    Simple,
    /// `ceil(people / max(1, doctors)) * per_person_minutes`
    DoctorAware,
}

pub fn estimate_wait(
    people: u32,
    per_person_minutes: u32,
    doctors_on_duty: u32,
    formula: WaitFormula,
) -> u32 {
    match formula {
        WaitFormula::Simple => people.saturating_mul(per_person_minutes),
        WaitFormula::DoctorAware => people
            .div_ceil(doctors_on_duty.max(1))
            .saturating_mul(per_person_minutes),
    }
}

/// Draw ranges for synthetic estimates. All bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticRanges {
    pub people_min: u32,
    pub people_max: u32,
    pub per_person_min: u32,
    pub per_person_max: u32,
    pub doctors_min: u32,
    pub doctors_max: u32,
}

impl Default for SyntheticRanges {
    fn default() -> Self {
        Self {
            people_min: 20,
            people_max: 80,
            per_person_min: 8,
            per_person_max: 15,
            doctors_min: 1,
            doctors_max: 20,
        }
    }
}

fn draw(rng: &mut impl Rng, min: u32, max: u32) -> u32 {
    rng.gen_range(min..=max.max(min))
}

/// A fully synthetic record, tagged `synthetic_fallback` so downstream
/// consumers can tell placeholder data from measured data. The priority
/// gate keeps it from ever replacing a fresh trusted record.
pub fn synthesize(
    rng: &mut impl Rng,
    ranges: &SyntheticRanges,
    formula: WaitFormula,
    facility_id: &str,
    now: OffsetDateTime,
) -> OccupancyRecord {
    let people = draw(rng, ranges.people_min, ranges.people_max);
    let per_person_minutes = draw(rng, ranges.per_person_min, ranges.per_person_max);
    let doctors_on_duty = draw(rng, ranges.doctors_min, ranges.doctors_max);
    OccupancyRecord {
        facility_id: facility_id.to_string(),
        people,
        per_person_minutes,
        doctors_on_duty,
        estimated_wait_minutes: estimate_wait(people, per_person_minutes, doctors_on_duty, formula),
        cameras: Vec::new(),
        last_updated: format_timestamp(now),
        provenance: Provenance::SyntheticFallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use time::macros::datetime;

    #[test]
    fn doctor_aware_divides_and_rounds_up() {
        // ceil(23 / 4) = 6, 6 * 10 = 60
        assert_eq!(estimate_wait(23, 10, 4, WaitFormula::DoctorAware), 60);
        assert_eq!(estimate_wait(24, 10, 4, WaitFormula::DoctorAware), 60);
        assert_eq!(estimate_wait(25, 10, 4, WaitFormula::DoctorAware), 70);
    }

    #[test]
    fn zero_doctors_is_treated_as_one() {
        assert_eq!(estimate_wait(5, 10, 0, WaitFormula::DoctorAware), 50);
    }

    #[test]
    fn zero_people_waits_zero() {
        assert_eq!(estimate_wait(0, 10, 3, WaitFormula::DoctorAware), 0);
        assert_eq!(estimate_wait(0, 10, 3, WaitFormula::Simple), 0);
    }

    #[test]
    fn simple_formula_ignores_doctors() {
        assert_eq!(estimate_wait(23, 10, 4, WaitFormula::Simple), 230);
    }

    #[test]
    fn synthesized_record_is_tagged_and_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let ranges = SyntheticRanges::default();
        let now = datetime!(2026-02-01 12:00:00 UTC);

        let record = synthesize(&mut rng, &ranges, WaitFormula::DoctorAware, "fac-1", now);

        assert_eq!(record.provenance, Provenance::SyntheticFallback);
        assert_eq!(record.facility_id, "fac-1");
        assert!((ranges.people_min..=ranges.people_max).contains(&record.people));
        assert!(
            (ranges.per_person_min..=ranges.per_person_max).contains(&record.per_person_minutes)
        );
        assert!((ranges.doctors_min..=ranges.doctors_max).contains(&record.doctors_on_duty));
        assert_eq!(
            record.estimated_wait_minutes,
            estimate_wait(
                record.people,
                record.per_person_minutes,
                record.doctors_on_duty,
                WaitFormula::DoctorAware
            )
        );
        assert_eq!(record.last_updated, "2026-02-01T12:00:00Z");
    }

    #[test]
    fn same_seed_synthesizes_same_record() {
        let ranges = SyntheticRanges::default();
        let now = datetime!(2026-02-01 12:00:00 UTC);
        let a = synthesize(
            &mut StdRng::seed_from_u64(99),
            &ranges,
            WaitFormula::DoctorAware,
            "fac-1",
            now,
        );
        let b = synthesize(
            &mut StdRng::seed_from_u64(99),
            &ranges,
            WaitFormula::DoctorAware,
            "fac-1",
            now,
        );

        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_range_draws_the_single_value() {
        let mut rng = StdRng::seed_from_u64(1);
        let ranges = SyntheticRanges {
            people_min: 30,
            people_max: 30,
            per_person_min: 10,
            per_person_max: 10,
            doctors_min: 2,
            doctors_max: 2,
        };
        let now = datetime!(2026-02-01 12:00:00 UTC);

        let record = synthesize(&mut rng, &ranges, WaitFormula::DoctorAware, "fac-1", now);

        assert_eq!(record.people, 30);
        assert_eq!(record.per_person_minutes, 10);
        assert_eq!(record.doctors_on_duty, 2);
        assert_eq!(record.estimated_wait_minutes, 150);
    }
}
