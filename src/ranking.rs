//! Candidate ranking. Pure; no I/O, no clock.

use crate::store::Provenance;
use serde::Serialize;
use std::cmp::Ordering;

/// One facility in the final ranked answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub facility_id: String,
    pub facility_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_people: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_person_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_doctors: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_minutes: Option<u32>,
    /// ETA + wait; defined only when both are.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_last_updated: Option<String>,
    /// 1-based position in the final answer.
    pub rank: usize,
}

impl RankedResult {
    fn compute_total(&mut self) {
        self.total_time_minutes = match (self.eta_minutes, self.estimated_wait_minutes) {
            (Some(eta), Some(wait)) => Some(eta + f64::from(wait)),
            _ => None,
        };
    }
}

fn cmp_option_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order candidates by total time ascending, take the top `limit`, then
/// backfill any remaining slots from the rest ordered by ETA ascending
/// (undefined ETA last). All ties break on original input order, so the
/// output is deterministic for identical inputs.
pub fn rank(candidates: Vec<RankedResult>, limit: usize) -> Vec<RankedResult> {
    let mut indexed: Vec<(usize, RankedResult)> = candidates
        .into_iter()
        .map(|mut item| {
            item.compute_total();
            item
        })
        .enumerate()
        .collect();

    let (mut timed, mut rest): (Vec<_>, Vec<_>) = {
        let mut timed = Vec::new();
        let mut rest = Vec::new();
        for entry in indexed.drain(..) {
            if entry.1.total_time_minutes.is_some() {
                timed.push(entry);
            } else {
                rest.push(entry);
            }
        }
        (timed, rest)
    };

    timed.sort_by(|(ia, a), (ib, b)| {
        cmp_option_f64(a.total_time_minutes, b.total_time_minutes).then(ia.cmp(ib))
    });

    timed.truncate(limit);
    let mut out: Vec<RankedResult> = timed.into_iter().map(|(_, item)| item).collect();

    if out.len() < limit {
        rest.sort_by(|(ia, a), (ib, b)| {
            cmp_option_f64(a.eta_minutes, b.eta_minutes).then(ia.cmp(ib))
        });
        out.extend(
            rest.into_iter()
                .take(limit - out.len())
                .map(|(_, item)| item),
        );
    }

    for (position, item) in out.iter_mut().enumerate() {
        item.rank = position + 1;
    }
    out
}
