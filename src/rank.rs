use serde::{Serialize, Serializer};
use std::fmt;

use crate::store::CohortTotal;

/// A 1-based standing within a cohort, or "N/A" when it cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Position(u32),
    NotAvailable,
}

impl Rank {
    pub fn position(self) -> Option<u32> {
        match self {
            Rank::Position(p) => Some(p),
            Rank::NotAvailable => None,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Position(p) => write!(f, "{}", p),
            Rank::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Rank::Position(p) => serializer.serialize_u32(*p),
            Rank::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

/// Rank `target` against the cohort's scores.
///
/// Equal scores share a rank and the next lower distinct score takes the
/// following position, so [90, 90, 80, 70] ranks as 1, 1, 2, 3. A target that
/// does not appear in the cohort (or an empty cohort) yields N/A.
pub fn rank(target: f64, cohort: &[f64]) -> Rank {
    if cohort.is_empty() || target.is_nan() {
        return Rank::NotAvailable;
    }
    let mut distinct: Vec<f64> = cohort.iter().copied().filter(|v| !v.is_nan()).collect();
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();

    if !distinct.iter().any(|v| *v == target) {
        return Rank::NotAvailable;
    }
    let above = distinct.iter().take_while(|v| **v > target).count();
    Rank::Position(above as u32 + 1)
}

const TOTAL_TOLERANCE: f64 = 1e-6;

/// Rank a cohort member by their own entry in a per-student totals list.
///
/// `listed_total` is the total shown to the student. If the cohort's entry
/// for them is missing or disagrees with it, the rank is N/A.
pub fn rank_member(student_id: &str, listed_total: f64, cohort: &[CohortTotal]) -> Rank {
    let Some(own) = cohort.iter().find(|c| c.student_id == student_id) else {
        return Rank::NotAvailable;
    };
    if (own.total_marks - listed_total).abs() > TOTAL_TOLERANCE {
        return Rank::NotAvailable;
    }
    let scores: Vec<f64> = cohort.iter().map(|c| c.total_marks).collect();
    rank(own.total_marks, &scores)
}
