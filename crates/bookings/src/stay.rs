use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use villabook_core::{DomainError, DomainResult, ValueObject};

/// Calendar date format accepted on input.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open stay `[start_at, end_at)`.
///
/// `end_at` is the check-out day; another stay may start on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStay")]
pub struct StayRange {
    start_at: NaiveDate,
    end_at: NaiveDate,
}

#[derive(Deserialize)]
struct RawStay {
    start_at: NaiveDate,
    end_at: NaiveDate,
}

impl TryFrom<RawStay> for StayRange {
    type Error = DomainError;

    fn try_from(raw: RawStay) -> Result<Self, Self::Error> {
        StayRange::new(raw.start_at, raw.end_at)
    }
}

impl StayRange {
    pub fn new(start_at: NaiveDate, end_at: NaiveDate) -> DomainResult<Self> {
        if start_at >= end_at {
            return Err(DomainError::validation("start_at must be before end_at"));
        }
        Ok(Self { start_at, end_at })
    }

    /// Parse two ISO-8601 calendar dates.
    pub fn parse(start_at: &str, end_at: &str) -> DomainResult<Self> {
        let start = parse_date("start_at", start_at)?;
        let end = parse_date("end_at", end_at)?;
        Self::new(start, end)
    }

    pub fn start_at(&self) -> NaiveDate {
        self.start_at
    }

    pub fn end_at(&self) -> NaiveDate {
        self.end_at
    }

    /// Number of nights; always at least one.
    pub fn nights(&self) -> i64 {
        (self.end_at - self.start_at).num_days()
    }

    /// Interval intersection: `self.start < other.end && self.end > other.start`.
    pub fn intersects(&self, other: &StayRange) -> bool {
        self.start_at < other.end_at && self.end_at > other.start_at
    }
}

impl ValueObject for StayRange {}

impl core::fmt::Display for StayRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start_at.format(DATE_FORMAT),
            self.end_at.format(DATE_FORMAT)
        )
    }
}

fn parse_date(field: &str, value: &str) -> DomainResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| DomainError::validation(format!("{field} must be YYYY-MM-DD: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stay(start: &str, end: &str) -> StayRange {
        StayRange::parse(start, end).unwrap()
    }

    #[test]
    fn rejects_empty_and_inverted_ranges() {
        assert!(StayRange::parse("2025-06-05", "2025-06-05").is_err());
        assert!(StayRange::parse("2025-06-05", "2025-06-01").is_err());
    }

    #[test]
    fn rejects_non_iso_dates() {
        match StayRange::parse("06/01/2025", "2025-06-05") {
            Err(DomainError::Validation(msg)) if msg.contains("start_at") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn nights_counts_half_open_days() {
        assert_eq!(stay("2025-06-01", "2025-06-05").nights(), 4);
        assert_eq!(stay("2025-06-30", "2025-07-01").nights(), 1);
    }

    #[test]
    fn partial_overlap_is_detected_where_containment_is_not() {
        let stored = stay("2025-06-01", "2025-06-05");
        let candidate = stay("2025-06-04", "2025-06-06");
        assert!(candidate.intersects(&stored));
        assert!(stored.intersects(&candidate));
    }

    #[test]
    fn back_to_back_stays_do_not_intersect() {
        let first = stay("2025-06-01", "2025-06-05");
        let second = stay("2025-06-05", "2025-06-08");
        assert!(!first.intersects(&second));
        assert!(!second.intersects(&first));
    }

    #[test]
    fn deserialize_validates_order() {
        let ok: StayRange =
            serde_json::from_str(r#"{"start_at":"2025-06-01","end_at":"2025-06-03"}"#).unwrap();
        assert_eq!(ok.nights(), 2);

        let bad = serde_json::from_str::<StayRange>(r#"{"start_at":"2025-06-03","end_at":"2025-06-01"}"#);
        assert!(bad.is_err());
    }

    fn arb_stay() -> impl Strategy<Value = StayRange> {
        (0i64..400, 1i64..30).prop_map(|(offset, len)| {
            let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            let start = base + chrono::Duration::days(offset);
            StayRange::new(start, start + chrono::Duration::days(len)).unwrap()
        })
    }

    /// Day-by-day reference: two stays intersect iff they share a night.
    fn share_a_night(a: &StayRange, b: &StayRange) -> bool {
        a.start_at()
            .iter_days()
            .take_while(|d| *d < a.end_at())
            .any(|d| d >= b.start_at() && d < b.end_at())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: `intersects` agrees with a night-by-night reference.
        #[test]
        fn intersects_matches_reference(a in arb_stay(), b in arb_stay()) {
            prop_assert_eq!(a.intersects(&b), share_a_night(&a, &b));
        }

        /// Property: intersection is symmetric.
        #[test]
        fn intersects_is_symmetric(a in arb_stay(), b in arb_stay()) {
            prop_assert_eq!(a.intersects(&b), b.intersects(&a));
        }
    }
}
