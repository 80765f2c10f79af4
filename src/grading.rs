use serde::{Deserialize, Serialize};
use std::fmt;

pub const MARK_MIN: i64 = 0;
pub const MARK_MAX: i64 = 100;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GradeError {
    #[error("marks must be a whole number between 0 and 100, got {0}")]
    InvalidMark(String),
    /// Aggregation over zero records. Callers turn this into `null` summary fields.
    #[error("no recorded results to aggregate")]
    InsufficientData,
}

/// Letter grades, highest first. `Ord` follows declaration order, so `A < E`
/// means "A ranks above E".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeLabel {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "E")]
    E,
}

impl GradeLabel {
    pub const ALL: [GradeLabel; 12] = [
        GradeLabel::A,
        GradeLabel::AMinus,
        GradeLabel::BPlus,
        GradeLabel::B,
        GradeLabel::BMinus,
        GradeLabel::CPlus,
        GradeLabel::C,
        GradeLabel::CMinus,
        GradeLabel::DPlus,
        GradeLabel::D,
        GradeLabel::DMinus,
        GradeLabel::E,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GradeLabel::A => "A",
            GradeLabel::AMinus => "A-",
            GradeLabel::BPlus => "B+",
            GradeLabel::B => "B",
            GradeLabel::BMinus => "B-",
            GradeLabel::CPlus => "C+",
            GradeLabel::C => "C",
            GradeLabel::CMinus => "C-",
            GradeLabel::DPlus => "D+",
            GradeLabel::D => "D",
            GradeLabel::DMinus => "D-",
            GradeLabel::E => "E",
        }
    }

}

impl fmt::Display for GradeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeScale {
    /// 12 bands; used for every raw mark.
    #[default]
    Standard,
    /// 8 bands used on report cards; everything below 50 is a D.
    Condensed,
}

const STANDARD_BANDS: [(f64, GradeLabel); 12] = [
    (80.0, GradeLabel::A),
    (75.0, GradeLabel::AMinus),
    (70.0, GradeLabel::BPlus),
    (65.0, GradeLabel::B),
    (60.0, GradeLabel::BMinus),
    (55.0, GradeLabel::CPlus),
    (50.0, GradeLabel::C),
    (45.0, GradeLabel::CMinus),
    (40.0, GradeLabel::DPlus),
    (35.0, GradeLabel::D),
    (30.0, GradeLabel::DMinus),
    (0.0, GradeLabel::E),
];

const CONDENSED_BANDS: [(f64, GradeLabel); 8] = [
    (80.0, GradeLabel::A),
    (75.0, GradeLabel::AMinus),
    (70.0, GradeLabel::BPlus),
    (65.0, GradeLabel::B),
    (60.0, GradeLabel::BMinus),
    (55.0, GradeLabel::CPlus),
    (50.0, GradeLabel::C),
    (0.0, GradeLabel::D),
];

impl GradeScale {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "condensed" => Some(Self::Condensed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Condensed => "condensed",
        }
    }

    /// Inclusive lower bounds, highest band first.
    pub fn bands(self) -> &'static [(f64, GradeLabel)] {
        match self {
            Self::Standard => &STANDARD_BANDS,
            Self::Condensed => &CONDENSED_BANDS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub grade: GradeLabel,
    pub min: f64,
    pub max: f64,
}

/// Display table for a scale: each band's inclusive `min` and the next band's
/// bound as an exclusive `max` (100 for the top band).
pub fn scale_table(scale: GradeScale) -> Vec<GradeBand> {
    let bands = scale.bands();
    bands
        .iter()
        .enumerate()
        .map(|(i, (min, grade))| GradeBand {
            grade: *grade,
            min: *min,
            max: if i == 0 { MARK_MAX as f64 } else { bands[i - 1].0 },
        })
        .collect()
}

/// Classify a raw mark against the 12-band table.
pub fn classify_mark(value: i64) -> Result<GradeLabel, GradeError> {
    if !(MARK_MIN..=MARK_MAX).contains(&value) {
        return Err(GradeError::InvalidMark(value.to_string()));
    }
    classify_percentage(value as f64, GradeScale::Standard)
}

/// Classify a (possibly fractional) percentage against a scale.
pub fn classify_percentage(pct: f64, scale: GradeScale) -> Result<GradeLabel, GradeError> {
    if !pct.is_finite() || pct < MARK_MIN as f64 || pct > MARK_MAX as f64 {
        return Err(GradeError::InvalidMark(pct.to_string()));
    }
    for (min, grade) in scale.bands() {
        if pct >= *min {
            return Ok(*grade);
        }
    }
    // Lowest band starts at 0 and pct >= 0 here.
    Err(GradeError::InvalidMark(pct.to_string()))
}

/// Overall grade for an average percentage using the configured scale.
/// A missing average (no recorded results) is `InsufficientData`.
pub fn classify_average(avg: Option<f64>, scale: GradeScale) -> Result<GradeLabel, GradeError> {
    let pct = avg.ok_or(GradeError::InsufficientData)?;
    classify_percentage(pct, scale)
}

/// Accepts only JSON integers in 0..=100. Floats with a fractional part,
/// strings and out-of-range numbers are rejected rather than coerced.
pub fn validate_mark(raw: &serde_json::Value) -> Result<u8, GradeError> {
    if let Some(n) = raw.as_i64() {
        if (MARK_MIN..=MARK_MAX).contains(&n) {
            return Ok(n as u8);
        }
        return Err(GradeError::InvalidMark(n.to_string()));
    }
    if let Some(f) = raw.as_f64() {
        if f.fract() == 0.0 && (MARK_MIN as f64..=MARK_MAX as f64).contains(&f) {
            return Ok(f as u8);
        }
    }
    Err(GradeError::InvalidMark(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_mark_in_range_has_exactly_one_grade_and_is_monotonic() {
        let mut prev: Option<GradeLabel> = None;
        for v in 0..=100 {
            let g = classify_mark(v).expect("in range");
            let matching = STANDARD_BANDS
                .iter()
                .filter(|(min, _)| (v as f64) >= *min)
                .count();
            assert!(matching >= 1);
            if let Some(p) = prev {
                assert!(g <= p, "{} -> {} dropped below {}", v, g, p);
            }
            prev = Some(g);
        }
    }

    #[test]
    fn lower_bounds_are_inclusive() {
        let cases = [
            (0, "E"),
            (29, "E"),
            (30, "D-"),
            (34, "D-"),
            (35, "D"),
            (40, "D+"),
            (45, "C-"),
            (49, "C-"),
            (50, "C"),
            (55, "C+"),
            (60, "B-"),
            (65, "B"),
            (70, "B+"),
            (75, "A-"),
            (79, "A-"),
            (80, "A"),
            (100, "A"),
        ];
        for (v, expected) in cases {
            assert_eq!(classify_mark(v).expect("in range").as_str(), expected, "mark {}", v);
        }
    }

    #[test]
    fn out_of_range_marks_are_rejected() {
        assert!(matches!(classify_mark(-1), Err(GradeError::InvalidMark(_))));
        assert!(matches!(classify_mark(101), Err(GradeError::InvalidMark(_))));
        assert!(classify_percentage(f64::NAN, GradeScale::Standard).is_err());
        assert!(classify_percentage(100.5, GradeScale::Standard).is_err());
    }

    #[test]
    fn condensed_scale_collapses_below_fifty_to_d() {
        assert_eq!(classify_percentage(49.9, GradeScale::Condensed), Ok(GradeLabel::D));
        assert_eq!(classify_percentage(0.0, GradeScale::Condensed), Ok(GradeLabel::D));
        assert_eq!(classify_percentage(50.0, GradeScale::Condensed), Ok(GradeLabel::C));
        assert_eq!(classify_percentage(49.9, GradeScale::Standard), Ok(GradeLabel::CMinus));
        assert_eq!(classify_percentage(79.99, GradeScale::Condensed), Ok(GradeLabel::AMinus));
    }

    #[test]
    fn missing_average_is_insufficient_data() {
        assert_eq!(
            classify_average(None, GradeScale::Standard),
            Err(GradeError::InsufficientData)
        );
        assert_eq!(classify_average(Some(75.0), GradeScale::Standard), Ok(GradeLabel::AMinus));
    }

    #[test]
    fn validate_mark_rejects_fractions_and_strings() {
        assert_eq!(validate_mark(&json!(55)), Ok(55));
        assert_eq!(validate_mark(&json!(0)), Ok(0));
        assert_eq!(validate_mark(&json!(100.0)), Ok(100));
        assert!(validate_mark(&json!(55.5)).is_err());
        assert!(validate_mark(&json!("55")).is_err());
        assert!(validate_mark(&json!(-3)).is_err());
        assert!(validate_mark(&json!(null)).is_err());
    }

    #[test]
    fn labels_serialize_as_display_strings() {
        assert_eq!(serde_json::to_value(GradeLabel::AMinus).expect("ser"), json!("A-"));
        assert_eq!(GradeLabel::DPlus.to_string(), "D+");
        assert!(GradeLabel::A < GradeLabel::E);
    }

    #[test]
    fn scale_table_covers_zero_to_hundred() {
        let t = scale_table(GradeScale::Standard);
        assert_eq!(t.len(), 12);
        assert_eq!(t[0].max, 100.0);
        assert_eq!(t.last().map(|b| b.min), Some(0.0));
        assert_eq!(scale_table(GradeScale::Condensed).len(), 8);
    }
}
