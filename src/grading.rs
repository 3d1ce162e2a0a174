use serde::Serialize;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Engine error surfaced over IPC as a structured `{code, message, details}`
/// object. Insufficient-data outcomes are values, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// 1-decimal rounding applied to every score before it is persisted.
pub fn round_to_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Maps a percentage score onto the 1-9 grade scale (1 best, 9 worst).
///
/// Bands: 80-100=1, 70-79=2, 65-69=3, 60-64=4, 55-59=5, 50-54=6,
/// 45-49=7, 35-44=8, below 35=9.
pub fn calculate_grade(score: f64) -> Result<u8, CalcError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(CalcError::new(
            "out_of_range",
            format!("score must be between 0 and 100, got {score}"),
        ));
    }

    let grade = if score >= 80.0 {
        1
    } else if score >= 70.0 {
        2
    } else if score >= 65.0 {
        3
    } else if score >= 60.0 {
        4
    } else if score >= 55.0 {
        5
    } else if score >= 50.0 {
        6
    } else if score >= 45.0 {
        7
    } else if score >= 35.0 {
        8
    } else {
        9
    };
    Ok(grade)
}

pub fn grade_description(grade: u8) -> &'static str {
    match grade {
        1 => "HIGHEST",
        2 => "HIGHER",
        3 => "HIGH",
        4 => "HIGH AVERAGE",
        5 => "AVERAGE",
        6 => "LOW AVERAGE",
        7 => "LOW",
        8 => "LOWER",
        9 => "LOWEST",
        _ => "Unknown",
    }
}

/// Range check without an error path, for callers that only need a verdict.
#[allow(dead_code)]
pub fn score_in_range(score: f64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&score)
}

/// The single gate in front of mark entry: rejects out-of-range scores with
/// a bound-specific message, otherwise normalizes to 1 decimal place.
pub fn validate_and_normalize_score(score: f64) -> Result<f64, CalcError> {
    if score < MIN_SCORE {
        return Err(CalcError::new(
            "negative_score",
            format!("score cannot be negative, got {score} (valid range 0-100)"),
        ));
    }
    if score > MAX_SCORE {
        return Err(CalcError::new(
            "score_above_maximum",
            format!("score cannot exceed 100, got {score} (valid range 0-100)"),
        ));
    }
    Ok(round_to_1_decimal(score))
}

/// One row of the published grade scale, for report legends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub grade: u8,
    pub min_score: f64,
    pub max_score: f64,
    pub description: &'static str,
}

pub fn grade_scale() -> Vec<GradeBand> {
    let bounds: [(u8, f64, f64); 9] = [
        (1, 80.0, 100.0),
        (2, 70.0, 79.0),
        (3, 65.0, 69.0),
        (4, 60.0, 64.0),
        (5, 55.0, 59.0),
        (6, 50.0, 54.0),
        (7, 45.0, 49.0),
        (8, 35.0, 44.0),
        (9, 0.0, 34.0),
    ];
    bounds
        .iter()
        .map(|&(grade, min_score, max_score)| GradeBand {
            grade,
            min_score,
            max_score,
            description: grade_description(grade),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_partition_the_score_range() {
        let expectations = [
            (0.0, 9),
            (34.9, 9),
            (35.0, 8),
            (44.9, 8),
            (45.0, 7),
            (49.9, 7),
            (50.0, 6),
            (54.9, 6),
            (55.0, 5),
            (59.9, 5),
            (60.0, 4),
            (64.9, 4),
            (65.0, 3),
            (69.9, 3),
            (70.0, 2),
            (79.9, 2),
            (80.0, 1),
            (100.0, 1),
        ];
        for (score, grade) in expectations {
            assert_eq!(
                calculate_grade(score).expect("in-range score"),
                grade,
                "score {score}"
            );
        }
    }

    #[test]
    fn every_in_range_score_maps_to_one_grade() {
        let mut score = 0.0;
        while score <= 100.0 {
            let grade = calculate_grade(score).expect("in-range score");
            assert!((1..=9).contains(&grade), "score {score} -> grade {grade}");
            score += 0.1;
            score = round_to_1_decimal(score);
        }
    }

    #[test]
    fn out_of_range_scores_are_rejected_with_value_in_message() {
        let below = calculate_grade(-0.1).expect_err("below range must fail");
        assert_eq!(below.code, "out_of_range");
        assert!(below.message.contains("-0.1"));

        let above = calculate_grade(100.1).expect_err("above range must fail");
        assert_eq!(above.code, "out_of_range");
        assert!(above.message.contains("100.1"));
    }

    #[test]
    fn validator_reports_which_bound_was_violated() {
        let neg = validate_and_normalize_score(-5.0).expect_err("negative must fail");
        assert_eq!(neg.code, "negative_score");
        assert!(neg.message.contains("-5"));

        let over = validate_and_normalize_score(150.0).expect_err("over max must fail");
        assert_eq!(over.code, "score_above_maximum");
        assert!(over.message.contains("150"));
        assert!(over.message.contains("100"));
    }

    #[test]
    fn validator_normalizes_to_one_decimal() {
        assert_eq!(
            validate_and_normalize_score(72.456).expect("valid score"),
            72.5
        );
        assert_eq!(validate_and_normalize_score(0.0).expect("valid score"), 0.0);
        assert_eq!(
            validate_and_normalize_score(100.0).expect("valid score"),
            100.0
        );
    }

    #[test]
    fn score_in_range_accepts_closed_interval() {
        assert!(score_in_range(0.0));
        assert!(score_in_range(100.0));
        assert!(!score_in_range(-0.1));
        assert!(!score_in_range(100.1));
    }

    #[test]
    fn descriptions_cover_known_grades_and_tolerate_unknown() {
        assert_eq!(grade_description(1), "HIGHEST");
        assert_eq!(grade_description(5), "AVERAGE");
        assert_eq!(grade_description(9), "LOWEST");
        assert_eq!(grade_description(0), "Unknown");
        assert_eq!(grade_description(10), "Unknown");
    }

    #[test]
    fn grade_scale_lists_nine_contiguous_bands() {
        let scale = grade_scale();
        assert_eq!(scale.len(), 9);
        assert_eq!(scale[0].grade, 1);
        assert_eq!(scale[8].grade, 9);
        for band in &scale {
            assert_eq!(
                calculate_grade(band.min_score).expect("band bound"),
                band.grade
            );
            assert_eq!(
                calculate_grade(band.max_score).expect("band bound"),
                band.grade
            );
        }
    }
}
