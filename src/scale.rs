use serde::Serialize;

/// Grading scale families a classroom can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradeScaleType {
    /// AD / A / B / C.
    #[default]
    Letter,
    /// Nine steps, 10 down to 2.
    Numeric,
    /// A / B / C / D.
    UsLetter,
    /// Rounded percentage, no tiers.
    Percentage,
    Custom,
}

impl GradeScaleType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LETTER" | "LITERAL" => Some(Self::Letter),
            "NUMERIC" => Some(Self::Numeric),
            "US_LETTER" | "US" => Some(Self::UsLetter),
            "PERCENTAGE" | "PERCENT" => Some(Self::Percentage),
            "CUSTOM" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Letter => "LETTER",
            Self::Numeric => "NUMERIC",
            Self::UsLetter => "US_LETTER",
            Self::Percentage => "PERCENTAGE",
            Self::Custom => "CUSTOM",
        }
    }

    pub fn predefined() -> [GradeScaleType; 4] {
        [
            Self::Letter,
            Self::Numeric,
            Self::UsLetter,
            Self::Percentage,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTier {
    pub label: String,
    pub min_percent: f64,
}

fn tiers(rows: &[(&str, f64)]) -> Vec<ScaleTier> {
    rows.iter()
        .map(|(label, min_percent)| ScaleTier {
            label: (*label).to_string(),
            min_percent: *min_percent,
        })
        .collect()
}

/// Tiers of a predefined scale, highest first. Percentage has none.
pub fn predefined_tiers(scale: GradeScaleType) -> Vec<ScaleTier> {
    match scale {
        GradeScaleType::Letter | GradeScaleType::Custom => {
            tiers(&[("AD", 90.0), ("A", 70.0), ("B", 50.0), ("C", 0.0)])
        }
        GradeScaleType::Numeric => tiers(&[
            ("10", 95.0),
            ("9", 85.0),
            ("8", 75.0),
            ("7", 65.0),
            ("6", 55.0),
            ("5", 45.0),
            ("4", 35.0),
            ("3", 25.0),
            ("2", 0.0),
        ]),
        GradeScaleType::UsLetter => tiers(&[("A", 90.0), ("B", 80.0), ("C", 70.0), ("D", 0.0)]),
        GradeScaleType::Percentage => Vec::new(),
    }
}

/// Sorts tiers descending by `min_percent` and drops unusable ones.
pub fn normalize_tiers(mut tiers: Vec<ScaleTier>) -> Vec<ScaleTier> {
    tiers.retain(|t| !t.label.trim().is_empty() && t.min_percent.is_finite());
    tiers.sort_by(|a, b| b.min_percent.total_cmp(&a.min_percent));
    tiers
}

/// First tier whose minimum the score meets; the lowest tier otherwise.
///
/// `tiers` must already be sorted descending.
fn match_tier(score: f64, tiers: &[ScaleTier]) -> Option<&str> {
    tiers
        .iter()
        .find(|t| score >= t.min_percent)
        .or_else(|| tiers.last())
        .map(|t| t.label.as_str())
}

/// Converts a 0–100 score into a label of the given scale.
///
/// A custom scale without usable tiers falls back to the letter scale.
pub fn convert(score: f64, scale: GradeScaleType, custom: &[ScaleTier]) -> String {
    let score = if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    };
    match scale {
        GradeScaleType::Percentage => (score.round() as i64).to_string(),
        GradeScaleType::Custom if !custom.is_empty() => {
            let sorted = normalize_tiers(custom.to_vec());
            match match_tier(score, &sorted) {
                Some(label) => label.to_string(),
                None => convert(score, GradeScaleType::Letter, &[]),
            }
        }
        other => {
            let t = predefined_tiers(other);
            match_tier(score, &t).unwrap_or("C").to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(rows: &[(&str, f64)]) -> Vec<ScaleTier> {
        tiers(rows)
    }

    #[test]
    fn letter_scale_cutoffs() {
        assert_eq!(convert(100.0, GradeScaleType::Letter, &[]), "AD");
        assert_eq!(convert(90.0, GradeScaleType::Letter, &[]), "AD");
        assert_eq!(convert(89.9, GradeScaleType::Letter, &[]), "A");
        assert_eq!(convert(70.0, GradeScaleType::Letter, &[]), "A");
        assert_eq!(convert(50.0, GradeScaleType::Letter, &[]), "B");
        assert_eq!(convert(49.9, GradeScaleType::Letter, &[]), "C");
        assert_eq!(convert(0.0, GradeScaleType::Letter, &[]), "C");
    }

    #[test]
    fn numeric_scale_has_nine_steps() {
        let t = predefined_tiers(GradeScaleType::Numeric);
        assert_eq!(t.len(), 9);
        assert_eq!(convert(96.0, GradeScaleType::Numeric, &[]), "10");
        assert_eq!(convert(60.0, GradeScaleType::Numeric, &[]), "6");
        assert_eq!(convert(3.0, GradeScaleType::Numeric, &[]), "2");
    }

    #[test]
    fn us_letter_and_percentage() {
        assert_eq!(convert(85.0, GradeScaleType::UsLetter, &[]), "B");
        assert_eq!(convert(12.0, GradeScaleType::UsLetter, &[]), "D");
        assert_eq!(convert(86.4, GradeScaleType::Percentage, &[]), "86");
        assert_eq!(convert(86.5, GradeScaleType::Percentage, &[]), "87");
        assert_eq!(convert(140.0, GradeScaleType::Percentage, &[]), "100");
    }

    #[test]
    fn custom_scale_sorts_before_matching() {
        let tiers = custom(&[("Regular", 0.0), ("Excelente", 80.0), ("Bien", 50.0)]);
        assert_eq!(convert(55.0, GradeScaleType::Custom, &tiers), "Bien");
        assert_eq!(convert(80.0, GradeScaleType::Custom, &tiers), "Excelente");
        assert_eq!(convert(10.0, GradeScaleType::Custom, &tiers), "Regular");
    }

    #[test]
    fn custom_scale_falls_back_to_lowest_tier() {
        let tiers = custom(&[("Top", 90.0), ("Mid", 60.0)]);
        assert_eq!(convert(20.0, GradeScaleType::Custom, &tiers), "Mid");
    }

    #[test]
    fn empty_custom_scale_uses_letter_scale() {
        assert_eq!(convert(95.0, GradeScaleType::Custom, &[]), "AD");
        let blank = custom(&[("  ", 50.0)]);
        assert_eq!(convert(95.0, GradeScaleType::Custom, &blank), "AD");
    }

    #[test]
    fn scale_type_parsing_is_lenient() {
        assert_eq!(GradeScaleType::parse("custom"), Some(GradeScaleType::Custom));
        assert_eq!(GradeScaleType::parse("us_letter"), Some(GradeScaleType::UsLetter));
        assert_eq!(GradeScaleType::parse("???"), None);
    }
}
