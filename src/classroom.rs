use crate::calc::CalcError;
use crate::period::{format_timestamp, parse_timestamp, ClosedPeriod, Period, PeriodState};
use crate::scale::{self, GradeScaleType, ScaleTier};
use chrono::{DateTime, Datelike, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};

/// Grading configuration of one classroom, decoded once from its stored row.
#[derive(Debug, Clone)]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub use_competencies: bool,
    pub scale_type: GradeScaleType,
    pub custom_tiers: Vec<ScaleTier>,
    pub periods: PeriodState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSettings {
    pub classroom_id: String,
    pub name: String,
    pub use_competencies: bool,
    pub grade_scale_type: GradeScaleType,
    pub tiers: Vec<ScaleTier>,
    pub current_period: Period,
    pub closed_periods: Vec<ClosedPeriod>,
    pub created_at: String,
}

impl Classroom {
    pub fn convert(&self, score: f64) -> String {
        scale::convert(score, self.scale_type, &self.custom_tiers)
    }

    /// Tiers actually applied when converting, highest first.
    pub fn effective_tiers(&self) -> Vec<ScaleTier> {
        match self.scale_type {
            GradeScaleType::Custom => {
                let tiers = scale::normalize_tiers(self.custom_tiers.clone());
                if tiers.is_empty() {
                    scale::predefined_tiers(GradeScaleType::Letter)
                } else {
                    tiers
                }
            }
            other => scale::predefined_tiers(other),
        }
    }

    pub fn settings(&self) -> GradingSettings {
        GradingSettings {
            classroom_id: self.id.clone(),
            name: self.name.clone(),
            use_competencies: self.use_competencies,
            grade_scale_type: self.scale_type,
            tiers: self.effective_tiers(),
            current_period: self.periods.current,
            closed_periods: self.periods.closed_chronological().into_iter().cloned().collect(),
            created_at: format_timestamp(self.created_at),
        }
    }
}

/// Decodes a stored JSON column that may hold native JSON or a JSON string wrapping JSON.
///
/// Returns `None` for missing, blank or undecodable input.
pub fn decode_json_field(raw: Option<&str>) -> Option<Value> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    match value {
        Value::String(inner) => serde_json::from_str(inner.trim()).ok(),
        other => Some(other),
    }
}

/// Closed-period history; malformed entries are dropped, a malformed column yields `[]`.
pub fn decode_closed_periods(raw: Option<&str>, classroom_id: &str) -> Vec<ClosedPeriod> {
    let Some(value) = decode_json_field(raw) else {
        if raw.map(|s| !s.trim().is_empty()).unwrap_or(false) {
            tracing::warn!(classroom_id, "closed period history is not valid JSON; using empty history");
        }
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        tracing::warn!(classroom_id, "closed period history is not an array; using empty history");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let period = item
                .get("period")
                .or_else(|| item.get("bimester"))
                .and_then(|v| v.as_str())
                .and_then(|s| Period::parse(s).ok());
            let closed_at = item
                .get("closedAt")
                .and_then(|v| v.as_str())
                .and_then(parse_timestamp);
            let (Some(period), Some(closed_at)) = (period, closed_at) else {
                tracing::warn!(classroom_id, entry = %item, "dropping malformed closed period entry");
                return None;
            };
            let closed_by = item
                .get("closedBy")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Some(ClosedPeriod {
                period,
                closed_at,
                closed_by,
            })
        })
        .collect()
}

/// Custom scale tiers from either `[{label, minPercent}]` or `{levels: [...]}`.
pub fn decode_scale_config(raw: Option<&str>, classroom_id: &str) -> Vec<ScaleTier> {
    let Some(value) = decode_json_field(raw) else {
        return Vec::new();
    };
    let items = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => obj
            .get("levels")
            .or_else(|| obj.get("tiers"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    let tiers: Vec<ScaleTier> = items
        .iter()
        .filter_map(|item| {
            let label = item.get("label")?.as_str()?.trim().to_string();
            let min = item.get("minPercent").or_else(|| item.get("min"))?;
            let min_percent = match min {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            Some(ScaleTier { label, min_percent })
        })
        .collect();
    if tiers.is_empty() && !items.is_empty() {
        tracing::warn!(classroom_id, "custom grade scale has no usable tiers");
    }
    scale::normalize_tiers(tiers)
}

fn decode_scale_type(raw: Option<&str>, classroom_id: &str) -> GradeScaleType {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return GradeScaleType::default();
    };
    GradeScaleType::parse(raw).unwrap_or_else(|| {
        tracing::warn!(classroom_id, scale_type = raw, "unknown grade scale type; using LETTER");
        GradeScaleType::default()
    })
}

struct ClassroomRow {
    id: String,
    name: String,
    use_competencies: bool,
    grade_scale_type: Option<String>,
    grade_scale_config: Option<String>,
    current_bimester: Option<String>,
    closed_bimesters: Option<String>,
    created_at: String,
}

pub fn load_classroom(
    conn: &Connection,
    classroom_id: &str,
    now: DateTime<Utc>,
) -> Result<Classroom, CalcError> {
    let row: Option<ClassroomRow> = conn
        .query_row(
            "SELECT id, name, use_competencies, grade_scale_type, grade_scale_config,
                    current_bimester, closed_bimesters, created_at
             FROM classrooms
             WHERE id = ?",
            [classroom_id],
            |r| {
                Ok(ClassroomRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    use_competencies: r.get::<_, i64>(2)? != 0,
                    grade_scale_type: r.get(3)?,
                    grade_scale_config: r.get(4)?,
                    current_bimester: r.get(5)?,
                    closed_bimesters: r.get(6)?,
                    created_at: r.get(7)?,
                })
            },
        )
        .optional()?;
    let Some(row) = row else {
        return Err(CalcError::new("not_found", "classroom not found")
            .with_details(json!({ "classroomId": classroom_id })));
    };

    let created_at = parse_timestamp(&row.created_at).unwrap_or_else(|| {
        tracing::warn!(classroom_id, created_at = %row.created_at, "unparseable classroom creation time; using epoch");
        DateTime::<Utc>::default()
    });
    let current = row
        .current_bimester
        .as_deref()
        .and_then(|s| Period::parse(s).ok())
        .unwrap_or_else(|| Period::first_of(now.year()));

    Ok(Classroom {
        scale_type: decode_scale_type(row.grade_scale_type.as_deref(), &row.id),
        custom_tiers: decode_scale_config(row.grade_scale_config.as_deref(), &row.id),
        periods: PeriodState {
            current,
            closed: decode_closed_periods(row.closed_bimesters.as_deref(), &row.id),
        },
        id: row.id,
        name: row.name,
        use_competencies: row.use_competencies,
        created_at,
    })
}

/// Writes the period state back as native JSON.
pub fn save_period_state(
    conn: &Connection,
    classroom_id: &str,
    state: &PeriodState,
) -> Result<(), CalcError> {
    let closed: Vec<Value> = state
        .closed
        .iter()
        .map(|c| {
            json!({
                "period": c.period,
                "closedAt": format_timestamp(c.closed_at),
                "closedBy": c.closed_by,
            })
        })
        .collect();
    let closed_json = serde_json::to_string(&closed)
        .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    conn.execute(
        "UPDATE classrooms SET current_bimester = ?, closed_bimesters = ? WHERE id = ?",
        (state.current.to_string(), closed_json, classroom_id),
    )
    .map_err(|e| {
        CalcError::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "classrooms" }))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_json_field_unwraps_string_encoding() {
        let native = r#"[{"label":"X","minPercent":1}]"#;
        let wrapped = serde_json::to_string(native).expect("encode");
        assert_eq!(decode_json_field(Some(native)), decode_json_field(Some(&wrapped)));
        assert!(decode_json_field(Some(native)).is_some());
        assert_eq!(decode_json_field(Some("{not json")), None);
        assert_eq!(decode_json_field(Some("   ")), None);
        assert_eq!(decode_json_field(None), None);
    }

    #[test]
    fn closed_periods_skip_malformed_entries() {
        let raw = r#"[
            {"period":"2025-1","closedAt":"2025-03-20T00:00:00Z","closedBy":"t1"},
            {"period":"2025-9","closedAt":"2025-06-01T00:00:00Z"},
            {"period":"2025-2"},
            {"bimester":"2025-2","closedAt":"2025-06-01 08:00:00"}
        ]"#;
        let closed = decode_closed_periods(Some(raw), "c1");
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].closed_by.as_deref(), Some("t1"));
        assert_eq!(closed[1].period.to_string(), "2025-2");
    }

    #[test]
    fn closed_periods_fall_back_to_empty() {
        assert!(decode_closed_periods(Some("oops"), "c1").is_empty());
        assert!(decode_closed_periods(Some(r#"{"period":"2025-1"}"#), "c1").is_empty());
        let wrapped = serde_json::to_string(r#"[{"period":"2025-1","closedAt":"2025-03-20T00:00:00Z"}]"#)
            .expect("encode");
        assert_eq!(decode_closed_periods(Some(&wrapped), "c1").len(), 1);
    }

    #[test]
    fn scale_config_accepts_both_shapes() {
        let bare = r#"[{"label":"Regular","minPercent":0},{"label":"Excelente","minPercent":"80"}]"#;
        let tiers = decode_scale_config(Some(bare), "c1");
        assert_eq!(tiers[0].label, "Excelente");
        assert_eq!(tiers[1].label, "Regular");

        let wrapped = r#"{"levels":[{"label":"Bien","minPercent":50}]}"#;
        assert_eq!(decode_scale_config(Some(wrapped), "c1").len(), 1);
        assert!(decode_scale_config(Some("42"), "c1").is_empty());
    }

    #[test]
    fn unknown_scale_type_defaults_to_letter() {
        assert_eq!(decode_scale_type(Some("SOMETHING"), "c1"), GradeScaleType::Letter);
        assert_eq!(decode_scale_type(None, "c1"), GradeScaleType::Letter);
        assert_eq!(decode_scale_type(Some("numeric"), "c1"), GradeScaleType::Numeric);
    }
}
