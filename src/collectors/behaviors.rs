use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

const MIN_WEIGHT: f64 = 30.0;
const MAX_WEIGHT: f64 = 100.0;

/// Score and weight of the single synthesized behavior entry.
///
/// `None` when no XP at all was logged in the window.
pub fn behavior_entry(positive_xp: f64, negative_xp: f64) -> Option<(f64, f64)> {
    let total = positive_xp + negative_xp;
    if total <= 0.0 {
        return None;
    }
    let score = if negative_xp <= 0.0 {
        100.0
    } else if positive_xp <= 0.0 {
        0.0
    } else {
        (positive_xp / total * 100.0).round()
    };
    let weight = (total / 10.0).round().clamp(MIN_WEIGHT, MAX_WEIGHT);
    Some((score, weight))
}

pub struct BehaviorCollector;

impl Collector for BehaviorCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::Behavior
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        let mut stmt = conn.prepare(
            "SELECT b.is_positive, b.xp_value, pl.created_at
             FROM point_logs pl
             JOIN behaviors b ON b.id = pl.behavior_id
             WHERE pl.student_id = ? AND pl.classroom_id = ?
               AND b.classroom_id = ? AND b.competency_id = ?
             ORDER BY pl.created_at, pl.id",
        )?;
        let rows = stmt
            .query_map(
                (
                    query.student_id,
                    query.classroom_id,
                    query.classroom_id,
                    query.competency_id,
                ),
                |r| {
                    Ok((
                        r.get::<_, i64>(0)? != 0,
                        r.get::<_, f64>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut positive_xp = 0.0_f64;
        let mut negative_xp = 0.0_f64;
        for (is_positive, xp_value, created_at) in rows {
            if !query.window.contains_raw(&created_at) {
                continue;
            }
            // Definitions may store negative behaviors with a signed value.
            if is_positive {
                positive_xp += xp_value.abs();
            } else {
                negative_xp += xp_value.abs();
            }
        }

        let Some((score, weight)) = behavior_entry(positive_xp, negative_xp) else {
            return Ok(Vec::new());
        };
        tracing::trace!(
            competency_id = query.competency_id,
            positive_xp,
            negative_xp,
            score,
            weight,
            "behavior pooled"
        );
        Ok(vec![ActivityScore {
            activity_type: ActivityFamily::Behavior,
            activity_id: query.competency_id.to_string(),
            name: "Behavior".to_string(),
            score,
            weight,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_behavior_scenario() {
        // +10 XP three times, -5 XP once.
        assert_eq!(behavior_entry(30.0, 5.0), Some((86.0, 30.0)));
    }

    #[test]
    fn one_sided_behavior() {
        assert_eq!(behavior_entry(40.0, 0.0), Some((100.0, 30.0)));
        assert_eq!(behavior_entry(0.0, 20.0), Some((0.0, 30.0)));
        assert_eq!(behavior_entry(0.0, 0.0), None);
    }

    #[test]
    fn weight_grows_with_volume_and_is_bounded() {
        assert_eq!(behavior_entry(500.0, 0.0).map(|e| e.1), Some(50.0));
        assert_eq!(behavior_entry(5000.0, 1000.0).map(|e| e.1), Some(100.0));
    }
}
