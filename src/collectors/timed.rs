use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

const COMPLETED_FLOOR: f64 = 70.0;
const PARTICIPATION_SCORE: f64 = 30.0;

/// Completion guarantees 70; an attempt that expired or was lost earns 30.
pub fn timed_score(completed: bool, points_awarded: f64, base_points: f64) -> f64 {
    if !completed {
        return PARTICIPATION_SCORE;
    }
    let ratio = if base_points > 0.0 {
        points_awarded / base_points * 100.0
    } else {
        0.0
    };
    ratio.max(COMPLETED_FLOOR).min(100.0)
}

pub struct TimedActivityCollector;

impl Collector for TimedActivityCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::TimedActivity
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        let mut stmt = conn.prepare(
            "SELECT r.activity_id, t.name, r.completed_at, r.points_awarded,
                    r.base_points, r.created_at, ac.weight
             FROM timed_activity_results r
             JOIN timed_activities t ON t.id = r.activity_id
             JOIN activity_competencies ac
               ON ac.activity_id = r.activity_id AND ac.activity_type = ?
             WHERE r.student_id = ? AND ac.classroom_id = ? AND ac.competency_id = ?
             ORDER BY r.created_at, r.id, ac.id",
        )?;
        let rows = stmt
            .query_map(
                (
                    self.family().link_type(),
                    query.student_id,
                    query.classroom_id,
                    query.competency_id,
                ),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, f64>(3)?,
                        r.get::<_, f64>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, f64>(6)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|row| query.window.contains_raw(&row.5))
            .map(
                |(activity_id, name, completed_at, points, base, _, weight)| ActivityScore {
                    activity_type: ActivityFamily::TimedActivity,
                    activity_id,
                    name,
                    score: timed_score(completed_at.is_some(), points, base),
                    weight,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_floor_and_cap() {
        assert_eq!(timed_score(true, 10.0, 10.0), 100.0);
        assert_eq!(timed_score(true, 2.0, 10.0), 70.0);
        assert_eq!(timed_score(true, 8.5, 10.0), 85.0);
        assert_eq!(timed_score(true, 15.0, 10.0), 100.0);
        assert_eq!(timed_score(true, 5.0, 0.0), 70.0);
    }

    #[test]
    fn unfinished_attempts_get_participation_credit() {
        assert_eq!(timed_score(false, 10.0, 10.0), 30.0);
        assert_eq!(timed_score(false, 0.0, 0.0), 30.0);
    }
}
