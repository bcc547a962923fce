use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

/// Objectives below half of their target are not surfaced at all.
const MIN_PARTIAL_RATIO: f64 = 50.0;

pub fn mission_score(status: &str, current_progress: f64, target_progress: f64) -> Option<f64> {
    if status.trim().eq_ignore_ascii_case("completed") {
        return Some(100.0);
    }
    if target_progress <= 0.0 {
        return None;
    }
    let ratio = current_progress / target_progress * 100.0;
    if ratio >= MIN_PARTIAL_RATIO {
        Some(ratio.min(100.0))
    } else {
        None
    }
}

pub struct MissionCollector;

impl Collector for MissionCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::Mission
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        let mut stmt = conn.prepare(
            "SELECT sm.mission_id, m.name, sm.status, sm.current_progress,
                    sm.target_progress, sm.assigned_at, ac.weight
             FROM student_missions sm
             JOIN missions m ON m.id = sm.mission_id
             JOIN activity_competencies ac
               ON ac.activity_id = sm.mission_id AND ac.activity_type = ?
             WHERE sm.student_id = ? AND ac.classroom_id = ? AND ac.competency_id = ?
             ORDER BY sm.assigned_at, sm.id, ac.id",
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
                        r.get::<_, String>(2)?,
                        r.get::<_, f64>(3)?,
                        r.get::<_, f64>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, f64>(6)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (mission_id, name, status, current, target, assigned_at, weight) in rows {
            if !query.window.contains_raw(&assigned_at) {
                continue;
            }
            let Some(score) = mission_score(&status, current, target) else {
                continue;
            };
            out.push(ActivityScore {
                activity_type: ActivityFamily::Mission,
                activity_id: mission_id,
                name,
                score,
                weight,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_missions_score_full() {
        assert_eq!(mission_score("completed", 0.0, 10.0), Some(100.0));
        assert_eq!(mission_score("COMPLETED", 3.0, 0.0), Some(100.0));
    }

    #[test]
    fn partial_progress_needs_half() {
        assert_eq!(mission_score("in_progress", 5.0, 10.0), Some(50.0));
        assert_eq!(mission_score("in_progress", 7.5, 10.0), Some(75.0));
        assert_eq!(mission_score("in_progress", 4.9, 10.0), None);
        assert_eq!(mission_score("in_progress", 12.0, 10.0), Some(100.0));
        assert_eq!(mission_score("assigned", 1.0, 0.0), None);
    }
}
