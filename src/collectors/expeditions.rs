use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

pub fn expedition_score(is_completed: bool) -> f64 {
    if is_completed {
        100.0
    } else {
        60.0
    }
}

pub struct ExpeditionCollector;

impl Collector for ExpeditionCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::Expedition
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        let mut stmt = conn.prepare(
            "SELECT ep.expedition_id, e.name, ep.is_completed, ep.updated_at, ac.weight
             FROM expedition_progress ep
             JOIN expeditions e ON e.id = ep.expedition_id
             JOIN activity_competencies ac
               ON ac.activity_id = ep.expedition_id AND ac.activity_type = ?
             WHERE ep.student_id = ? AND ac.classroom_id = ? AND ac.competency_id = ?
             ORDER BY ep.updated_at, ep.id, ac.id",
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
                        r.get::<_, i64>(2)? != 0,
                        r.get::<_, String>(3)?,
                        r.get::<_, f64>(4)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|row| query.window.contains_raw(&row.3))
            .map(
                |(expedition_id, name, completed, _, weight)| ActivityScore {
                    activity_type: ActivityFamily::Expedition,
                    activity_id: expedition_id,
                    name,
                    score: expedition_score(completed),
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
    fn expedition_is_binary() {
        assert_eq!(expedition_score(true), 100.0);
        assert_eq!(expedition_score(false), 60.0);
    }
}
