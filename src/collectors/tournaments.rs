use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

const LAST_PLACE_FLOOR: f64 = 50.0;

/// First place scores 100, last place 50, linear in between.
pub fn tournament_score(position: i64, max_participants: i64) -> f64 {
    if max_participants <= 1 {
        return 100.0;
    }
    let position = position.clamp(1, max_participants);
    let span = (max_participants - 1) as f64;
    let score = 100.0 - ((position - 1) as f64 / span) * 50.0;
    score.max(LAST_PLACE_FLOOR)
}

pub struct TournamentCollector;

impl Collector for TournamentCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::Tournament
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        // Standings without a final position are still running and do not count yet.
        let mut stmt = conn.prepare(
            "SELECT p.tournament_id, t.name, p.final_position, p.max_participants,
                    p.joined_at, ac.weight
             FROM tournament_participants p
             JOIN tournaments t ON t.id = p.tournament_id
             JOIN activity_competencies ac
               ON ac.activity_id = p.tournament_id AND ac.activity_type = ?
             WHERE p.student_id = ? AND ac.classroom_id = ? AND ac.competency_id = ?
               AND p.final_position IS NOT NULL
             ORDER BY p.joined_at, p.id, ac.id",
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
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, f64>(5)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|row| query.window.contains_raw(&row.4))
            .map(
                |(tournament_id, name, position, max, _, weight)| ActivityScore {
                    activity_type: ActivityFamily::Tournament,
                    activity_id: tournament_id,
                    name,
                    score: tournament_score(position, max),
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
    fn placement_is_linear_between_100_and_50() {
        assert_eq!(tournament_score(1, 5), 100.0);
        assert_eq!(tournament_score(3, 5), 75.0);
        assert_eq!(tournament_score(5, 5), 50.0);
    }

    #[test]
    fn degenerate_brackets_do_not_panic() {
        assert_eq!(tournament_score(1, 1), 100.0);
        assert_eq!(tournament_score(1, 0), 100.0);
        assert_eq!(tournament_score(9, 5), 50.0);
        assert_eq!(tournament_score(0, 5), 100.0);
    }
}
