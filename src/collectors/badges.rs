use super::{ActivityFamily, ActivityScore, CollectQuery, Collector};
use crate::calc::CalcError;
use rusqlite::Connection;

pub fn rarity_weight(rarity: &str) -> f64 {
    match rarity.trim().to_ascii_uppercase().as_str() {
        "LEGENDARY" => 100.0,
        "EPIC" => 80.0,
        "RARE" => 60.0,
        _ => 40.0,
    }
}

pub struct BadgeCollector;

impl Collector for BadgeCollector {
    fn family(&self) -> ActivityFamily {
        ActivityFamily::Badge
    }

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError> {
        let mut stmt = conn.prepare(
            "SELECT sb.badge_id, b.name, b.rarity, sb.unlocked_at
             FROM student_badges sb
             JOIN badges b ON b.id = sb.badge_id
             WHERE sb.student_id = ? AND b.classroom_id = ? AND b.competency_id = ?
             ORDER BY sb.unlocked_at, sb.id",
        )?;
        let rows = stmt
            .query_map(
                (query.student_id, query.classroom_id, query.competency_id),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|row| query.window.contains_raw(&row.3))
            .map(|(badge_id, name, rarity, _)| ActivityScore {
                activity_type: ActivityFamily::Badge,
                activity_id: badge_id,
                name,
                score: 100.0,
                weight: rarity_weight(&rarity),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarity_tiers() {
        assert_eq!(rarity_weight("LEGENDARY"), 100.0);
        assert_eq!(rarity_weight("epic"), 80.0);
        assert_eq!(rarity_weight("Rare"), 60.0);
        assert_eq!(rarity_weight("COMMON"), 40.0);
        assert_eq!(rarity_weight("mythic"), 40.0);
    }
}
