//! Activity score collectors.
//!
//! Each collector reads one activity family for a student inside a period window and
//! normalizes what it finds into `(score 0..=100, weight)` entries. The aggregator only
//! ever sees [`ActivityScore`] values, so adding a family means adding a collector here.

mod badges;
mod behaviors;
mod expeditions;
mod missions;
mod timed;
mod tournaments;

use crate::calc::CalcError;
use crate::period::PeriodWindow;
use rusqlite::Connection;
use serde::Serialize;

pub use badges::BadgeCollector;
pub use behaviors::BehaviorCollector;
pub use expeditions::ExpeditionCollector;
pub use missions::MissionCollector;
pub use timed::TimedActivityCollector;
pub use tournaments::TournamentCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityFamily {
    Mission,
    TimedActivity,
    Tournament,
    Expedition,
    Behavior,
    Badge,
}

impl ActivityFamily {
    /// Value of `activity_competencies.activity_type` for linked families.
    pub fn link_type(self) -> &'static str {
        match self {
            Self::Mission => "MISSION",
            Self::TimedActivity => "TIMED_ACTIVITY",
            Self::Tournament => "TOURNAMENT",
            Self::Expedition => "EXPEDITION",
            Self::Behavior => "BEHAVIOR",
            Self::Badge => "BADGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityScore {
    pub activity_type: ActivityFamily,
    pub activity_id: String,
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectQuery<'a> {
    pub student_id: &'a str,
    pub competency_id: &'a str,
    pub classroom_id: &'a str,
    pub window: PeriodWindow,
}

pub trait Collector {
    fn family(&self) -> ActivityFamily;

    fn collect(
        &self,
        conn: &Connection,
        query: &CollectQuery<'_>,
    ) -> Result<Vec<ActivityScore>, CalcError>;
}

pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(MissionCollector),
        Box::new(TimedActivityCollector),
        Box::new(TournamentCollector),
        Box::new(ExpeditionCollector),
        Box::new(BehaviorCollector),
        Box::new(BadgeCollector),
    ]
}

/// Runs every collector in order and concatenates their entries.
pub fn collect_all(
    collectors: &[Box<dyn Collector>],
    conn: &Connection,
    query: &CollectQuery<'_>,
) -> Result<Vec<ActivityScore>, CalcError> {
    let mut out = Vec::new();
    for c in collectors {
        let entries = c.collect(conn, query)?;
        tracing::trace!(
            family = c.family().link_type(),
            competency_id = query.competency_id,
            count = entries.len(),
            "collected"
        );
        out.extend(entries);
    }
    Ok(out)
}
