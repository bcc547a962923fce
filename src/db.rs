use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "competency.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            use_competencies INTEGER NOT NULL DEFAULT 0,
            grade_scale_type TEXT,
            grade_scale_config TEXT,
            current_bimester TEXT,
            closed_bimesters TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_students(
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(classroom_id, student_id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classroom_students_student ON classroom_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS competencies(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_competencies(
            classroom_id TEXT NOT NULL,
            competency_id TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(classroom_id, competency_id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(competency_id) REFERENCES competencies(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_competencies(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            activity_type TEXT NOT NULL,
            activity_id TEXT NOT NULL,
            competency_id TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 100,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(competency_id) REFERENCES competencies(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_competencies_lookup
         ON activity_competencies(classroom_id, competency_id, activity_type)",
        [],
    )?;

    create_activity_tables(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS competency_grades(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            competency_id TEXT NOT NULL,
            period TEXT NOT NULL,
            score REAL NOT NULL,
            grade_label TEXT NOT NULL,
            breakdown TEXT NOT NULL,
            activities_count INTEGER NOT NULL DEFAULT 0,
            is_manual_override INTEGER NOT NULL DEFAULT 0,
            manual_score REAL,
            manual_note TEXT,
            calculated_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(competency_id) REFERENCES competencies(id),
            UNIQUE(classroom_id, student_id, competency_id, period)
        )",
        [],
    )?;
    ensure_competency_grades_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_competency_grades_classroom_period
         ON competency_grades(classroom_id, period)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_competency_grades_student_period
         ON competency_grades(student_id, period)",
        [],
    )?;

    Ok(conn)
}

// Activity tables are owned by the gamification subsystems; the engine only reads them.
// They are created here so a fresh workspace is self-contained.
fn create_activity_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS missions(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_missions(
            id TEXT PRIMARY KEY,
            mission_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            current_progress REAL NOT NULL DEFAULT 0,
            target_progress REAL NOT NULL DEFAULT 1,
            assigned_at TEXT NOT NULL,
            FOREIGN KEY(mission_id) REFERENCES missions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_missions_student ON student_missions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timed_activities(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timed_activity_results(
            id TEXT PRIMARY KEY,
            activity_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            completed_at TEXT,
            points_awarded REAL NOT NULL DEFAULT 0,
            base_points REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(activity_id) REFERENCES timed_activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timed_activity_results_student
         ON timed_activity_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tournaments(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tournament_participants(
            id TEXT PRIMARY KEY,
            tournament_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            final_position INTEGER,
            max_participants INTEGER NOT NULL DEFAULT 0,
            joined_at TEXT NOT NULL,
            FOREIGN KEY(tournament_id) REFERENCES tournaments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tournament_participants_student
         ON tournament_participants(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expeditions(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS expedition_progress(
            id TEXT PRIMARY KEY,
            expedition_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(expedition_id) REFERENCES expeditions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expedition_progress_student
         ON expedition_progress(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS behaviors(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_positive INTEGER NOT NULL,
            xp_value REAL NOT NULL DEFAULT 0,
            competency_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS point_logs(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            behavior_id TEXT,
            points REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_logs_student ON point_logs(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS badges(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL,
            rarity TEXT NOT NULL DEFAULT 'COMMON',
            competency_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_badges(
            id TEXT PRIMARY KEY,
            badge_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            unlocked_at TEXT NOT NULL,
            FOREIGN KEY(badge_id) REFERENCES badges(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_badges_student ON student_badges(student_id)",
        [],
    )?;
    Ok(())
}

fn ensure_competency_grades_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "competency_grades", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE competency_grades ADD COLUMN updated_at TEXT", [])?;
    // Rows written before the column existed were last touched when calculated.
    conn.execute(
        "UPDATE competency_grades SET updated_at = calculated_at WHERE updated_at IS NULL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("{}-{}", prefix, nanos))
    }

    #[test]
    fn open_db_is_idempotent_and_has_grade_columns() {
        let ws = temp_workspace("competencyd-db-open");
        let conn = open_db(&ws).expect("first open");
        assert!(table_has_column(&conn, "competency_grades", "updated_at").expect("pragma"));
        drop(conn);
        let conn = open_db(&ws).expect("second open");
        assert!(table_has_column(&conn, "competency_grades", "manual_note").expect("pragma"));
        assert!(!table_has_column(&conn, "competency_grades", "nope").expect("pragma"));
    }
}
