use rusqlite::Connection;

/// Schema files in application order; every statement uses IF NOT EXISTS
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "00_drone_position_events.sql",
        include_str!("../../sql/00_drone_position_events.sql"),
    ),
    (
        "01_target_acquisition_events.sql",
        include_str!("../../sql/01_target_acquisition_events.sql"),
    ),
];

/// Enable WAL and create both event tables if they do not exist yet
///
/// Safe to run on every startup.
pub fn run_schema_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    log::info!("🔧 Running schema migrations");
    for (filename, sql) in MIGRATIONS {
        log::info!("   ├─ Executing: {}", filename);
        conn.execute_batch(sql)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }
    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}
