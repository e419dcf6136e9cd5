use rusqlite::Connection;

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS slots (
            name TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
}

pub const SELECT_PAYLOAD: &str = "SELECT payload FROM slots WHERE name = ?1";

pub const UPSERT_PAYLOAD: &str = "INSERT INTO slots (name, payload, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(name) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at";
