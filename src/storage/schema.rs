//! SQL schema for the chunk store.
//!
//! The records table name and vector width are chosen per store, so the
//! CREATE statement is built at runtime. The table name is validated as a
//! plain identifier before it is ever placed into SQL text.

use rusqlite::{params, Connection, OptionalExtension};

use super::vector;

/// Default name of the records table.
pub const DEFAULT_TABLE: &str = "chunks";

/// Prefix of the `store_meta` key holding a table's vector width.
pub const DIMENSION_KEY_PREFIX: &str = "embedding_dimension:";

/// Name of the store metadata table.
pub const STORE_META_TABLE: &str = "store_meta";

/// SQL to create the store metadata table.
pub const CREATE_STORE_META: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Returns whether `name` is safe to use as an unquoted table identifier.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit,
/// and rejects the `sqlite_` reserved prefix.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.to_ascii_lowercase().starts_with("sqlite_")
}

/// SQL to create a records table with a `FLOAT[dimension]` embedding column.
///
/// `table` must already have passed [`is_valid_table_name`].
pub fn create_chunks_table(table: &str, dimension: usize) -> String {
    format!(
        "CREATE TABLE {table} (
            content TEXT NOT NULL,
            filepath TEXT NOT NULL,
            embedding BLOB NOT NULL CHECK (length(embedding) = {width})
        )",
        width = vector::byte_width(dimension),
    )
}

/// Checks whether a table exists without touching its contents.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )
}

fn dimension_key(table: &str) -> String {
    format!("{DIMENSION_KEY_PREFIX}{table}")
}

/// Reads the vector width recorded for `table`, if any.
pub fn recorded_dimension(conn: &Connection, table: &str) -> rusqlite::Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![dimension_key(table)],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| v.parse().ok()))
}

/// Records the vector width for `table`.
pub fn record_dimension(conn: &Connection, table: &str, dimension: usize) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?1, ?2)",
        params![dimension_key(table), dimension.to_string()],
    )?;
    Ok(())
}

/// Reads the vector width fixed by `table`'s CHECK constraint.
///
/// Returns `None` when the table is missing or was not created by
/// [`create_chunks_table`].
pub fn declared_dimension(conn: &Connection, table: &str) -> rusqlite::Result<Option<usize>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;

    Ok(sql.as_deref().and_then(parse_declared_width).and_then(|width| {
        (width % 4 == 0).then_some(width / 4)
    }))
}

fn parse_declared_width(sql: &str) -> Option<usize> {
    let (_, rest) = sql.split_once("length(embedding) =")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_validation() {
        assert!(is_valid_table_name("chunks"));
        assert!(is_valid_table_name("_notes_2024"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("1chunks"));
        assert!(!is_valid_table_name("chunks; DROP TABLE x"));
        assert!(!is_valid_table_name("chunks'"));
        assert!(!is_valid_table_name("sqlite_master"));
    }

    #[test]
    fn create_table_fixes_vector_width() {
        let sql = create_chunks_table("chunks", 256);
        assert!(sql.contains("CREATE TABLE chunks"));
        assert!(sql.contains("length(embedding) = 1024"));
    }

    #[test]
    fn table_exists_tracks_creation() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!table_exists(&conn, "chunks").unwrap());

        conn.execute_batch(&create_chunks_table("chunks", 4)).unwrap();
        assert!(table_exists(&conn, "chunks").unwrap());
    }

    #[test]
    fn dimension_round_trips_through_meta() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_STORE_META).unwrap();

        assert_eq!(recorded_dimension(&conn, "chunks").unwrap(), None);
        record_dimension(&conn, "chunks", 384).unwrap();
        record_dimension(&conn, "notes", 32).unwrap();
        assert_eq!(recorded_dimension(&conn, "chunks").unwrap(), Some(384));
        assert_eq!(recorded_dimension(&conn, "notes").unwrap(), Some(32));
    }

    #[test]
    fn declared_dimension_reads_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(declared_dimension(&conn, "chunks").unwrap(), None);

        conn.execute_batch(&create_chunks_table("chunks", 96)).unwrap();
        assert_eq!(declared_dimension(&conn, "chunks").unwrap(), Some(96));

        conn.execute_batch("CREATE TABLE plain (content TEXT)").unwrap();
        assert_eq!(declared_dimension(&conn, "plain").unwrap(), None);
    }

    #[test]
    fn check_constraint_rejects_wrong_width() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&create_chunks_table("chunks", 2)).unwrap();

        let result = conn.execute(
            "INSERT INTO chunks (content, filepath, embedding) VALUES (?1, ?2, ?3)",
            params!["text", "a.txt", vector::encode(&[1.0, 2.0, 3.0])],
        );
        assert!(result.is_err());
    }
}
