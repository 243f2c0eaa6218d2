//! Chunk record queries.
//!
//! Every value reaches SQLite as a bound parameter. The table name is the
//! only interpolated fragment and is validated when the store is configured.

use rusqlite::{params, Connection, Result};

use crate::domain::DocumentChunk;

/// Inserts a chunk with its encoded embedding.
pub fn insert(conn: &Connection, table: &str, chunk: &DocumentChunk, embedding: &[u8]) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO {table} (content, filepath, embedding) VALUES (?1, ?2, ?3)"),
        params![chunk.content, chunk.filepath, embedding],
    )?;
    Ok(())
}

/// Returns up to `limit` `(content, distance)` pairs ordered by ascending
/// distance to `query`.
///
/// Requires `array_distance` to be registered on the connection.
pub fn nearest(
    conn: &Connection,
    table: &str,
    query: &[u8],
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT content, array_distance(embedding, ?1) AS similarity_score
         FROM {table}
         ORDER BY similarity_score
         LIMIT ?2"
    ))?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![query, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;

    rows.collect()
}

/// Counts stored chunks.
pub fn count(conn: &Connection, table: &str) -> Result<u64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|n| n.max(0) as u64)
}

/// Lists the distinct source paths that have been ingested.
pub fn filepaths(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT filepath FROM {table} ORDER BY filepath"
    ))?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{schema, vector};

    fn setup(dimension: usize) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&schema::create_chunks_table("chunks", dimension))
            .unwrap();
        vector::register_distance_function(&conn, dimension).unwrap();
        conn
    }

    #[test]
    fn insert_and_count() {
        let conn = setup(2);
        let chunk = DocumentChunk::new("hello", "a.txt");

        insert(&conn, "chunks", &chunk, &vector::encode(&[1.0, 0.0])).unwrap();
        insert(&conn, "chunks", &chunk, &vector::encode(&[0.0, 1.0])).unwrap();

        assert_eq!(count(&conn, "chunks").unwrap(), 2);
    }

    #[test]
    fn nearest_orders_by_distance() {
        let conn = setup(2);
        for (content, v) in [("far", [10.0, 10.0]), ("exact", [1.0, 0.0]), ("near", [1.0, 1.0])] {
            insert(
                &conn,
                "chunks",
                &DocumentChunk::new(content, "v.txt"),
                &vector::encode(&v),
            )
            .unwrap();
        }

        let results = nearest(&conn, "chunks", &vector::encode(&[1.0, 0.0]), 10).unwrap();
        let contents: Vec<_> = results.iter().map(|(c, _)| c.as_str()).collect();

        assert_eq!(contents, vec!["exact", "near", "far"]);
        assert_eq!(results[0].1, 0.0);
        assert!((results[1].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_respects_limit() {
        let conn = setup(1);
        for i in 0..10 {
            insert(
                &conn,
                "chunks",
                &DocumentChunk::new(format!("chunk-{i}"), "n.txt"),
                &vector::encode(&[i as f32]),
            )
            .unwrap();
        }

        let results = nearest(&conn, "chunks", &vector::encode(&[0.0]), 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "chunk-0");
    }

    #[test]
    fn nearest_on_empty_table() {
        let conn = setup(2);
        let results = nearest(&conn, "chunks", &vector::encode(&[1.0, 0.0]), 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn quotes_are_stored_verbatim() {
        let conn = setup(1);
        let chunk = DocumentChunk::new("it's a '); DROP TABLE chunks; --", "o'brien.txt");

        insert(&conn, "chunks", &chunk, &vector::encode(&[0.5])).unwrap();

        let results = nearest(&conn, "chunks", &vector::encode(&[0.5]), 1).unwrap();
        assert_eq!(results[0].0, chunk.content);
        assert_eq!(filepaths(&conn, "chunks").unwrap(), vec!["o'brien.txt"]);
    }
}
