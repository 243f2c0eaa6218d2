//! Fixed-width float vector columns.
//!
//! SQLite has no array type, so a `FLOAT[D]` column is stored as a BLOB of
//! exactly `4 * D` little-endian `f32` bytes. Distances are computed in SQL by
//! the `array_distance(a, b)` scalar function, which rejects any operand that
//! is not exactly `D` components wide.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use thiserror::Error;

/// Name of the SQL distance function registered on store connections.
pub const DISTANCE_FUNCTION: &str = "array_distance";

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Errors from decoding or comparing vector blobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorCodecError {
    #[error("expected a FLOAT[{expected}] vector, got {actual_bytes} bytes")]
    Width { expected: usize, actual_bytes: usize },

    #[error("vector operand is not a BLOB")]
    NotABlob,
}

/// Encodes a vector as a little-endian `f32` blob.
pub fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Byte length of a `FLOAT[dimension]` blob.
pub fn byte_width(dimension: usize) -> usize {
    dimension * F32_BYTES
}

fn check_width(bytes: &[u8], dimension: usize) -> Result<(), VectorCodecError> {
    if bytes.len() != byte_width(dimension) {
        return Err(VectorCodecError::Width {
            expected: dimension,
            actual_bytes: bytes.len(),
        });
    }
    Ok(())
}

/// Euclidean distance between two encoded vectors of width `dimension`.
pub fn blob_distance(a: &[u8], b: &[u8], dimension: usize) -> Result<f64, VectorCodecError> {
    check_width(a, dimension)?;
    check_width(b, dimension)?;

    let sum: f64 = a
        .chunks_exact(F32_BYTES)
        .zip(b.chunks_exact(F32_BYTES))
        .map(|(x, y)| {
            let x = f32::from_le_bytes([x[0], x[1], x[2], x[3]]) as f64;
            let y = f32::from_le_bytes([y[0], y[1], y[2], y[3]]) as f64;
            (x - y) * (x - y)
        })
        .sum();

    Ok(sum.sqrt())
}

/// Registers `array_distance(a, b)` for vectors of width `dimension`.
///
/// Both operands must be BLOBs of exactly `4 * dimension` bytes; anything
/// else fails the statement rather than being coerced.
pub fn register_distance_function(conn: &Connection, dimension: usize) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        DISTANCE_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|_| user_error(VectorCodecError::NotABlob))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|_| user_error(VectorCodecError::NotABlob))?;
            blob_distance(a, b, dimension).map_err(user_error)
        },
    )
}

fn user_error(e: VectorCodecError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_fixed_width() {
        let blob = encode(&[1.0, -2.5, 0.0]);
        assert_eq!(blob.len(), byte_width(3));
        assert_eq!(&blob[4..8], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn distance_rejects_wrong_width() {
        let short = encode(&[1.0, 2.0]);
        let full = encode(&[1.0, 2.0, 3.0]);
        let err = blob_distance(&short, &full, 3).unwrap_err();
        assert_eq!(
            err,
            VectorCodecError::Width {
                expected: 3,
                actual_bytes: 8
            }
        );
    }

    #[test]
    fn blob_distance_is_euclidean() {
        let a = encode(&[0.0, 0.0]);
        let b = encode(&[3.0, 4.0]);
        let distance = blob_distance(&a, &b, 2).unwrap();
        assert!((distance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sql_function_computes_distance() {
        let conn = Connection::open_in_memory().unwrap();
        register_distance_function(&conn, 2).unwrap();

        let distance: f64 = conn
            .query_row(
                "SELECT array_distance(?1, ?2)",
                [encode(&[1.0, 1.0]), encode(&[1.0, 1.0])],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(distance, 0.0);
    }

    #[test]
    fn sql_function_rejects_mismatched_width() {
        let conn = Connection::open_in_memory().unwrap();
        register_distance_function(&conn, 2).unwrap();

        let result: rusqlite::Result<f64> = conn.query_row(
            "SELECT array_distance(?1, ?2)",
            [encode(&[1.0, 1.0]), encode(&[1.0, 1.0, 1.0])],
            |row| row.get(0),
        );

        assert!(result.is_err());
    }

    #[test]
    fn sql_function_rejects_non_blob() {
        let conn = Connection::open_in_memory().unwrap();
        register_distance_function(&conn, 1).unwrap();

        let result: rusqlite::Result<f64> =
            conn.query_row("SELECT array_distance('[1.0]', '[1.0]')", [], |row| {
                row.get(0)
            });

        assert!(result.is_err());
    }
}
