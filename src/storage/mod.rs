//! Persistent storage for chunk records.
//!
//! This module provides the SQLite layer underneath the vector store:
//!
//! - [`Database`] - async-safe connection handle (operations run via
//!   `tokio::task::spawn_blocking`)
//! - [`schema`] - records table and store metadata definitions
//! - [`vector`] - fixed-width `FLOAT[D]` blob codec and the `array_distance`
//!   SQL function
//! - [`queries`] - parameterised statements over a connection

mod database;
pub mod queries;
pub mod schema;
pub mod vector;

pub use database::{Database, DatabaseError, Result};

use std::path::PathBuf;

/// File name of the store inside the data directory.
pub const DB_FILENAME: &str = "hearth.db";

/// Where a store keeps its backing database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A persistent file, created on first open.
    File(PathBuf),
    /// A private in-memory database that disappears on terminate.
    InMemory,
}

impl StoreLocation {
    /// Opens a connection at this location.
    pub async fn open(&self) -> Result<Database> {
        match self {
            Self::File(path) => Database::open(path).await,
            Self::InMemory => Database::open_in_memory().await,
        }
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::InMemory => f.write_str(":memory:"),
        }
    }
}
