//! Database query modules.
//!
//! Each module provides plain functions over a borrowed connection; callers
//! run them inside [`Database::with_conn`](super::Database::with_conn).

pub mod chunks;
