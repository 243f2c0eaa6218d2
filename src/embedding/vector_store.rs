//! Persistent vector store for semantic search.
//!
//! Stores chunk text alongside fixed-width embeddings in a SQLite table and
//! answers nearest-neighbour queries by exact Euclidean distance.

use std::path::Path;
use std::sync::Arc;

use crate::domain::{DocumentChunk, SearchResult};
use crate::storage::{queries, schema, vector, Database, DatabaseError, StoreLocation};

use super::error::{RagError, RagResult};
use super::provider::{Embedding, EmbeddingProvider};

/// Default number of results returned by a search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// SQLite-backed vector store.
///
/// Every vector in the store has exactly `dimension` components. The store is
/// unusable until [`VectorStore::initialize`] succeeds and again after
/// [`VectorStore::terminate`].
pub struct VectorStore {
    location: StoreLocation,
    table: String,
    dimension: usize,
    embedder: Arc<dyn EmbeddingProvider>,
    db: Option<Database>,
}

impl VectorStore {
    /// Creates an unopened store.
    ///
    /// Fails when `table` is not a plain identifier.
    pub fn new(
        location: StoreLocation,
        table: impl Into<String>,
        dimension: usize,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> RagResult<Self> {
        let table = table.into();
        if !schema::is_valid_table_name(&table) {
            return Err(RagError::Initialization(format!(
                "invalid table name {table:?}"
            )));
        }

        Ok(Self {
            location,
            table,
            dimension,
            embedder,
            db: None,
        })
    }

    /// Opens the backing database and prepares the records table.
    ///
    /// Idempotent. An existing table is reused as is; its vector width, as
    /// recorded in `store_meta` or fixed by its CHECK constraint, must match
    /// this store's. On failure nothing stays open.
    pub async fn initialize(&mut self) -> RagResult<()> {
        if self.db.is_some() {
            return Ok(());
        }

        if self.embedder.dimension() != self.dimension {
            return Err(RagError::Initialization(format!(
                "embedder produces {}-component vectors, store expects {}",
                self.embedder.dimension(),
                self.dimension
            )));
        }

        let db = self
            .location
            .open()
            .await
            .map_err(|e| RagError::Initialization(format!("cannot open {}: {e}", self.location)))?;

        let table = self.table.clone();
        let dimension = self.dimension;
        let prepared = db
            .with_conn(move |conn| {
                vector::register_distance_function(conn, dimension)?;
                conn.execute_batch(schema::CREATE_STORE_META)?;

                if !schema::table_exists(conn, &table)? {
                    conn.execute_batch(&schema::create_chunks_table(&table, dimension))?;
                    schema::record_dimension(conn, &table, dimension)?;
                    return Ok(true);
                }

                let existing = match schema::recorded_dimension(conn, &table)? {
                    Some(recorded) => recorded,
                    None => {
                        let declared = schema::declared_dimension(conn, &table)?.ok_or_else(|| {
                            DatabaseError::SchemaMismatch(format!(
                                "table {table} has no fixed-width embedding column"
                            ))
                        })?;
                        if declared == dimension {
                            schema::record_dimension(conn, &table, declared)?;
                        }
                        declared
                    }
                };

                if existing != dimension {
                    return Err(DatabaseError::SchemaMismatch(format!(
                        "table {table} holds {existing}-component vectors, expected {dimension}"
                    )));
                }
                Ok(false)
            })
            .await;

        match prepared {
            Ok(created) => {
                tracing::info!(
                    location = %self.location,
                    table = %self.table,
                    dimension = self.dimension,
                    created,
                    "Vector store initialized"
                );
                self.db = Some(db);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = db.close().await {
                    tracing::warn!(error = %close_err, "Failed to close store after init failure");
                }
                Err(RagError::Initialization(e.to_string()))
            }
        }
    }

    fn db(&self) -> RagResult<&Database> {
        self.db.as_ref().ok_or(RagError::NotInitialized)
    }

    fn check_dimension(&self, embedding: &Embedding) -> RagResult<()> {
        if embedding.dimension() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(())
    }

    /// Embeds and stores a chunk.
    pub async fn insert(&self, chunk: &DocumentChunk) -> RagResult<()> {
        self.db()?;

        let embedding = self
            .embedder
            .embed(&chunk.content)
            .await
            .map_err(|e| RagError::from_embedding(&chunk.content, e))?;

        self.insert_embedding(chunk, &embedding).await
    }

    /// Stores a chunk with a pre-computed embedding.
    pub async fn insert_embedding(&self, chunk: &DocumentChunk, embedding: &Embedding) -> RagResult<()> {
        let db = self.db()?;
        self.check_dimension(embedding)?;

        let table = self.table.clone();
        let chunk = chunk.clone();
        let blob = vector::encode(&embedding.values);

        db.with_conn(move |conn| Ok(queries::chunks::insert(conn, &table, &chunk, &blob)?))
            .await?;

        tracing::debug!(table = %self.table, "Inserted chunk");
        Ok(())
    }

    /// Embeds a batch of chunks and stores them in one transaction.
    ///
    /// Chunks the embedder yields no vector for (punctuation-only text, for
    /// instance) are skipped with a warning. Any other failure stores nothing.
    /// Returns how many chunks were written.
    pub async fn insert_all(&self, chunks: &[DocumentChunk]) -> RagResult<usize> {
        let db = self.db()?;

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = match self.embedder.embed(&chunk.content).await {
                Ok(embedding) => embedding,
                Err(e) => match RagError::from_embedding(&chunk.content, e) {
                    RagError::MissingEmbedding { content } => {
                        tracing::warn!(filepath = %chunk.filepath, ?content, "Skipping chunk without embedding");
                        continue;
                    }
                    other => return Err(other),
                },
            };
            self.check_dimension(&embedding)?;
            rows.push((chunk.clone(), vector::encode(&embedding.values)));
        }

        let table = self.table.clone();
        let stored = db
            .transaction(move |tx| {
                for (chunk, blob) in &rows {
                    queries::chunks::insert(tx, &table, chunk, blob)?;
                }
                Ok(rows.len())
            })
            .await?;

        tracing::debug!(table = %self.table, stored, skipped = chunks.len() - stored, "Inserted chunk batch");
        Ok(stored)
    }

    /// Returns up to `limit` stored chunks closest to `query`, nearest first.
    pub async fn search(&self, query: &str, limit: usize) -> RagResult<Vec<SearchResult>> {
        if limit == 0 {
            return Err(RagError::InvalidLimit);
        }
        let db = self.db()?;

        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RagError::from_embedding(query, e))?;
        self.check_dimension(&embedding)?;

        let table = self.table.clone();
        let blob = vector::encode(&embedding.values);
        let rows = db
            .with_conn(move |conn| Ok(queries::chunks::nearest(conn, &table, &blob, limit)?))
            .await?;

        tracing::debug!(results = rows.len(), limit, "Vector search complete");

        Ok(rows
            .into_iter()
            .map(|(content, distance)| SearchResult::from_distance(content, distance))
            .collect())
    }

    /// Number of stored chunks.
    pub async fn count(&self) -> RagResult<u64> {
        let table = self.table.clone();
        Ok(self
            .db()?
            .with_conn(move |conn| Ok(queries::chunks::count(conn, &table)?))
            .await?)
    }

    /// Distinct source paths of stored chunks.
    pub async fn filepaths(&self) -> RagResult<Vec<String>> {
        let table = self.table.clone();
        Ok(self
            .db()?
            .with_conn(move |conn| Ok(queries::chunks::filepaths(conn, &table)?))
            .await?)
    }

    /// Closes the backing database. Safe to call repeatedly.
    pub async fn terminate(&mut self) {
        if let Some(db) = self.db.take() {
            match db.close().await {
                Ok(()) => tracing::info!(location = %self.location, "Vector store closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to close vector store"),
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.db.is_some()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Backing file, if the store is file-based.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::InMemory => None,
        }
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("location", &self.location)
            .field("table", &self.table)
            .field("dimension", &self.dimension)
            .field("initialized", &self.db.is_some())
            .finish()
    }
}
