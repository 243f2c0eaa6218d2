//! Retrieval index: the embedding model plus the vector store behind one
//! lifecycle.
//!
//! The model is only loaded on [`RetrievalIndex::initialize`], so constructing
//! an index is cheap and never touches the network or disk.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{ConfigError, Settings};
use crate::domain::{DocumentChunk, SearchResult};
use crate::embedding::{
    EmbeddingLoader, RagError, RagResult, SettingsEmbeddingLoader, VectorStore,
    DEFAULT_SEARCH_LIMIT,
};
use crate::storage::{queries, schema, StoreLocation};

/// What a store holds on disk, read without loading the embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub location: String,
    pub table: String,
    /// Whether the records table exists yet.
    pub exists: bool,
    pub rows: u64,
    /// Vector width the table was created with.
    pub dimension: Option<usize>,
}

/// Embeds, stores and searches document chunks.
pub struct RetrievalIndex {
    loader: Arc<dyn EmbeddingLoader>,
    location: StoreLocation,
    table: String,
    dimension: usize,
    default_limit: usize,
    store: Option<VectorStore>,
}

impl RetrievalIndex {
    pub fn new(
        loader: Arc<dyn EmbeddingLoader>,
        location: StoreLocation,
        table: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            loader,
            location,
            table: table.into(),
            dimension,
            default_limit: DEFAULT_SEARCH_LIMIT,
            store: None,
        }
    }

    /// Builds an index from application settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let loader = Arc::new(SettingsEmbeddingLoader::new(settings.embedding.clone()));

        Ok(Self::new(
            loader,
            settings.storage.location()?,
            settings.storage.table_name.clone(),
            settings.embedding.dimension,
        )
        .with_default_limit(settings.search.default_limit))
    }

    /// Number of results [`RetrievalIndex::search`] returns when no limit is given.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Loads the embedding model and opens the store. Idempotent.
    ///
    /// On failure nothing is left loaded or open, and the call may be retried.
    pub async fn initialize(&mut self) -> RagResult<()> {
        if self.store.is_some() {
            return Ok(());
        }

        let embedder = self
            .loader
            .load()
            .await
            .map_err(|e| RagError::Initialization(format!("embedding model: {e}")))?;

        let mut store = VectorStore::new(
            self.location.clone(),
            self.table.clone(),
            self.dimension,
            embedder,
        )?;
        store.initialize().await?;

        self.store = Some(store);
        Ok(())
    }

    fn store(&self) -> RagResult<&VectorStore> {
        self.store.as_ref().ok_or(RagError::NotInitialized)
    }

    /// Embeds and stores one chunk.
    pub async fn insert(&self, chunk: &DocumentChunk) -> RagResult<()> {
        self.store()?.insert(chunk).await
    }

    /// Embeds and stores a batch of chunks atomically.
    ///
    /// Chunks without an embedding are skipped. Returns how many were stored;
    /// on error none of the batch is stored.
    pub async fn insert_all(&self, chunks: &[DocumentChunk]) -> RagResult<usize> {
        let stored = self.store()?.insert_all(chunks).await?;
        tracing::info!(stored, skipped = chunks.len() - stored, "Indexed chunks");
        Ok(stored)
    }

    /// Returns stored chunks nearest to `query`, closest first.
    ///
    /// `limit` defaults to the configured default (5 unless overridden).
    pub async fn search(&self, query: &str, limit: Option<usize>) -> RagResult<Vec<SearchResult>> {
        self.store()?
            .search(query, limit.unwrap_or(self.default_limit))
            .await
    }

    pub async fn count(&self) -> RagResult<u64> {
        self.store()?.count().await
    }

    pub async fn filepaths(&self) -> RagResult<Vec<String>> {
        self.store()?.filepaths().await
    }

    /// Closes the store and drops the model. Safe to call repeatedly.
    pub async fn terminate(&mut self) {
        if let Some(mut store) = self.store.take() {
            store.terminate().await;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    /// Reads the table's row count and vector width.
    ///
    /// Never creates the store: a missing file or table is reported as
    /// absent.
    pub async fn summary(&self) -> RagResult<StoreSummary> {
        let mut summary = StoreSummary {
            location: self.location.to_string(),
            table: self.table.clone(),
            exists: false,
            rows: 0,
            dimension: None,
        };

        let db = match (&self.store, &self.location) {
            (Some(_), StoreLocation::InMemory) => {
                summary.exists = true;
                summary.rows = self.count().await?;
                summary.dimension = Some(self.dimension);
                return Ok(summary);
            }
            (None, StoreLocation::InMemory) => return Ok(summary),
            (_, StoreLocation::File(path)) if !path.exists() => return Ok(summary),
            (_, location) => location.open().await?,
        };

        let table = self.table.clone();
        let read = db
            .with_conn(move |conn| {
                if !schema::table_exists(conn, &table)? {
                    return Ok(None);
                }
                let rows = queries::chunks::count(conn, &table)?;
                let recorded = if schema::table_exists(conn, schema::STORE_META_TABLE)? {
                    schema::recorded_dimension(conn, &table)?
                } else {
                    None
                };
                let dimension = match recorded {
                    Some(d) => Some(d),
                    None => schema::declared_dimension(conn, &table)?,
                };
                Ok(Some((rows, dimension)))
            })
            .await;

        if let Err(e) = db.close().await {
            tracing::warn!(error = %e, "Failed to close store after summary");
        }

        if let Some((rows, dimension)) = read? {
            summary.exists = true;
            summary.rows = rows;
            summary.dimension = dimension;
        }
        Ok(summary)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl std::fmt::Debug for RetrievalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalIndex")
            .field("location", &self.location)
            .field("table", &self.table)
            .field("dimension", &self.dimension)
            .field("initialized", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
