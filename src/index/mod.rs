//! Persistent semantic index over the document corpus
//!
//! The index is built once from the corpus and stored as a `SQLite` database
//! with a `sqlite-vec` table for the chunk embeddings. Once the database file
//! exists it is authoritative: later starts open it without reading the
//! corpus again.

pub mod chunker;
pub mod corpus;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

pub use chunker::{ChunkConfig, Chunker};
pub use corpus::{Document, DocumentCorpus};
pub use schema::{IndexMeta, SCHEMA_VERSION};

use crate::config::IndexConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::{Error, Result};

/// File name of the persisted index inside the persist directory
pub const INDEX_FILE: &str = "index.db";

/// Suffix of the file a build writes before renaming it into place
const PARTIAL_SUFFIX: &str = "partial";

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension for all new connections
///
/// Safe to call multiple times; only the first call has any effect.
#[allow(unsafe_code)]
pub(crate) fn register_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the entry point exported by the
        // sqlite-vec crate for use with `sqlite3_auto_extension`; the
        // transmute only restores the signature that API expects.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut i8,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> i32,
            >(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Read-only connection pool over a persisted index
type IndexPool = Pool<SqliteConnectionManager>;

/// Shared handle to the index
pub type IndexHandle = Arc<SemanticIndex>;

/// Parameters for a first-time build
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Chunking parameters
    pub chunk: ChunkConfig,
    /// Texts per embedding request
    pub embed_batch_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            embed_batch_size: 32,
        }
    }
}

impl From<&IndexConfig> for BuildOptions {
    fn from(config: &IndexConfig) -> Self {
        Self {
            chunk: ChunkConfig {
                target_chars: config.chunk_size,
                overlap_chars: config.chunk_overlap,
            },
            embed_batch_size: config.embed_batch_size.max(1),
        }
    }
}

/// How the index came to be available in this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Built from the corpus during this start
    Built,
    /// Opened from persisted storage
    Loaded,
}

/// A chunk returned by a similarity query
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// Chunk identifier
    pub id: String,
    /// Source path of the owning document
    pub source: String,
    /// Position of the chunk within its document
    pub ordinal: usize,
    /// Chunk text
    pub text: String,
    /// Vector distance to the query (lower is closer)
    pub distance: f64,
    /// Similarity in `(0, 1]` (higher is closer)
    pub score: f64,
}

/// Read-only semantic index
pub struct SemanticIndex {
    pool: IndexPool,
    embedder: Arc<dyn EmbeddingProvider>,
    meta: IndexMeta,
    origin: IndexOrigin,
    path: PathBuf,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("path", &self.path)
            .field("origin", &self.origin)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Open the persisted index, or build it from the corpus if none exists
///
/// # Errors
///
/// Returns error if the corpus cannot be read, embedding fails, the persist
/// directory is unwritable, or the persisted index is corrupt or
/// incompatible with `embedder`
pub async fn ensure_index(
    corpus_path: &Path,
    persist_path: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<IndexHandle> {
    ensure_index_with(corpus_path, persist_path, embedder, &BuildOptions::default()).await
}

/// [`ensure_index`] with explicit build parameters
///
/// # Errors
///
/// See [`ensure_index`]
pub async fn ensure_index_with(
    corpus_path: &Path,
    persist_path: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    options: &BuildOptions,
) -> Result<IndexHandle> {
    register_sqlite_vec();

    let db_path = persist_path.join(INDEX_FILE);
    let origin = if db_path.is_file() {
        tracing::info!(path = %db_path.display(), "loading persisted index");
        IndexOrigin::Loaded
    } else {
        tracing::info!(
            corpus = %corpus_path.display(),
            path = %db_path.display(),
            "no persisted index, building from corpus"
        );
        build(corpus_path, persist_path, embedder.as_ref(), options).await?;
        IndexOrigin::Built
    };

    let index = SemanticIndex::open(&db_path, embedder, origin)?;
    tracing::info!(
        origin = ?index.origin,
        chunks = index.meta.chunk_count,
        documents = index.meta.document_count,
        model = %index.meta.embedding_model,
        "index ready"
    );
    Ok(Arc::new(index))
}

struct PendingChunk {
    id: String,
    document_id: String,
    source: String,
    ordinal: usize,
    text: String,
}

async fn build(
    corpus_path: &Path,
    persist_path: &Path,
    embedder: &dyn EmbeddingProvider,
    options: &BuildOptions,
) -> Result<()> {
    let corpus = DocumentCorpus::load(corpus_path)?;
    let chunker = Chunker::new(options.chunk);

    let mut chunks = Vec::new();
    for doc in corpus.documents() {
        for (ordinal, text) in chunker.chunk(&doc.text).into_iter().enumerate() {
            chunks.push(PendingChunk {
                id: format!("{}-{ordinal:04}", doc.id),
                document_id: doc.id.clone(),
                source: doc.source.clone(),
                ordinal,
                text,
            });
        }
    }
    if chunks.is_empty() {
        return Err(Error::Corpus("corpus produced no chunks".to_string()));
    }
    tracing::info!(documents = corpus.len(), chunks = chunks.len(), "chunked corpus");

    let dimensions = embedder.dimensions();
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(options.embed_batch_size.max(1)) {
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let embedded = embedder.embed_batch(&texts).await?;
        if embedded.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embedded.len()
            )));
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != dimensions) {
            return Err(Error::Embedding(format!(
                "embedder returned {} dimensions, expected {dimensions}",
                bad.len()
            )));
        }
        vectors.extend(embedded);
        tracing::debug!(embedded = vectors.len(), total = chunks.len(), "embedding chunks");
    }

    let meta = IndexMeta {
        embedding_model: embedder.model_id().to_string(),
        dimensions,
        chunk_count: chunks.len(),
        document_count: corpus.len(),
        corpus_fingerprint: corpus.fingerprint(),
        built_at: chrono::Utc::now().to_rfc3339(),
    };

    let persist_path = persist_path.to_path_buf();
    tokio::task::spawn_blocking(move || write_index(&persist_path, &chunks, &vectors, &meta))
        .await
        .map_err(|e| Error::Index(format!("index writer task failed: {e}")))?
}

fn write_index(
    persist_path: &Path,
    chunks: &[PendingChunk],
    vectors: &[Vec<f32>],
    meta: &IndexMeta,
) -> Result<()> {
    std::fs::create_dir_all(persist_path).map_err(|e| {
        Error::Index(format!(
            "cannot create persist directory {}: {e}",
            persist_path.display()
        ))
    })?;

    let final_path = persist_path.join(INDEX_FILE);
    let partial_path = persist_path.join(format!("{INDEX_FILE}.{PARTIAL_SUFFIX}"));
    if partial_path.exists() {
        tracing::warn!(path = %partial_path.display(), "removing leftover partial index");
        std::fs::remove_file(&partial_path)?;
    }

    let mut conn = Connection::open(&partial_path)
        .map_err(|e| Error::Index(format!("cannot create {}: {e}", partial_path.display())))?;
    schema::create(&conn, meta.dimensions)?;

    let tx = conn.transaction()?;
    {
        let mut insert_chunk = tx.prepare(
            "INSERT INTO chunks (id, document_id, source, ordinal, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut insert_vec =
            tx.prepare("INSERT INTO chunks_vec (chunk_id, embedding) VALUES (?1, ?2)")?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            #[allow(clippy::cast_possible_wrap)]
            insert_chunk.execute(rusqlite::params![
                chunk.id,
                chunk.document_id,
                chunk.source,
                chunk.ordinal as i64,
                chunk.text,
            ])?;
            insert_vec.execute(rusqlite::params![chunk.id, embedding::to_bytes(vector)])?;
        }
    }
    schema::write_meta(&tx, meta)?;
    tx.commit()?;
    conn.close().map_err(|(_, e)| Error::Sqlite(e))?;

    std::fs::rename(&partial_path, &final_path).map_err(|e| {
        Error::Index(format!("cannot move index into {}: {e}", final_path.display()))
    })?;

    tracing::info!(path = %final_path.display(), chunks = chunks.len(), "index written");
    Ok(())
}

impl SemanticIndex {
    fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        origin: IndexOrigin,
    ) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| Error::Index(format!("cannot open {}: {e}", path.display())))?;

        let meta = {
            let conn = pool.get()?;
            schema::read_meta(&conn).map_err(|e| match e {
                Error::Index(_) => e,
                other => Error::Index(format!("corrupt index {}: {other}", path.display())),
            })?
        };

        if meta.dimensions != embedder.dimensions() {
            return Err(Error::Index(format!(
                "index {} holds {}-dimensional vectors but the embedder produces {}",
                path.display(),
                meta.dimensions,
                embedder.dimensions()
            )));
        }
        if meta.embedding_model != embedder.model_id() {
            tracing::warn!(
                stored = %meta.embedding_model,
                configured = %embedder.model_id(),
                "index was built with a different embedding model"
            );
        }

        Ok(Self {
            pool,
            embedder,
            meta,
            origin,
            path: path.to_path_buf(),
        })
    }

    /// Build metadata
    #[must_use]
    pub const fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// Whether this start built or loaded the index
    #[must_use]
    pub const fn origin(&self) -> IndexOrigin {
        self.origin
    }

    /// Path of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Embedder bound for query-time embedding
    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Find the `top_k` chunks closest to `query`, closest first
    ///
    /// # Errors
    ///
    /// Returns error if embedding the query or the vector search fails
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        if vector.len() != self.meta.dimensions {
            return Err(Error::Embedding(format!(
                "query embedding has {} dimensions, index expects {}",
                vector.len(),
                self.meta.dimensions
            )));
        }

        let pool = self.pool.clone();
        let chunks = tokio::task::spawn_blocking(move || search(&pool, &vector, top_k))
            .await
            .map_err(|e| Error::Index(format!("search task failed: {e}")))??;

        tracing::debug!(top_k, hits = chunks.len(), "retrieved chunks");
        Ok(chunks)
    }
}

fn search(pool: &IndexPool, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        r"SELECT c.id, c.source, c.ordinal, c.text, v.distance
          FROM (
              SELECT chunk_id, distance
              FROM chunks_vec
              WHERE embedding MATCH ?1 AND k = ?2
          ) v
          INNER JOIN chunks c ON c.id = v.chunk_id
          ORDER BY v.distance",
    )?;

    #[allow(clippy::cast_possible_wrap)]
    let rows = stmt.query_map(
        rusqlite::params![embedding::to_bytes(vector), top_k as i64],
        |row| {
            let ordinal: i64 = row.get(2)?;
            let distance: f64 = row.get(4)?;
            Ok(RetrievedChunk {
                id: row.get(0)?,
                source: row.get(1)?,
                ordinal: usize::try_from(ordinal).unwrap_or_default(),
                text: row.get(3)?,
                distance,
                score: 1.0 / (1.0 + distance),
            })
        },
    )?;

    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
}
