//! On-disk layout of the persisted index

use rusqlite::{Connection, OptionalExtension};

use crate::{Error, Result};

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 1;

/// Metadata recorded once when the index is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Embedding model the vectors were produced with
    pub embedding_model: String,
    /// Vector dimension
    pub dimensions: usize,
    /// Number of stored chunks
    pub chunk_count: usize,
    /// Number of source documents
    pub document_count: usize,
    /// Content hash of the corpus at build time
    pub corpus_fingerprint: String,
    /// RFC 3339 build timestamp
    pub built_at: String,
}

/// Create every table for a fresh index with vectors of `dimensions`
///
/// # Errors
///
/// Returns error if any statement fails
pub fn create(conn: &Connection, dimensions: usize) -> Result<()> {
    conn.execute_batch(&format!(
        r"
        CREATE TABLE chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL
        );

        CREATE INDEX idx_chunks_document ON chunks(document_id, ordinal);

        CREATE TABLE index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Vector table for chunk embeddings
        CREATE VIRTUAL TABLE chunks_vec USING vec0(
            chunk_id TEXT PRIMARY KEY,
            embedding FLOAT[{dimensions}]
        );

        PRAGMA user_version = {SCHEMA_VERSION};
        ",
    ))?;

    tracing::debug!(dimensions, version = SCHEMA_VERSION, "created index schema");
    Ok(())
}

/// Write build metadata
///
/// # Errors
///
/// Returns error if the insert fails
pub fn write_meta(conn: &Connection, meta: &IndexMeta) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)")?;
    for (key, value) in [
        ("embedding_model", meta.embedding_model.clone()),
        ("dimensions", meta.dimensions.to_string()),
        ("chunk_count", meta.chunk_count.to_string()),
        ("document_count", meta.document_count.to_string()),
        ("corpus_fingerprint", meta.corpus_fingerprint.clone()),
        ("built_at", meta.built_at.clone()),
    ] {
        stmt.execute(rusqlite::params![key, value])?;
    }
    Ok(())
}

/// Read and validate build metadata
///
/// # Errors
///
/// Returns `Error::Index` if the schema version is unknown or a required
/// metadata key is missing or malformed
pub fn read_meta(conn: &Connection) -> Result<IndexMeta> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        return Err(Error::Index(format!(
            "unsupported index schema version {version} (expected {SCHEMA_VERSION})"
        )));
    }

    let get = |key: &str| -> Result<String> {
        conn.query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| Error::Index(format!("index metadata is missing {key}")))
    };
    let get_usize = |key: &str| -> Result<usize> {
        let raw = get(key)?;
        raw.parse()
            .map_err(|_| Error::Index(format!("index metadata {key}={raw:?} is not a number")))
    };

    Ok(IndexMeta {
        embedding_model: get("embedding_model")?,
        dimensions: get_usize("dimensions")?,
        chunk_count: get_usize("chunk_count")?,
        document_count: get_usize("document_count")?,
        corpus_fingerprint: get("corpus_fingerprint")?,
        built_at: get("built_at")?,
    })
}
