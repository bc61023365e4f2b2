//! # JSON Document Store
//!
//! The whole database is one JSON object on disk, `{ "<collection>": [records...] }`.
//!
//! ## Implementation
//!
//! - Loaded once at startup into a `serde_json::Map` (insertion ordered)
//! - Readers share a `RwLock`, mutations take the write half
//! - Every successful mutation rewrites the file in full, pretty printed
//! - A failed mutation (closure returned `Err`) never touches the file
//!
//! ## Limits
//!
//! Whole-file rewrites are fine for mock data sets of a few MB. Two processes
//! pointed at the same file will overwrite each other.
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{fs, sync::RwLock};
use tracing::info;

pub type Document = Map<String, Value>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database file {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Database file {path} unwritable: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Database file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Database for {path} could not be serialized: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Database file {0} must contain a JSON object")]
    NotAnObject(PathBuf),
}

pub struct Database {
    path: PathBuf,
    document: RwLock<Document>,
}

impl Database {
    /// Opens `path`, creating it as `{}` when it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();

        let document = if fs::try_exists(&path).await.unwrap_or(false) {
            read_document(&path).await?
        } else {
            info!("{} not found, starting with an empty database", path.display());
            let document = Document::new();
            write_document(&path, &document).await?;
            document
        };

        info!(
            "Loaded {} collections from {}",
            document.len(),
            path.display()
        );

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the in-memory document.
    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Document) -> R,
    {
        let document = self.document.read().await;
        f(&document)
    }

    /// Runs `f` against the in-memory document and flushes it if `f` succeeds.
    ///
    /// The write lock is held until the file is rewritten, so mutations never
    /// interleave.
    pub async fn write<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Document) -> Result<R, E>,
        E: From<DatabaseError>,
    {
        let mut document = self.document.write().await;
        let result = f(&mut document)?;

        write_document(&self.path, &document).await?;

        Ok(result)
    }

    /// Reads the file as it currently is on disk, bypassing memory.
    ///
    /// Shares the lock with readers so a flush in progress is never observed half written.
    pub async fn read_from_disk(&self) -> Result<Document, DatabaseError> {
        let _document = self.document.read().await;
        read_document(&self.path).await
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.read(|document| document.keys().cloned().collect())
            .await
    }
}

async fn read_document(path: &Path) -> Result<Document, DatabaseError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| DatabaseError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    match serde_json::from_str(&raw) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(DatabaseError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(DatabaseError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_document(path: &Path, document: &Document) -> Result<(), DatabaseError> {
    let pretty =
        serde_json::to_string_pretty(document).map_err(|source| DatabaseError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;

    fs::write(path, pretty)
        .await
        .map_err(|source| DatabaseError::Write {
            path: path.to_path_buf(),
            source,
        })
}
