//! Storage Backend Module
//!
//! This module defines where shared files live. The session handler only ever
//! talks to the [`Storage`] trait, so the same protocol engine serves files
//! from a directory on disk or from memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionHandler                        │
//! │        LS ──> list()   GET ──> open()   PUT ──> create() │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             ▼
//!              ┌──────────────────────────────┐
//!              │        Storage (trait)       │
//!              └──────┬────────────────┬──────┘
//!                     │                │
//!                     ▼                ▼
//!          ┌──────────────────┐  ┌──────────────────┐
//!          │ DirectoryStorage │  │  MemoryStorage   │
//!          │  (tokio::fs)     │  │ (RwLock<HashMap>)│
//!          └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Uploads
//!
//! An upload is written to a private staging area and only becomes visible
//! under its real name after [`Storage::commit`]. A [`Storage::discard`]ed
//! upload leaves no trace, and the previous content of the target (if any) is
//! untouched. Two uploads of the same name never interleave bytes; the last
//! one committed wins.
//!
//! ## Example
//!
//! ```
//! use dropline::storage::{FileName, MemoryStorage, Storage};
//! use tokio::io::AsyncWriteExt;
//!
//! # tokio_test::block_on(async {
//! let storage = MemoryStorage::new();
//! let name = FileName::parse("hello.txt").unwrap();
//!
//! let mut upload = storage.create(&name).await.unwrap();
//! upload.write_all(b"hi there").await.unwrap();
//! storage.commit(upload).await.unwrap();
//!
//! assert_eq!(storage.list().await.unwrap(), vec!["hello.txt".to_string()]);
//! # });
//! ```

pub mod directory;
pub mod memory;

pub use directory::DirectoryStorage;
pub use memory::MemoryStorage;

use std::fmt;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// A file opened for download, with its size fixed at open time.
#[derive(Debug)]
pub struct StoredFile<R> {
    /// Number of bytes the reader will yield
    pub size: u64,
    /// The file contents
    pub reader: R,
}

/// Named byte blobs shared by every session.
///
/// Implementations must be safe to call from many sessions at once. No locking
/// across calls is implied: a file can change between `list` and `open`.
pub trait Storage: Send + Sync + 'static {
    /// Reader returned by [`Storage::open`]
    type Reader: AsyncRead + Send + Unpin;

    /// In-progress upload returned by [`Storage::create`]
    type Upload: AsyncWrite + Send + Unpin;

    /// Names of all stored files, sorted.
    fn list(&self) -> impl Future<Output = io::Result<Vec<String>>> + Send;

    /// Opens a file for reading, or `None` if no file has that name.
    fn open(
        &self,
        name: &FileName,
    ) -> impl Future<Output = io::Result<Option<StoredFile<Self::Reader>>>> + Send;

    /// Starts an upload that is invisible until committed.
    fn create(&self, name: &FileName) -> impl Future<Output = io::Result<Self::Upload>> + Send;

    /// Publishes a finished upload under its name, replacing any previous file.
    fn commit(&self, upload: Self::Upload) -> impl Future<Output = io::Result<()>> + Send;

    /// Throws away an unfinished upload.
    fn discard(&self, upload: Self::Upload) -> impl Future<Output = ()> + Send;
}

/// Reasons a client-supplied name is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileNameError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains a path separator")]
    PathSeparator,
    #[error("file name contains a null byte")]
    NullByte,
    #[error("file name is hidden or a relative path component")]
    Hidden,
}

/// A validated file name: exactly one plain path component.
///
/// Leading dots are rejected, which also rules out `.` and `..` and keeps
/// hidden staging files out of reach of clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileName(String);

impl FileName {
    /// Validates a name received from a client.
    pub fn parse(name: &str) -> Result<Self, FileNameError> {
        if name.is_empty() {
            return Err(FileNameError::Empty);
        }
        if name.contains('\0') {
            return Err(FileNameError::NullByte);
        }
        if name.contains('/') || name.contains('\\') {
            return Err(FileNameError::PathSeparator);
        }
        if name.starts_with('.') {
            return Err(FileNameError::Hidden);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
