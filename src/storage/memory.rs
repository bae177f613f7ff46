//! In-memory storage backend.
//!
//! Files live in a single `RwLock<HashMap>`. Readers get a cheap clone of the
//! stored `Bytes`, so a download never holds the lock while it streams.

use crate::storage::{FileName, Storage, StoredFile};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Shared in-memory file store.
///
/// Cloning is cheap and every clone sees the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `contents` under `name` directly, bypassing the upload path.
    pub fn insert(&self, name: impl Into<String>, contents: impl Into<Bytes>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), contents.into());
    }

    /// Returns the stored contents of `name`.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An upload buffered in memory until committed.
#[derive(Debug)]
pub struct MemoryUpload {
    name: FileName,
    buf: Vec<u8>,
}

impl AsyncWrite for MemoryUpload {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Storage for MemoryStorage {
    type Reader = Cursor<Bytes>;
    type Upload = MemoryUpload;

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn open(&self, name: &FileName) -> io::Result<Option<StoredFile<Self::Reader>>> {
        Ok(self.get(name.as_str()).map(|contents| StoredFile {
            size: contents.len() as u64,
            reader: Cursor::new(contents),
        }))
    }

    async fn create(&self, name: &FileName) -> io::Result<Self::Upload> {
        Ok(MemoryUpload {
            name: name.clone(),
            buf: Vec::new(),
        })
    }

    async fn commit(&self, upload: Self::Upload) -> io::Result<()> {
        let MemoryUpload { name, buf } = upload;
        self.insert(name.as_str(), buf);
        Ok(())
    }

    async fn discard(&self, upload: Self::Upload) {
        drop(upload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn name(s: &str) -> FileName {
        FileName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let storage = MemoryStorage::new();
        storage.insert("b.txt", "2");
        storage.insert("a.txt", "1");
        storage.insert("c.txt", "3");

        assert_eq!(
            storage.list().await.unwrap(),
            vec!["a.txt", "b.txt", "c.txt"]
        );
    }

    #[tokio::test]
    async fn test_open_missing() {
        let storage = MemoryStorage::new();
        assert!(storage.open(&name("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_reads_contents() {
        let storage = MemoryStorage::new();
        storage.insert("bin", vec![0u8, 1, 2, 255]);

        let mut file = storage.open(&name("bin")).await.unwrap().unwrap();
        assert_eq!(file.size, 4);

        let mut contents = Vec::new();
        file.reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, vec![0u8, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_upload_invisible_until_commit() {
        let storage = MemoryStorage::new();

        let mut upload = storage.create(&name("new.txt")).await.unwrap();
        upload.write_all(b"partial").await.unwrap();
        assert!(storage.is_empty());

        storage.commit(upload).await.unwrap();
        assert_eq!(storage.get("new.txt"), Some(Bytes::from("partial")));
    }

    #[tokio::test]
    async fn test_discard_keeps_previous_contents() {
        let storage = MemoryStorage::new();
        storage.insert("keep.txt", "original");

        let mut upload = storage.create(&name("keep.txt")).await.unwrap();
        upload.write_all(b"half-writ").await.unwrap();
        storage.discard(upload).await;

        assert_eq!(storage.get("keep.txt"), Some(Bytes::from("original")));
    }

    #[tokio::test]
    async fn test_clones_share_files() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.insert("shared", "x");
        assert_eq!(other.len(), 1);
    }
}
