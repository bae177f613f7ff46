//! Directory-backed storage.
//!
//! Files are stored flat in one directory. Uploads are written to a hidden
//! staging file (`.<name>.<id>.part`) next to their target and renamed into
//! place on commit, so a reader never observes a half-written file and a
//! failed upload never clobbers the previous version.
//!
//! An upload dropped without `commit` or `discard` (a session aborted mid-PUT)
//! removes its staging file on drop.

use crate::storage::{FileName, Storage, StoredFile};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Stores files in a single directory on disk.
#[derive(Debug)]
pub struct DirectoryStorage {
    root: PathBuf,
    next_upload: AtomicU64,
}

impl DirectoryStorage {
    /// Uses `root` as the file directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Storage directory ready");

        Ok(Self {
            root,
            next_upload: AtomicU64::new(1),
        })
    }

    /// The directory files are stored in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &FileName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn staging_path(&self, name: &FileName) -> PathBuf {
        let id = self.next_upload.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".{}.{}.part", name, id))
    }
}

/// An upload being written to a staging file.
#[derive(Debug)]
pub struct FileUpload {
    file: File,
    staging: StagingFile,
    target: PathBuf,
}

/// RAII: deletes the staging file on drop unless disarmed.
#[derive(Debug)]
struct StagingFile {
    path: PathBuf,
    disarmed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            disarmed: false,
        }
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned upload"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned upload")
            }
        }
    }
}

impl AsyncWrite for FileUpload {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Storage for DirectoryStorage {
    type Reader = File;
    type Upload = FileUpload;

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // non-UTF-8 names can't be requested over the protocol anyway
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    async fn open(&self, name: &FileName) -> io::Result<Option<StoredFile<Self::Reader>>> {
        let file = match File::open(self.path_of(name)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(StoredFile {
            size: metadata.len(),
            reader: file,
        }))
    }

    async fn create(&self, name: &FileName) -> io::Result<Self::Upload> {
        let staging = self.staging_path(name);
        let file = File::create(&staging).await?;

        Ok(FileUpload {
            file,
            staging: StagingFile::new(staging),
            target: self.path_of(name),
        })
    }

    async fn commit(&self, upload: Self::Upload) -> io::Result<()> {
        let FileUpload {
            file,
            mut staging,
            target,
        } = upload;

        // on error the armed guard removes the staging file
        publish(file, &staging.path, &target).await?;
        staging.disarm();
        Ok(())
    }

    async fn discard(&self, upload: Self::Upload) {
        let FileUpload {
            file,
            mut staging,
            ..
        } = upload;
        drop(file);

        staging.disarm();
        if let Err(e) = fs::remove_file(&staging.path).await {
            warn!(path = %staging.path.display(), error = %e, "Failed to remove staged upload");
        }
    }
}

async fn publish(mut file: File, staging: &Path, target: &Path) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(staging, target).await
}
