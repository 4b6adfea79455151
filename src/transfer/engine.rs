//! Recursive bidirectional transfer with skip/overwrite policy and
//! cooperative cancellation.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::filesystem::RemoteFs;
use crate::transfer::progress::ProgressAggregator;
use crate::transfer::{Direction, TransferMode};
use crate::utils::{remote_basename, remote_join};

const CHUNK_SIZE: usize = 64 * 1024;

/// Immutable description of one transfer run.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub direction: Direction,
    pub mode: TransferMode,
    pub local_root: PathBuf,
    pub remote_root: String,
    pub force_overwrite: bool,
}

/// Walks a local/remote tree pair and drives per-file copy, skip and
/// progress accounting. Borrows the remote side for the duration of one
/// run; a fresh engine (and a fresh cancellation token) is built per run.
pub struct TransferEngine<'a, R: RemoteFs> {
    remote: &'a R,
    progress: ProgressAggregator,
    cancel: CancellationToken,
    force_overwrite: bool,
}

impl<'a, R: RemoteFs> TransferEngine<'a, R> {
    pub fn new(
        remote: &'a R,
        progress: ProgressAggregator,
        cancel: CancellationToken,
        force_overwrite: bool,
    ) -> Self {
        Self {
            remote,
            progress,
            cancel,
            force_overwrite,
        }
    }

    /// Bytes accounted so far, both streamed and skipped.
    pub fn total_bytes(&self) -> u64 {
        self.progress.total_bytes()
    }

    pub async fn run(&mut self, task: &TransferTask) -> Result<()> {
        match task.direction {
            Direction::Upload => {
                self.upload(&task.local_root, &task.remote_root, task.mode)
                    .await
            }
            Direction::Download => self.download(&task.remote_root, &task.local_root).await,
        }
    }

    /// Upload `local_root` under `remote_base`. Tree mode recreates the
    /// directory as `remote_base/basename(local_root)`; single-file mode
    /// writes `remote_base/basename(local_root)` with no directory
    /// creation.
    pub async fn upload(
        &mut self,
        local_root: &Path,
        remote_base: &str,
        mode: TransferMode,
    ) -> Result<()> {
        self.check_cancelled()?;
        let base_name = local_basename(local_root)?;
        let destination = remote_join(remote_base, &base_name);

        match mode {
            TransferMode::Tree => self.upload_dir(local_root, &destination).await,
            TransferMode::SingleFile => self.upload_file(local_root, &destination).await,
        }
    }

    /// Download `remote_root` under `local_base`. The remote entry
    /// decides between tree and single-file; a root that cannot be
    /// stat'ed is fatal.
    pub async fn download(&mut self, remote_root: &str, local_base: &Path) -> Result<()> {
        self.check_cancelled()?;
        let root_stat = self
            .remote
            .stat(remote_root)
            .await
            .map_err(|_| AppError::RemoteIo("remote path does not exist".to_string()))?;

        let destination = local_base.join(remote_basename(remote_root));
        if root_stat.is_dir {
            self.download_dir(remote_root, &destination).await
        } else {
            self.download_file(remote_root, &destination, root_stat.size)
                .await
        }
    }

    async fn upload_dir(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.check_cancelled()?;
        self.ensure_remote_dir(remote).await?;

        // A local listing failure aborts the run; per-file errors do not
        let mut entries = tokio::fs::read_dir(local).await?;
        while let Some(entry) = entries.next_entry().await? {
            self.check_cancelled()?;

            let name = entry.file_name().to_string_lossy().into_owned();
            let local_path = entry.path();
            let remote_path = remote_join(remote, &name);

            // Follow symlinks so a linked directory recurses as one
            let metadata = tokio::fs::metadata(&local_path).await?;
            if metadata.is_dir() {
                Box::pin(self.upload_dir(&local_path, &remote_path)).await?;
            } else if metadata.is_file() {
                self.upload_file(&local_path, &remote_path).await?;
            }
            // other entry kinds (sockets, fifos) are not transferable
        }

        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.check_cancelled()?;
        let file_name = local_basename(local)?;
        let size = tokio::fs::metadata(local).await?.len();

        if !self.force_overwrite
            && let Ok(stat) = self.remote.stat(remote).await
            && !stat.is_dir
            && stat.size == Some(size)
        {
            info!("skip: {}", file_name);
            self.progress.record(size, &file_name);
            return Ok(());
        }

        debug!("uploading: {}", file_name);
        match self.stream_upload(local, remote, &file_name).await {
            Ok(bytes) => info!("ok: {} ({} bytes)", file_name, bytes),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            // One bad file does not abort the tree
            Err(e) => warn!("fail: {}: {}", file_name, e),
        }
        Ok(())
    }

    async fn stream_upload(&mut self, local: &Path, remote: &str, file_name: &str) -> Result<u64> {
        let mut source = tokio::fs::File::open(local).await?;
        let mut destination = self.remote.open_write(remote).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            self.check_cancelled()?;
            let n = source.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            destination
                .write_all(&buffer[..n])
                .await
                .map_err(|e| AppError::RemoteIo(format!("write '{remote}' failed: {e}")))?;
            transferred += n as u64;
            self.progress.record(n as u64, file_name);
        }

        destination
            .shutdown()
            .await
            .map_err(|e| AppError::RemoteIo(format!("close '{remote}' failed: {e}")))?;

        Ok(transferred)
    }

    async fn download_dir(&mut self, remote: &str, local: &Path) -> Result<()> {
        self.check_cancelled()?;
        if !tokio::fs::try_exists(local).await? {
            tokio::fs::create_dir_all(local).await?;
        }

        // A remote listing failure aborts the run
        let entries = self.remote.read_dir(remote).await?;
        for entry in entries {
            self.check_cancelled()?;

            let remote_path = remote_join(remote, &entry.name);
            let local_path = local.join(&entry.name);

            if entry.is_dir {
                Box::pin(self.download_dir(&remote_path, &local_path)).await?;
            } else {
                self.download_file(&remote_path, &local_path, entry.size)
                    .await?;
            }
        }

        Ok(())
    }

    async fn download_file(
        &mut self,
        remote: &str,
        local: &Path,
        remote_size: Option<u64>,
    ) -> Result<()> {
        self.check_cancelled()?;
        let file_name = remote_basename(remote).to_string();

        if !self.force_overwrite
            && let Some(size) = remote_size
            && let Ok(local_meta) = tokio::fs::metadata(local).await
            && local_meta.is_file()
            && local_meta.len() == size
        {
            info!("skip: {}", file_name);
            self.progress.record(size, &file_name);
            return Ok(());
        }

        debug!("downloading: {}", file_name);
        match self.stream_download(remote, local, &file_name).await {
            Ok(bytes) => info!("ok: {} ({} bytes)", file_name, bytes),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            // One bad file does not abort the tree
            Err(e) => warn!("fail: {}: {}", file_name, e),
        }
        Ok(())
    }

    async fn stream_download(
        &mut self,
        remote: &str,
        local: &Path,
        file_name: &str,
    ) -> Result<u64> {
        let mut source = self.remote.open_read(remote).await?;
        let mut destination = tokio::fs::File::create(local).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            self.check_cancelled()?;
            let n = source
                .read(&mut buffer)
                .await
                .map_err(|e| AppError::RemoteIo(format!("read '{remote}' failed: {e}")))?;
            if n == 0 {
                break;
            }

            destination.write_all(&buffer[..n]).await?;
            transferred += n as u64;
            self.progress.record(n as u64, file_name);
        }

        destination.flush().await?;
        Ok(transferred)
    }

    /// Make sure `remote` exists as a directory, creating missing
    /// parents along the way.
    async fn ensure_remote_dir(&mut self, remote: &str) -> Result<()> {
        if let Ok(stat) = self.remote.stat(remote).await {
            if stat.is_dir {
                return Ok(());
            }
            return Err(AppError::RemoteIo(format!(
                "'{remote}' exists and is not a directory"
            )));
        }

        if self.remote.create_dir(remote).await.is_ok() {
            return Ok(());
        }

        // Parent chain is missing too; create it component by component
        let absolute = remote.starts_with('/');
        let mut partial = String::new();
        for component in remote.split('/').filter(|c| !c.is_empty()) {
            if !partial.is_empty() || absolute {
                partial.push('/');
            }
            partial.push_str(component);

            if self.remote.stat(&partial).await.is_err() {
                self.remote.create_dir(&partial).await?;
            }
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn local_basename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::Validation(format!("path '{}' has no file name", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{RemoteEntry, RemoteStat};
    use std::time::Duration;

    /// RemoteFs backed by a scratch directory, standing in for the SFTP
    /// side.
    struct LocalDirRemote {
        root: PathBuf,
    }

    impl LocalDirRemote {
        fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        fn resolve(&self, path: &str) -> PathBuf {
            self.root.join(path.trim_start_matches('/'))
        }
    }

    impl RemoteFs for LocalDirRemote {
        type Reader = tokio::fs::File;
        type Writer = tokio::fs::File;

        async fn stat(&self, path: &str) -> Result<RemoteStat> {
            let meta = tokio::fs::metadata(self.resolve(path))
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))?;
            Ok(RemoteStat {
                size: Some(meta.len()),
                is_dir: meta.is_dir(),
            })
        }

        async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
            let mut read_dir = tokio::fs::read_dir(self.resolve(path))
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))?;

            let mut entries = Vec::new();
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))?
            {
                let meta = entry.metadata().await.map_err(|e| AppError::RemoteIo(e.to_string()))?;
                entries.push(RemoteEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: Some(meta.len()),
                    is_dir: meta.is_dir(),
                });
            }
            // Deterministic listing order for assertions
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        }

        async fn create_dir(&self, path: &str) -> Result<()> {
            tokio::fs::create_dir(self.resolve(path))
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))
        }

        async fn open_read(&self, path: &str) -> Result<Self::Reader> {
            tokio::fs::File::open(self.resolve(path))
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))
        }

        async fn open_write(&self, path: &str) -> Result<Self::Writer> {
            tokio::fs::File::create(self.resolve(path))
                .await
                .map_err(|e| AppError::RemoteIo(e.to_string()))
        }
    }

    /// Delegating remote that trips the cancellation token whenever a
    /// file is opened for reading.
    struct CancelOnOpen {
        inner: LocalDirRemote,
        token: CancellationToken,
    }

    impl RemoteFs for CancelOnOpen {
        type Reader = tokio::fs::File;
        type Writer = tokio::fs::File;

        async fn stat(&self, path: &str) -> Result<RemoteStat> {
            self.inner.stat(path).await
        }

        async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
            self.inner.read_dir(path).await
        }

        async fn create_dir(&self, path: &str) -> Result<()> {
            self.inner.create_dir(path).await
        }

        async fn open_read(&self, path: &str) -> Result<Self::Reader> {
            self.token.cancel();
            self.inner.open_read(path).await
        }

        async fn open_write(&self, path: &str) -> Result<Self::Writer> {
            self.inner.open_write(path).await
        }
    }

    fn make_engine<R: RemoteFs>(remote: &R, force_overwrite: bool) -> TransferEngine<'_, R> {
        TransferEngine::new(
            remote,
            ProgressAggregator::new(None).with_throttle(Duration::from_secs(3600)),
            CancellationToken::new(),
            force_overwrite,
        )
    }

    async fn write_file(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_tree_copies_all_files() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local/project");
        write_file(&local.join("a.txt"), b"hello").await;
        write_file(&local.join("sub/b.bin"), &[7u8; 2048]).await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(remote_root.join("data")).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let mut engine = make_engine(&remote, false);
        engine
            .upload(&local, "/data", TransferMode::Tree)
            .await
            .unwrap();

        let a = tokio::fs::read(remote_root.join("data/project/a.txt")).await.unwrap();
        let b = tokio::fs::read(remote_root.join("data/project/sub/b.bin")).await.unwrap();
        assert_eq!(a, b"hello");
        assert_eq!(b.len(), 2048);
        assert_eq!(engine.total_bytes(), 5 + 2048);
    }

    #[tokio::test]
    async fn test_upload_creates_missing_parent_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("src");
        write_file(&local.join("f.txt"), b"x").await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(&remote_root).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let mut engine = make_engine(&remote, false);
        engine
            .upload(&local, "/a/b/c", TransferMode::Tree)
            .await
            .unwrap();

        assert!(remote_root.join("a/b/c/src/f.txt").exists());
    }

    #[tokio::test]
    async fn test_single_file_mode_does_not_create_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("payload.bin");
        write_file(&local, &[1u8; 100]).await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(remote_root.join("drop")).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let mut engine = make_engine(&remote, false);
        engine
            .upload(&local, "/drop", TransferMode::SingleFile)
            .await
            .unwrap();
        assert!(remote_root.join("drop/payload.bin").exists());

        // Missing destination directory: the per-file failure is logged,
        // the run itself still completes
        let mut engine = make_engine(&remote, false);
        engine
            .upload(&local, "/missing", TransferMode::SingleFile)
            .await
            .unwrap();
        assert!(!remote_root.join("missing").exists());
    }

    #[tokio::test]
    async fn test_second_upload_skips_unchanged_files() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("tree");
        write_file(&local.join("one.txt"), b"11111").await;
        write_file(&local.join("two.txt"), b"2222222").await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(remote_root.join("base")).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let mut first = make_engine(&remote, false);
        first.upload(&local, "/base", TransferMode::Tree).await.unwrap();
        assert_eq!(first.total_bytes(), 12);

        // Same size, different content: a skipped file is left untouched
        write_file(&remote_root.join("base/tree/one.txt"), b"XXXXX").await;

        let mut second = make_engine(&remote, false);
        second.upload(&local, "/base", TransferMode::Tree).await.unwrap();

        // Skips still account for the full size
        assert_eq!(second.total_bytes(), 12);
        let content = tokio::fs::read(remote_root.join("base/tree/one.txt")).await.unwrap();
        assert_eq!(content, b"XXXXX");
    }

    #[tokio::test]
    async fn test_force_overwrite_retransfers_matching_sizes() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("tree");
        write_file(&local.join("one.txt"), b"11111").await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(remote_root.join("base")).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        make_engine(&remote, false)
            .upload(&local, "/base", TransferMode::Tree)
            .await
            .unwrap();
        write_file(&remote_root.join("base/tree/one.txt"), b"XXXXX").await;

        make_engine(&remote, true)
            .upload(&local, "/base", TransferMode::Tree)
            .await
            .unwrap();

        let content = tokio::fs::read(remote_root.join("base/tree/one.txt")).await.unwrap();
        assert_eq!(content, b"11111");
    }

    #[tokio::test]
    async fn test_download_single_file_skip_counts_full_size() {
        let tmp = tempfile::tempdir().unwrap();
        let remote_root = tmp.path().join("remote");
        let payload = vec![9u8; 10 * 1024];
        write_file(&remote_root.join("artifact.bin"), &payload).await;
        let remote = LocalDirRemote::new(&remote_root);

        let local_base = tmp.path().join("downloads");
        // Pre-existing same-size file with sentinel content
        let sentinel = vec![5u8; 10 * 1024];
        write_file(&local_base.join("artifact.bin"), &sentinel).await;

        let mut engine = make_engine(&remote, false);
        engine.download("/artifact.bin", &local_base).await.unwrap();

        // Nothing was streamed, yet progress equals the file size
        assert_eq!(engine.total_bytes(), 10 * 1024);
        let content = tokio::fs::read(local_base.join("artifact.bin")).await.unwrap();
        assert_eq!(content, sentinel);
    }

    #[tokio::test]
    async fn test_download_tree_recurses_and_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let remote_root = tmp.path().join("remote");
        write_file(&remote_root.join("pkg/readme.md"), b"docs").await;
        write_file(&remote_root.join("pkg/nested/lib.rs"), b"fn main() {}").await;
        let remote = LocalDirRemote::new(&remote_root);

        let local_base = tmp.path().join("downloads");
        tokio::fs::create_dir_all(&local_base).await.unwrap();

        let mut engine = make_engine(&remote, false);
        engine.download("/pkg", &local_base).await.unwrap();

        assert!(local_base.join("pkg/readme.md").exists());
        assert!(local_base.join("pkg/nested/lib.rs").exists());
        assert_eq!(engine.total_bytes(), 4 + 12);
    }

    #[tokio::test]
    async fn test_download_missing_root_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(&remote_root).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let mut engine = make_engine(&remote, false);
        let err = engine
            .download("/does/not/exist", tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteIo(msg) if msg.contains("does not exist")));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("tree");
        write_file(&local.join("one.txt"), b"1").await;

        let remote_root = tmp.path().join("remote");
        tokio::fs::create_dir_all(&remote_root).await.unwrap();
        let remote = LocalDirRemote::new(&remote_root);

        let token = CancellationToken::new();
        token.cancel();
        let mut engine = TransferEngine::new(
            &remote,
            ProgressAggregator::new(None),
            token,
            false,
        );

        let err = engine.upload(&local, "/", TransferMode::Tree).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!remote_root.join("tree").exists());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_the_next_file() {
        let tmp = tempfile::tempdir().unwrap();
        let remote_root = tmp.path().join("remote");
        write_file(&remote_root.join("data/aaa.bin"), &[1u8; 4096]).await;
        write_file(&remote_root.join("data/zzz.bin"), &[2u8; 4096]).await;

        let token = CancellationToken::new();
        let remote = CancelOnOpen {
            inner: LocalDirRemote::new(&remote_root),
            token: token.clone(),
        };

        let local_base = tmp.path().join("downloads");
        tokio::fs::create_dir_all(&local_base).await.unwrap();

        let mut engine = TransferEngine::new(
            &remote,
            ProgressAggregator::new(None),
            token,
            false,
        );

        // The token trips while the first file is in flight; the run
        // stops within that file-transfer step
        let err = engine.download("/data", &local_base).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!local_base.join("data/zzz.bin").exists());
    }
}
