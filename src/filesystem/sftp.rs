//! SFTP-backed implementation of [`RemoteFs`].

use std::sync::Arc;

use russh_sftp::client::SftpSession;
use tracing::{debug, error};

use super::{RemoteEntry, RemoteFs, RemoteStat};
use crate::error::{AppError, Result};
use crate::utils::remote_join;

#[derive(Clone)]
pub struct SftpRemote {
    session: Arc<SftpSession>,
}

impl SftpRemote {
    pub fn new(session: Arc<SftpSession>) -> Self {
        Self { session }
    }
}

impl RemoteFs for SftpRemote {
    type Reader = russh_sftp::client::fs::File;
    type Writer = russh_sftp::client::fs::File;

    async fn stat(&self, path: &str) -> Result<RemoteStat> {
        let attrs = self
            .session
            .metadata(path)
            .await
            .map_err(|e| AppError::RemoteIo(format!("stat '{path}' failed: {e}")))?;

        Ok(RemoteStat {
            size: attrs.size,
            is_dir: attrs.is_dir(),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        debug!("SFTP read_dir: {}", path);
        let read_dir = self.session.read_dir(path).await.map_err(|e| {
            error!("SFTP read_dir failed for '{}': {}", path, e);
            AppError::RemoteIo(format!("read_dir '{path}' failed: {e}"))
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();

            // Follow symlinks so a linked directory recurses as one
            let is_dir = if entry.file_type().is_symlink() {
                let full_path = remote_join(path, &name);
                match self.session.metadata(&full_path).await {
                    Ok(target) => target.is_dir(),
                    Err(_) => false,
                }
            } else {
                entry.file_type().is_dir()
            };

            entries.push(RemoteEntry {
                name,
                size: entry.metadata().size,
                is_dir,
            });
        }

        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        self.session
            .create_dir(path)
            .await
            .map_err(|e| AppError::RemoteIo(format!("mkdir '{path}' failed: {e}")))
    }

    async fn open_read(&self, path: &str) -> Result<Self::Reader> {
        self.session
            .open(path)
            .await
            .map_err(|e| AppError::RemoteIo(format!("open '{path}' failed: {e}")))
    }

    async fn open_write(&self, path: &str) -> Result<Self::Writer> {
        self.session
            .create(path)
            .await
            .map_err(|e| AppError::RemoteIo(format!("create '{path}' failed: {e}")))
    }
}
