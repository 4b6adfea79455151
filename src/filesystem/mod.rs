//! Remote filesystem abstraction used by the transfer engine.

pub mod sftp;

pub use sftp::SftpRemote;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Attributes of one remote path.
#[derive(Debug, Clone)]
pub struct RemoteStat {
    pub size: Option<u64>,
    pub is_dir: bool,
}

/// One directory entry with the attributes the transfer engine needs.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: Option<u64>,
    pub is_dir: bool,
}

/// The remote-file operations the transfer engine is written against.
/// Production uses the SFTP subsystem ([`SftpRemote`]); tests substitute
/// a local-directory implementation.
pub trait RemoteFs {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    async fn stat(&self, path: &str) -> Result<RemoteStat>;
    /// List a directory with attributes, in the order the server
    /// returns entries.
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;
    async fn create_dir(&self, path: &str) -> Result<()>;
    async fn open_read(&self, path: &str) -> Result<Self::Reader>;
    /// Open for writing, creating or truncating the destination.
    async fn open_write(&self, path: &str) -> Result<Self::Writer>;
}
