mod auth;
mod config;
mod error;
mod events;
mod filesystem;
mod session;
mod transfer;
mod utils;

// Re-export commonly used types
pub use auth::{
    AuthNegotiator, ChallengeResolver, CredentialCategory, CredentialStore, PromptEntry, classify,
};
pub use config::{
    ConnectionProfile, ProfileRecord, ProfileStore, TransferPaths, parse_port,
};
pub use error::{AppError, Result};
pub use events::{
    ProgressReport, PromptReceiver, PromptRequest, PromptSender, TransferOutcome,
};
pub use filesystem::{RemoteEntry, RemoteFs, RemoteStat, SftpRemote};
pub use session::{CommandOutput, SessionHandle, SessionProfiles, TransferGuard};
pub use transfer::{
    Direction, ProgressAggregator, TransferEngine, TransferMode, TransferTask,
};
pub use utils::{expand_tilde, init_tracing};
