use tokio::sync::{mpsc, oneshot};

/// A credential question forwarded to whoever owns the terminal.
///
/// Workers never print or read the terminal themselves; they send one of
/// these and block on `reply`. Dropping `reply` without answering counts
/// as a dismissal and resolves to an empty string on the worker side.
#[derive(Debug)]
pub struct PromptRequest {
    pub title: String,
    pub prompt: String,
    /// The answer must not be echoed while typing.
    pub masked: bool,
    pub reply: oneshot::Sender<String>,
}

pub type PromptSender = mpsc::Sender<PromptRequest>;
pub type PromptReceiver = mpsc::Receiver<PromptRequest>;

/// Throttled status snapshot emitted during a transfer run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub cumulative_mb: f64,
    pub rate_mbps: f64,
    pub current_file: String,
}

/// Terminal state of one operation. Exactly one of these is reported
/// per run; a cancelled run is Aborted, never Failed.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed,
    Aborted,
    Failed(crate::error::AppError),
}

impl TransferOutcome {
    pub fn from_result(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => TransferOutcome::Completed,
            Err(e) if e.is_cancelled() => TransferOutcome::Aborted,
            Err(e) => TransferOutcome::Failed(e),
        }
    }
}
