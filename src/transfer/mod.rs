pub mod engine;
pub mod progress;

pub use engine::{TransferEngine, TransferTask};
pub use progress::ProgressAggregator;

use serde::{Deserialize, Serialize};

/// Which side originates the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Whether an upload copies a whole tree or a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Tree,
    SingleFile,
}
