use containers::MilestoneIndex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("operation aborted")]
    OperationAborted,

    #[error("milestone {0} doesn't exist")]
    MilestoneMissing(MilestoneIndex),

    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
