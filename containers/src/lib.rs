pub mod heartbeat;
pub mod milestone;
pub mod types;

pub use heartbeat::{Heartbeat, SyncStatus};
pub use milestone::{MilestoneIndex, MilestoneIndexDelta};
pub use types::{BlockId, BlockMetadata};
