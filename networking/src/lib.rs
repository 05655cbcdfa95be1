pub mod error;
pub mod ledger;
pub mod sync;
pub mod types;

pub use error::SyncError;
pub use ledger::{Ledger, MemoryLedger};
pub use types::{ConnectionState, OutboundPeerMessage, PeerMessage, PeerMessageSink};
