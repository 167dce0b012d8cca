//! 同步调度器：网络恢复后向远端重放待同步队列

pub mod dispatcher;
pub mod listener;
pub mod transport;

pub use dispatcher::{SyncAttempt, SyncDispatcher, SyncOutcome, SyncReport};
pub use listener::{EmptySyncListener, SyncListener};
pub use transport::{DeliveryStatus, HttpSyncTransport, SyncTransport};
