pub mod offline;

// 重新导出常用类型和函数，方便外部使用
pub use offline::{
    client::{ClientConfig, OfflineClient},
    error::StoreError,
    models::{
        ConversationRecord, NewSyncAction, PendingSyncAction, ResourceCacheEntry, StorageEstimate,
        UserProfileRecord,
    },
    network::{NetworkEvent, NetworkMonitor},
    quota::StorageInspector,
    sync::{SyncDispatcher, SyncListener, SyncReport},
    worker::{SeedOutcome, WorkerLifecycle},
};
