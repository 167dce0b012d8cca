//! 持久化本地存储（四个集合的 DAO 层）

pub mod dao;

pub use dao::{ConversationDao, ProfileDao, ResourceCacheDao, SyncQueueDao};
