//! 离线优先数据同步层
//!
//! 四块拼图：本地持久化存储（SQLite）、网络监视器、
//! 后台缓存工作者、待同步队列调度器，由 [`client::OfflineClient`]
//! 统一编排。应用层离线可读写，网络恢复后自动补投。

pub mod client;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod quota;
pub mod resource;
pub mod store;
pub mod sync;
pub mod worker;
