//! 后台缓存工作者生命周期管理
//!
//! 把原应用的 service worker 建模为一个持有响应缓存的后台任务，
//! 页面与工作者之间的 postMessage 协议对应这里的类型化命令通道。

pub mod lifecycle;
pub mod script;

pub use lifecycle::{SeedOutcome, WorkerEvent, WorkerLifecycle, WorkerState};
pub use script::WorkerCommand;
