//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 有界缓冲 `Record`（drop-oldest / block）
//! - Fan-out 到已连接的 backend slots
//! - 隔离失败的 backend，按退避重连

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod slot;

pub use buffer::{PushOutcome, RecordBuffer};
pub use contracts::{BackendKind, BackendSet, Record};
pub use dispatcher::{
    create_dispatcher, BackendReport, DeliveryDispatcher, DispatchReport, DispatcherBuilder,
    DispatcherConfig, PrimaryFailure, DEFAULT_SEND_TIMEOUT,
};
pub use error::DispatcherError;
pub use metrics::{BufferStatsSnapshot, MetricsSnapshot, SlotMetrics};
pub use slot::{BackendSlot, SlotState};
