//! b2b 运行时
//!
//! 机器人平台的执行器（音频播放、显示序列）和定时传感器轮询共享的并发原语：
//! - [`ManagedThread`]: 单后台线程的 start/stop 生命周期
//! - [`PeriodicScheduler`] / [`SimpleTimer`]: 按周期调用 tick 处理函数
//! - [`AsyncListExecutor`]: 后台执行工作项列表，支持循环、抢占和安全停止
//! - [`DoneReason`] / [`DoneCallback`]: 会话结束通知
//!
//! # 使用场景
//!
//! 具体硬件驱动实现 [`ListWorker`] 或 [`TickHandler`]，
//! 其余代码通过 start/stop/`execute_list` 与之交互。

mod clock;
pub mod config;
mod done;
mod error;
pub mod exec_list;
pub mod metrics;
mod simple_timer;
pub mod thread;
pub mod timer;
pub mod wake;

pub use clock::{monotonic_micros, monotonic_millis};
pub use config::{ExecutorConfig, RuntimeConfig, TimerConfig};
pub use done::{DoneCallback, DoneReason, done_callback};
pub use error::{ConfigError, ExecError, SchedulerError, ThreadError, TimerError};
#[cfg(any(test, feature = "test-util"))]
pub use exec_list::ExecStateView;
pub use exec_list::{AsyncListExecutor, ExecutorHandle, FnListWorker, ListWorker, StopOutcome};
pub use metrics::{
    ExecutorMetrics, ExecutorMetricsSnapshot, SchedulerMetrics, SchedulerMetricsSnapshot,
};
pub use simple_timer::{FnTick, SimpleTimer};
pub use thread::{ManagedThread, ThreadControl, ThreadWorker};
pub use timer::{PeriodicScheduler, TickContext, TickHandler};
pub use wake::{DeadlineTimer, Wake, WakeSource};
