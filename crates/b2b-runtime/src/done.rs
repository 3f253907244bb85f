//! 完成原因与完成回调
//!
//! 列表执行器向调用方报告会话结束时使用的共享词汇。

use std::fmt;
use std::sync::Arc;

/// 会话被宣告“结束”的原因
///
/// - **Complete**: 列表（非循环）自然执行完毕
/// - **Stop**: 外部请求停止，或单项执行返回“停止”
/// - **NewStart**: 新的 `execute_list` 抢占了仍在运行的循环会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoneReason {
    /// 执行完成
    Complete,
    /// 被停止
    Stop,
    /// 被新的请求抢占
    NewStart,
}

impl DoneReason {
    /// 日志用字符串
    pub const fn as_str(self) -> &'static str {
        match self {
            DoneReason::Complete => "COMPLETE",
            DoneReason::Stop => "STOP",
            DoneReason::NewStart => "NEWSTART",
        }
    }

    /// `stop_executing` 日志使用的标签
    ///
    /// `NewStart` 渲染为 `STOP(NEWSTART)`，便于和普通 STOP 区分。
    pub fn stop_label(self) -> String {
        match self {
            DoneReason::NewStart => format!("STOP({})", self.as_str()),
            _ => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 完成回调
///
/// 每个会话最多调用一次，且永远不会在执行器持锁时调用，
/// 因此回调内部可以安全地再次调用执行器（例如启动下一个列表）。
///
/// 返回值表示回调自身是否成功，执行器只记录日志。
pub type DoneCallback = Arc<dyn Fn(DoneReason) -> bool + Send + Sync>;

/// 从闭包构造 [`DoneCallback`]
///
/// ```
/// use b2b_runtime::{DoneReason, done_callback};
///
/// let cb = done_callback(|reason| reason == DoneReason::Complete);
/// assert!(cb(DoneReason::Complete));
/// ```
pub fn done_callback<F>(f: F) -> DoneCallback
where
    F: Fn(DoneReason) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}
