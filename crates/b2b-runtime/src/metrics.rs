//! 运行时指标模块
//!
//! 原子计数器，记录列表执行器的会话生命周期和周期调度器的唤醒情况。
//! 所有计数器都使用 `Ordering::Relaxed`，可在任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 列表执行器指标
///
/// ```rust
/// use b2b_runtime::ExecutorMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ExecutorMetrics::new();
/// metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().sessions_started, 1);
/// ```
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    /// 成功启动的会话数
    pub sessions_started: AtomicU64,

    /// 自然完成（COMPLETE）的会话数
    pub sessions_completed: AtomicU64,

    /// 被停止（STOP，外部停止或单项返回 false）的会话数
    pub sessions_stopped: AtomicU64,

    /// 被新请求抢占（NEWSTART）的循环会话数
    pub sessions_preempted: AtomicU64,

    /// 因忙碌被拒绝的 `execute_list` 次数
    pub busy_rejections: AtomicU64,

    /// builder 失败或返回空列表的次数
    pub build_failures: AtomicU64,

    /// 已执行的单项总数
    pub items_executed: AtomicU64,

    /// 已触发的完成回调数
    pub callbacks_fired: AtomicU64,
}

impl ExecutorMetrics {
    /// 创建新的指标实例（所有计数器为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> ExecutorMetricsSnapshot {
        ExecutorMetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_stopped: self.sessions_stopped.load(Ordering::Relaxed),
            sessions_preempted: self.sessions_preempted.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            items_executed: self.items_executed.load(Ordering::Relaxed),
            callbacks_fired: self.callbacks_fired.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.sessions_completed.store(0, Ordering::Relaxed);
        self.sessions_stopped.store(0, Ordering::Relaxed);
        self.sessions_preempted.store(0, Ordering::Relaxed);
        self.busy_rejections.store(0, Ordering::Relaxed);
        self.build_failures.store(0, Ordering::Relaxed);
        self.items_executed.store(0, Ordering::Relaxed);
        self.callbacks_fired.store(0, Ordering::Relaxed);
    }
}

/// 列表执行器指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorMetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_stopped: u64,
    pub sessions_preempted: u64,
    pub busy_rejections: u64,
    pub build_failures: u64,
    pub items_executed: u64,
    pub callbacks_fired: u64,
}

/// 周期调度器指标
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// tick 处理函数被调用的次数
    pub ticks: AtomicU64,

    /// 定时器重新设置周期的次数（包括首次设置）
    pub rearms: AtomicU64,

    /// `stop()` 强制立即到期的次数
    pub forced_wakes: AtomicU64,
}

impl SchedulerMetrics {
    /// 创建新的指标实例
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            rearms: self.rearms.load(Ordering::Relaxed),
            forced_wakes: self.forced_wakes.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.rearms.store(0, Ordering::Relaxed);
        self.forced_wakes.store(0, Ordering::Relaxed);
    }
}

/// 周期调度器指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub rearms: u64,
    pub forced_wakes: u64,
}
