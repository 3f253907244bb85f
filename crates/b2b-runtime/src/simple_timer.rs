//! 闭包驱动的简单定时器
//!
//! 不需要单独实现 [`TickHandler`] 时使用：每个周期调用一次闭包。

use crate::error::SchedulerError;
use crate::metrics::SchedulerMetricsSnapshot;
use crate::timer::{PeriodicScheduler, TickContext, TickHandler};

/// 把闭包包装成 tick 处理函数
pub struct FnTick<F>(F);

impl<F> TickHandler for FnTick<F>
where
    F: FnMut(&TickContext<'_>) -> bool + Send + 'static,
{
    type Arg = ();
    type Output = bool;

    fn on_tick(&mut self, _arg: &(), ctx: &TickContext<'_>) -> bool {
        (self.0)(ctx)
    }
}

/// 简单定时器
///
/// ```rust,no_run
/// use b2b_runtime::SimpleTimer;
///
/// let mut timer = SimpleTimer::new("blink", 500, false, |_ctx| {
///     println!("tick");
///     true
/// });
/// timer.start().unwrap();
/// std::thread::sleep(std::time::Duration::from_secs(2));
/// timer.stop().unwrap();
/// ```
pub struct SimpleTimer<F>
where
    F: FnMut(&TickContext<'_>) -> bool + Send + 'static,
{
    inner: PeriodicScheduler<FnTick<F>>,
}

impl<F> SimpleTimer<F>
where
    F: FnMut(&TickContext<'_>) -> bool + Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        interval_ms: u32,
        first_expiration_immediate: bool,
        callback: F,
    ) -> Self {
        Self {
            inner: PeriodicScheduler::new(
                name,
                interval_ms,
                first_expiration_immediate,
                FnTick(callback),
            ),
        }
    }

    pub fn start(&mut self) -> Result<(), SchedulerError> {
        self.inner.start(())
    }

    /// 停止；返回最后一次回调的返回值
    pub fn stop(&mut self) -> Result<Option<bool>, SchedulerError> {
        self.inner.stop()
    }

    pub fn change_interval(&self, interval_ms: u32) -> Result<(), SchedulerError> {
        self.inner.change_interval(interval_ms)
    }

    pub fn interval_ms(&self) -> u32 {
        self.inner.interval_ms()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.inner.metrics()
    }
}
