//! 周期调度器（PeriodicScheduler）
//!
//! 在托管线程上按可配置周期调用 [`TickHandler::on_tick`]。
//!
//! # 状态机
//!
//! `Idle → start → Armed → (修改周期) → Armed' → stop → Idle`
//!
//! 线程体首次进入时在当前线程上创建唤醒源；之后每一步：
//! 1. 如果配置周期与上次应用的周期不同，重新设置定时器
//!    （首次到期立即或一个完整周期之后；“立即”模式只生效一次）
//! 2. 阻塞等待下一次到期（唯一的挂起点）
//! 3. 醒来后若未请求取消，调用 tick 处理函数，记录返回值作为退出值
//!
//! # 修改周期
//!
//! [`change_interval`](PeriodicScheduler::change_interval) 的效果推迟到下一次定时器检查。
//! 在 tick 处理函数内部通过 [`TickContext::change_interval`] 修改时，
//! 会在下一次等待之前被观察到，因此直接作用于下一个周期。
//!
//! # 示例
//!
//! ```rust,no_run
//! use b2b_runtime::{PeriodicScheduler, TickContext, TickHandler};
//!
//! struct Poll;
//!
//! impl TickHandler for Poll {
//!     type Arg = ();
//!     type Output = u32;
//!
//!     fn on_tick(&mut self, _arg: &(), ctx: &TickContext<'_>) -> u32 {
//!         // 读取传感器 ...
//!         ctx.interval_ms()
//!     }
//! }
//!
//! let mut scheduler = PeriodicScheduler::new("imu-poll", 50, true, Poll);
//! scheduler.start(()).unwrap();
//! std::thread::sleep(std::time::Duration::from_millis(200));
//! scheduler.stop().unwrap();
//! ```

use crate::config::TimerConfig;
use crate::error::{SchedulerError, ThreadError, TimerError};
use crate::metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use crate::thread::{ManagedThread, ThreadControl, ThreadWorker};
use crate::wake::{DeadlineTimer, WakeSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// tick 处理函数
pub trait TickHandler: Send + 'static {
    /// `start()` 传入的参数
    type Arg: Send + 'static;
    /// 每次 tick 的返回值，最后一次的值由 `stop()` 返回
    type Output: Send + 'static;

    /// 每个周期调用一次（在调度器自己的线程上）
    fn on_tick(&mut self, arg: &Self::Arg, ctx: &TickContext<'_>) -> Self::Output;
}

/// tick 处理函数可见的调度器上下文
pub struct TickContext<'a> {
    name: &'a str,
    interval_ms: &'a AtomicU32,
    control: &'a ThreadControl,
}

impl TickContext<'_> {
    /// 修改周期，从下一个周期开始生效
    pub fn change_interval(&self, interval_ms: u32) {
        store_interval(self.name, self.interval_ms, interval_ms);
    }

    /// 当前配置的周期（毫秒）
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms.load(Ordering::Acquire)
    }

    /// 是否已请求停止
    pub fn is_cancel_requested(&self) -> bool {
        self.control.is_cancel_requested()
    }
}

fn store_interval(name: &str, slot: &AtomicU32, interval_ms: u32) {
    if interval_ms == 0 {
        error!("PeriodicScheduler({}) interval is 0. Timer will be disarmed", name);
    }
    slot.store(interval_ms, Ordering::Release);
}

/// 调用方线程与调度线程共享的状态
struct TimerShared<S> {
    name: String,
    /// 配置的周期（毫秒），由 `change_interval` 写入
    interval_ms: AtomicU32,
    /// 定时器处于设置状态
    armed: AtomicBool,
    /// 唤醒源（仅在一次运行持有期间有效）
    timer: Mutex<Option<Arc<S>>>,
    /// 使本次运行结束的唤醒源错误，由下一次 `stop()` 报告
    failure: Mutex<Option<TimerError>>,
    metrics: SchedulerMetrics,
}

/// 调度线程的 worker
struct TimerWorker<H, S> {
    handler: H,
    shared: Arc<TimerShared<S>>,
    /// 上次应用到定时器的周期；每次运行新建唤醒源时复位为 0
    last_interval_ms: u32,
    /// 首次到期立即触发（使用一次后永久清除）
    first_expiration_immediate: bool,
}

impl<H: TickHandler, S: WakeSource> TimerWorker<H, S> {
    /// 唤醒源失败：结束本次运行
    fn fail(&self, err: TimerError, control: &ThreadControl) {
        self.shared.armed.store(false, Ordering::Release);
        if control.is_cancel_requested() {
            // stop 拆除过程中的错误（例如唤醒源已被关闭）
            debug!("PeriodicScheduler({}) timer error during stop: {}", self.shared.name, err);
        } else {
            error!("PeriodicScheduler({}) FAIL: {}", self.shared.name, err);
            *self.shared.failure.lock() = Some(err);
            control.request_cancel();
        }
    }

    /// 取得本次运行的唤醒源，必要时在当前线程上创建
    fn acquire_timer(&mut self, control: &ThreadControl) -> Option<Arc<S>> {
        if let Some(timer) = self.shared.timer.lock().clone() {
            return Some(timer);
        }

        let timer = match S::create(&self.shared.name) {
            Ok(timer) => Arc::new(timer),
            Err(e) => {
                self.fail(e, control);
                return None;
            },
        };
        *self.shared.timer.lock() = Some(timer.clone());
        self.last_interval_ms = 0;
        debug!("PeriodicScheduler({}) timer created", self.shared.name);

        // stop 在唤醒源发布之前已经到达
        if control.is_cancel_requested() {
            return None;
        }
        Some(timer)
    }
}

impl<H: TickHandler, S: WakeSource> ThreadWorker for TimerWorker<H, S> {
    type Arg = H::Arg;
    type Output = H::Output;

    fn step(&mut self, arg: &H::Arg, control: &ThreadControl) -> Option<H::Output> {
        let timer = self.acquire_timer(control)?;

        let interval_ms = self.shared.interval_ms.load(Ordering::Acquire);
        if interval_ms != self.last_interval_ms {
            let period = Duration::from_millis(u64::from(interval_ms));
            let first = if self.first_expiration_immediate {
                Duration::ZERO
            } else {
                period
            };
            self.first_expiration_immediate = false;
            self.last_interval_ms = interval_ms;

            if let Err(e) = timer.arm(period, first) {
                self.fail(e, control);
                return None;
            }
            self.shared.armed.store(interval_ms != 0, Ordering::Release);
            self.shared.metrics.rearms.fetch_add(1, Ordering::Relaxed);
            debug!(
                "PeriodicScheduler({}) armed: period {:?}, first expiration {:?}",
                self.shared.name, period, first
            );
        }

        if let Err(e) = timer.wait() {
            self.fail(e, control);
            return None;
        }
        if control.is_cancel_requested() {
            return None;
        }

        let ctx = TickContext {
            name: &self.shared.name,
            interval_ms: &self.shared.interval_ms,
            control,
        };
        trace!("PeriodicScheduler({}) tick", self.shared.name);
        let output = self.handler.on_tick(arg, &ctx);
        self.shared.metrics.ticks.fetch_add(1, Ordering::Relaxed);
        Some(output)
    }
}

/// 周期调度器
///
/// `S` 是唤醒源实现，默认 [`DeadlineTimer`]。
pub struct PeriodicScheduler<H: TickHandler, S: WakeSource = DeadlineTimer> {
    thread: ManagedThread<TimerWorker<H, S>>,
    shared: Arc<TimerShared<S>>,
}

impl<H: TickHandler> PeriodicScheduler<H> {
    /// 创建使用默认唤醒源的调度器（不启动）
    ///
    /// # 参数
    /// - `interval_ms`: 周期，例如 50 表示 20Hz；0 表示定时器不设置（几乎肯定是配置错误）
    /// - `first_expiration_immediate`: `true` 时启动后立即触发一次，之后每 `interval_ms` 触发；
    ///   `false` 时首次触发在 `interval_ms` 之后
    pub fn new(
        name: impl Into<String>,
        interval_ms: u32,
        first_expiration_immediate: bool,
        handler: H,
    ) -> Self {
        Self::with_wake_source(name, interval_ms, first_expiration_immediate, handler)
    }

    /// 从配置创建
    pub fn from_config(name: impl Into<String>, config: &TimerConfig, handler: H) -> Self {
        Self::new(
            name,
            config.interval_ms,
            config.first_expiration_immediate,
            handler,
        )
    }
}

impl<H: TickHandler, S: WakeSource> PeriodicScheduler<H, S> {
    /// 使用指定唤醒源实现创建调度器
    pub fn with_wake_source(
        name: impl Into<String>,
        interval_ms: u32,
        first_expiration_immediate: bool,
        handler: H,
    ) -> Self {
        let name = name.into();
        if interval_ms == 0 {
            error!("PeriodicScheduler({}) interval is 0. Timer will be disarmed", name);
        }

        let shared = Arc::new(TimerShared {
            name: name.clone(),
            interval_ms: AtomicU32::new(interval_ms),
            armed: AtomicBool::new(false),
            timer: Mutex::new(None),
            failure: Mutex::new(None),
            metrics: SchedulerMetrics::new(),
        });
        let worker = TimerWorker {
            handler,
            shared: shared.clone(),
            last_interval_ms: 0,
            first_expiration_immediate,
        };

        Self {
            thread: ManagedThread::new(name, worker),
            shared,
        }
    }

    /// 名称
    pub fn name(&self) -> &str {
        self.thread.name()
    }

    /// 启动调度线程
    ///
    /// 上一次运行因唤醒源错误自行结束而未被 `stop()` 时，先在这里收尾，
    /// 该错误只记录日志，不再由之后的 `stop()` 报告。
    ///
    /// # 错误
    /// - `SchedulerError::Thread`: 已在运行，或线程创建失败
    pub fn start(&mut self, arg: H::Arg) -> Result<(), SchedulerError> {
        if self.thread.is_finished()
            && let Err(e) = self.stop_inner(None)
        {
            warn!("PeriodicScheduler({}) previous run ended with: {}", self.shared.name, e);
        }
        *self.shared.failure.lock() = None;
        self.thread.start(arg)?;
        Ok(())
    }

    /// 停止调度线程并销毁唤醒源
    ///
    /// 请求取消 → 强制唤醒源立即到期 → join → 销毁唤醒源。
    /// 每一步都会执行，返回遇到的第一个错误。返回后 tick 处理函数不会再被调用。
    ///
    /// # 返回
    /// 最后一次 tick 的返回值
    ///
    /// # 错误
    /// - `SchedulerError::Thread(ThreadError::NotRunning)`: 未启动
    /// - `SchedulerError::Timer`: 强制到期 / 销毁失败，或唤醒源错误使本次运行提前结束
    pub fn stop(&mut self) -> Result<Option<H::Output>, SchedulerError> {
        self.stop_inner(None)
    }

    /// 有界等待的 stop，超时返回 `ThreadError::StopTimeout`
    pub fn stop_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<H::Output>, SchedulerError> {
        self.stop_inner(Some(timeout))
    }

    fn stop_inner(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<H::Output>, SchedulerError> {
        let mut first_err: Option<SchedulerError> = None;

        self.thread.request_cancel();

        // 立即到期，不必等待一个过期的完整周期
        let timer = self.shared.timer.lock().clone();
        if let Some(timer) = timer {
            match timer.fire_now() {
                Ok(()) => {
                    self.shared.metrics.forced_wakes.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    error!("PeriodicScheduler::stop({}) FAIL: {}", self.shared.name, e);
                    first_err.get_or_insert(e.into());
                },
            }
        }

        let joined = match timeout {
            None => self.thread.stop(),
            Some(timeout) => self.thread.stop_timeout(timeout),
        };
        let output = match joined {
            Ok(output) => output,
            Err(ThreadError::NotRunning) => return Err(ThreadError::NotRunning.into()),
            Err(e) => {
                first_err.get_or_insert(e.into());
                None
            },
        };

        let timer = self.shared.timer.lock().take();
        if let Some(timer) = timer
            && let Err(e) = timer.close()
        {
            error!("PeriodicScheduler::stop({}) FAIL: {}", self.shared.name, e);
            first_err.get_or_insert(e.into());
        }
        self.shared.armed.store(false, Ordering::Release);

        if let Some(e) = self.shared.failure.lock().take() {
            first_err.get_or_insert(e.into());
        }

        match first_err {
            None => {
                debug!("PeriodicScheduler::stop({}) SUCCESS", self.shared.name);
                Ok(output)
            },
            Some(e) => Err(e),
        }
    }

    /// 修改周期
    ///
    /// 总是成功。0 会解除定时器（记录为可能的配置错误）。
    /// 效果推迟到下一次定时器检查：从其它线程调用时，最早在下一次已排定的 tick 之后生效。
    pub fn change_interval(&self, interval_ms: u32) -> Result<(), SchedulerError> {
        store_interval(&self.shared.name, &self.shared.interval_ms, interval_ms);
        Ok(())
    }

    /// 当前配置的周期（毫秒）
    pub fn interval_ms(&self) -> u32 {
        self.shared.interval_ms.load(Ordering::Acquire)
    }

    /// 定时器是否处于设置状态
    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// 调度线程是否正在运行
    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// 是否已请求停止
    pub fn is_cancel_requested(&self) -> bool {
        self.thread.is_cancel_requested()
    }

    /// 指标快照
    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 在调度线程未运行时访问 tick 处理函数
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        self.thread.with_worker(|worker| f(&mut worker.handler))
    }
}

impl<H: TickHandler, S: WakeSource> Drop for PeriodicScheduler<H, S> {
    fn drop(&mut self) {
        if self.thread.is_created()
            && let Err(e) = self.stop()
        {
            error!("PeriodicScheduler({}) stop on drop failed: {}", self.shared.name, e);
        }
    }
}
