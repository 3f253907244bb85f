//! 异步列表执行器（AsyncListExecutor）
//!
//! 在后台线程上按顺序执行调用方提交的一组工作项，支持单次/循环执行、
//! 安全抢占和停止。每个会话的完成回调最多触发一次，且从不在持锁时触发。
//!
//! # 会话规则
//!
//! - 同一时刻最多一个会话在执行
//! - 非循环会话执行中再次 `execute_list`：拒绝（`ExecError::Busy`），原会话不受影响
//! - 循环会话执行中再次 `execute_list`：抢占，旧会话的回调以 `NewStart` 触发
//! - `stop_executing` 不会打断正在执行的单项，只取消列表剩余部分
//!
//! # 示例
//!
//! ```rust,no_run
//! use b2b_runtime::{AsyncListExecutor, DoneReason, FnListWorker, done_callback};
//! use std::time::Duration;
//!
//! let worker = FnListWorker::new(
//!     |frame: &String| {
//!         println!("show {}", frame);
//!         true
//!     },
//!     Duration::from_millis(10),
//! );
//! let mut executor = AsyncListExecutor::new("display", worker);
//! executor.start().unwrap();
//!
//! let frames = ["a.png", "b.png"];
//! executor
//!     .execute_list(
//!         "DisplayImageFiles",
//!         &frames,
//!         |names| Ok::<_, String>(names.iter().map(|n| n.to_string()).collect()),
//!         false,
//!         Some(done_callback(|reason| reason == DoneReason::Complete)),
//!     )
//!     .unwrap();
//! ```

use crate::clock::monotonic_millis;
use crate::config::ExecutorConfig;
use crate::done::{DoneCallback, DoneReason};
use crate::error::{ExecError, ThreadError};
use crate::metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
use crate::thread::{ManagedThread, ThreadControl, ThreadWorker};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// `ListWorker::yield_now` 的默认让出时长
pub const DEFAULT_YIELD: Duration = Duration::from_millis(10);

/// 驱动方提供的单项执行钩子
pub trait ListWorker<T>: Send + 'static {
    /// 执行一项（可以阻塞）
    ///
    /// 返回 `false` 停止整个会话，完成回调以 `DoneReason::Stop` 触发。
    fn execute(&mut self, item: &T) -> bool;

    /// 每轮后台循环结束时调用一次，必须让出 CPU
    fn yield_now(&mut self) {
        spin_sleep::sleep(DEFAULT_YIELD);
    }
}

/// 闭包形式的 [`ListWorker`]
pub struct FnListWorker<F> {
    execute: F,
    yield_period: Duration,
}

impl<F> FnListWorker<F> {
    pub fn new(execute: F, yield_period: Duration) -> Self {
        Self {
            execute,
            yield_period,
        }
    }
}

impl<T, F> ListWorker<T> for FnListWorker<F>
where
    F: FnMut(&T) -> bool + Send + 'static,
{
    fn execute(&mut self, item: &T) -> bool {
        (self.execute)(item)
    }

    fn yield_now(&mut self) {
        spin_sleep::sleep(self.yield_period);
    }
}

/// `stop_executing` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 没有正在执行的会话（空操作，不触发回调）
    Idle,
    /// 停止了一个会话
    Stopped {
        /// 被停止会话的列表长度
        items: usize,
    },
}

/// 会话状态（受单把锁保护）
struct ExecState<T> {
    in_progress: bool,
    /// 每个会话整体替换
    items: Arc<[T]>,
    loop_flag: bool,
    done_callback: Option<DoneCallback>,
    /// 单调递增的会话 ID，reset 不清零
    session: u64,
    /// 后台线程已启动且未被 join
    attached: bool,
    /// 静默停止的会话回调，交给后台线程以 `Stop` 触发
    stopped_pending: Vec<(u64, DoneCallback)>,
}

impl<T> ExecState<T> {
    fn new() -> Self {
        Self {
            in_progress: false,
            items: Arc::from(Vec::new()),
            loop_flag: false,
            done_callback: None,
            session: 0,
            attached: false,
            stopped_pending: Vec::new(),
        }
    }

    /// 回到空闲；唯一清除 `done_callback` 的路径
    fn reset(&mut self) {
        self.in_progress = false;
        self.items = Arc::from(Vec::new());
        self.loop_flag = false;
        self.done_callback = None;
    }
}

/// 会话状态的只读拷贝
#[cfg(any(test, feature = "test-util"))]
#[derive(Clone)]
pub struct ExecStateView<T> {
    pub in_progress: bool,
    pub items: Arc<[T]>,
    pub loop_flag: bool,
    pub has_callback: bool,
    pub session: u64,
}

struct ExecShared<T> {
    name: String,
    state: Mutex<ExecState<T>>,
    metrics: ExecutorMetrics,
}

impl<T> ExecShared<T> {
    /// 触发完成回调（调用方不得持锁）
    fn fire(&self, callback: &DoneCallback, reason: DoneReason) {
        self.metrics.callbacks_fired.fetch_add(1, Ordering::Relaxed);
        if !callback(reason) {
            debug!("{}: done callback returned false for {}", self.name, reason);
        }
    }

    /// 以 `Stop` 触发静默停止留下的回调（调用方不得持锁）
    fn fire_stopped(&self, pending: Vec<(u64, DoneCallback)>) {
        for (session, callback) in pending {
            debug!("{}: reporting quiet stop of session {}", self.name, session);
            self.fire(&callback, DoneReason::Stop);
        }
    }
}

/// 执行器句柄
///
/// 可克隆，可以交给其它线程或完成回调，用来提交/停止列表。
pub struct ExecutorHandle<T> {
    shared: Arc<ExecShared<T>>,
}

impl<T> Clone for ExecutorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for ExecutorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle").field("name", &self.shared.name).finish()
    }
}

impl<T: Send + Sync + 'static> ExecutorHandle<T> {
    /// 执行器名称
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 提交一个列表
    ///
    /// # 参数
    /// - `label`: 日志标签（通常是调用方的方法名）
    /// - `items`: 调用方的条目
    /// - `build`: 把条目转换为内部执行项。**持锁调用**，必须快速且不能回调执行器
    /// - `loop_flag`: `true` 时循环执行直到 `stop_executing` 或被抢占
    /// - `done_callback`: 会话结束时调用一次；循环会话只会因停止或抢占而结束
    ///
    /// # 错误
    /// - `ExecError::Busy`: 非循环会话正在执行（原会话不受影响）
    /// - `ExecError::BuildFailed` / `ExecError::EmptyList`: 构建失败或结果为空，执行器回到空闲
    ///
    /// 抢占了循环会话时，旧会话的回调在释放锁之后以 `NewStart` 触发，
    /// 此时新会话已经安装完毕；构建失败时同样触发。
    pub fn execute_list<Item, E, B>(
        &self,
        label: &str,
        items: &[Item],
        build: B,
        loop_flag: bool,
        done_callback: Option<DoneCallback>,
    ) -> Result<(), ExecError>
    where
        B: FnOnce(&[Item]) -> Result<Vec<T>, E>,
        E: fmt::Display,
    {
        let shared = &*self.shared;
        let mut preempted: Option<DoneCallback> = None;

        let result = {
            let mut state = shared.state.lock();

            if state.in_progress {
                if !state.loop_flag {
                    drop(state);
                    info!(
                        "{}({}) ignored because it is already busy executing a previous list",
                        label,
                        items.len()
                    );
                    shared.metrics.busy_rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(ExecError::Busy {
                        label: label.to_string(),
                        items: items.len(),
                    });
                }

                // 抢占循环会话；回调留到释放锁之后
                preempted = state.done_callback.take();
                let stopped = state.items.len();
                shared.metrics.sessions_preempted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{}::StopExecuting({}): {} at {} (items={})",
                    shared.name,
                    DoneReason::NewStart,
                    DoneReason::NewStart.stop_label(),
                    monotonic_millis(),
                    stopped
                );
            }

            state.reset();
            state.loop_flag = loop_flag;
            state.done_callback = done_callback;

            match build(items) {
                Err(e) => {
                    state.reset();
                    Err(ExecError::BuildFailed {
                        label: label.to_string(),
                        reason: e.to_string(),
                    })
                },
                Ok(built) if built.is_empty() => {
                    state.reset();
                    Err(ExecError::EmptyList {
                        label: label.to_string(),
                    })
                },
                Ok(built) => {
                    state.items = Arc::from(built);
                    state.session += 1;
                    state.in_progress = true;
                    debug!(
                        "{}: {} started session {} ({} items, loop={})",
                        shared.name,
                        label,
                        state.session,
                        state.items.len(),
                        loop_flag
                    );
                    Ok(())
                },
            }
        };

        match &result {
            Ok(()) => {
                shared.metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                shared.metrics.build_failures.fetch_add(1, Ordering::Relaxed);
                error!("{}: {}", shared.name, e);
            },
        }

        if let Some(callback) = preempted {
            shared.fire(&callback, DoneReason::NewStart);
        }

        result
    }

    /// 只执行一项，等价于长度为 1 的 `execute_list`
    pub fn execute<Item, E, B>(
        &self,
        label: &str,
        item: Item,
        build: B,
        loop_flag: bool,
        done_callback: Option<DoneCallback>,
    ) -> Result<(), ExecError>
    where
        B: FnOnce(&[Item]) -> Result<Vec<T>, E>,
        E: fmt::Display,
    {
        self.execute_list(label, std::slice::from_ref(&item), build, loop_flag, done_callback)
    }

    /// 停止当前会话
    ///
    /// 不打断正在执行的单项，只取消列表剩余部分。
    ///
    /// - `reason`: 传给完成回调，并用于日志
    /// - `execute_callback`: `true` 时在此处（释放锁后）触发回调；
    ///   `false` 时回调交给后台线程，观察到停止后以 `DoneReason::Stop` 触发一次；
    ///   后台线程未启动时回调被丢弃
    /// - `verbose`: `true` 用 info 级别记录，否则 debug
    pub fn stop_executing(
        &self,
        reason: DoneReason,
        execute_callback: bool,
        verbose: bool,
    ) -> StopOutcome {
        let shared = &*self.shared;
        let (callback, items) = {
            let mut state = shared.state.lock();
            if !state.in_progress {
                return StopOutcome::Idle;
            }
            let mut callback = state.done_callback.take();
            let items = state.items.len();
            if !execute_callback
                && state.attached
                && let Some(cb) = callback.take()
            {
                let session = state.session;
                state.stopped_pending.push((session, cb));
            }
            state.reset();
            (callback, items)
        };

        match reason {
            DoneReason::NewStart => {
                shared.metrics.sessions_preempted.fetch_add(1, Ordering::Relaxed)
            },
            _ => shared.metrics.sessions_stopped.fetch_add(1, Ordering::Relaxed),
        };

        if verbose {
            info!(
                "{}::StopExecuting({}): {} at {} (items={})",
                shared.name,
                reason,
                reason.stop_label(),
                monotonic_millis(),
                items
            );
        } else {
            debug!(
                "{}::StopExecuting({}): {} at {} (items={})",
                shared.name,
                reason,
                reason.stop_label(),
                monotonic_millis(),
                items
            );
        }

        if execute_callback && let Some(callback) = callback {
            shared.fire(&callback, reason);
        }

        StopOutcome::Stopped { items }
    }

    /// 是否有会话在执行（尽力而为的快照）
    pub fn is_executing(&self) -> bool {
        self.shared.state.lock().in_progress
    }

    /// 指标快照
    pub fn metrics(&self) -> ExecutorMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 会话状态拷贝（测试用）
    #[cfg(any(test, feature = "test-util"))]
    pub fn state_view(&self) -> ExecStateView<T> {
        let state = self.shared.state.lock();
        ExecStateView {
            in_progress: state.in_progress,
            items: state.items.clone(),
            loop_flag: state.loop_flag,
            has_callback: state.done_callback.is_some(),
            session: state.session,
        }
    }

    fn attach(&self) {
        self.shared.state.lock().attached = true;
    }

    /// 后台线程已 join：触发它没来得及处理的停止回调
    fn detach(&self) {
        let pending = {
            let mut state = self.shared.state.lock();
            state.attached = false;
            std::mem::take(&mut state.stopped_pending)
        };
        self.shared.fire_stopped(pending);
    }

    /// 丢弃当前会话，不触发回调
    fn discard(&self) {
        let mut state = self.shared.state.lock();
        state.reset();
        state.attached = false;
        state.stopped_pending.clear();
    }
}

/// 后台线程的 worker：每一步是一轮执行
struct ListRunner<T, W> {
    worker: W,
    shared: Arc<ExecShared<T>>,
}

impl<T, W> ListRunner<T, W>
where
    T: Send + Sync + 'static,
    W: ListWorker<T>,
{
    /// 执行一个会话快照
    fn run_session(&mut self, items: &[T], session: u64) {
        let shared = &*self.shared;

        for (index, item) in items.iter().enumerate() {
            trace!("{}: session {} item {}/{}", shared.name, session, index + 1, items.len());
            let keep_going = self.worker.execute(item);
            shared.metrics.items_executed.fetch_add(1, Ordering::Relaxed);

            let mut state = shared.state.lock();
            if !state.in_progress || state.session != session {
                // 已被停止或替换：只有静默停止留下的回调归这里触发
                let pending = std::mem::take(&mut state.stopped_pending);
                drop(state);
                debug!("{}: session {} ended externally", shared.name, session);
                shared.fire_stopped(pending);
                return;
            }
            if !keep_going {
                let callback = state.done_callback.take();
                state.reset();
                drop(state);

                shared.metrics.sessions_stopped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{}: session {} stopped by item {}/{}",
                    shared.name,
                    session,
                    index + 1,
                    items.len()
                );
                if let Some(callback) = callback {
                    shared.fire(&callback, DoneReason::Stop);
                }
                return;
            }
        }

        let mut state = shared.state.lock();
        if !state.in_progress || state.session != session {
            let pending = std::mem::take(&mut state.stopped_pending);
            drop(state);
            shared.fire_stopped(pending);
            return;
        }
        if state.loop_flag {
            // 循环会话保持状态，下一轮重新执行
            return;
        }
        let callback = state.done_callback.take();
        state.reset();
        drop(state);

        shared.metrics.sessions_completed.fetch_add(1, Ordering::Relaxed);
        debug!("{}: session {} complete", shared.name, session);
        if let Some(callback) = callback {
            shared.fire(&callback, DoneReason::Complete);
        }
    }
}

impl<T, W> ThreadWorker for ListRunner<T, W>
where
    T: Send + Sync + 'static,
    W: ListWorker<T>,
{
    type Arg = ();
    type Output = ();

    fn step(&mut self, _arg: &(), _control: &ThreadControl) -> Option<()> {
        let (snapshot, pending) = {
            let mut state = self.shared.state.lock();
            // 让出期间被静默停止的会话
            let pending = std::mem::take(&mut state.stopped_pending);
            let snapshot = (state.in_progress && !state.items.is_empty())
                .then(|| (state.items.clone(), state.session));
            (snapshot, pending)
        };

        self.shared.fire_stopped(pending);
        if let Some((items, session)) = snapshot {
            self.run_session(&items, session);
        }

        self.worker.yield_now();
        None
    }
}

/// 异步列表执行器
///
/// `T` 是内部执行项，`W` 是驱动方的执行钩子。
/// 提交/停止操作也可以通过 [`handle`](Self::handle) 返回的句柄在其它线程调用。
pub struct AsyncListExecutor<T, W>
where
    T: Send + Sync + 'static,
    W: ListWorker<T>,
{
    thread: ManagedThread<ListRunner<T, W>>,
    handle: ExecutorHandle<T>,
}

impl<T, F> AsyncListExecutor<T, FnListWorker<F>>
where
    T: Send + Sync + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    /// 从闭包和配置创建（让出时长取 `config.yield_ms`）
    pub fn from_fn(name: impl Into<String>, execute: F, config: &ExecutorConfig) -> Self {
        Self::new(name, FnListWorker::new(execute, config.yield_period()))
    }
}

impl<T, W> AsyncListExecutor<T, W>
where
    T: Send + Sync + 'static,
    W: ListWorker<T>,
{
    /// 创建执行器（不启动后台线程）
    pub fn new(name: impl Into<String>, worker: W) -> Self {
        let name = name.into();
        let shared = Arc::new(ExecShared {
            name: name.clone(),
            state: Mutex::new(ExecState::new()),
            metrics: ExecutorMetrics::new(),
        });
        let runner = ListRunner {
            worker,
            shared: shared.clone(),
        };
        Self {
            thread: ManagedThread::new(name, runner),
            handle: ExecutorHandle { shared },
        }
    }

    /// 名称
    pub fn name(&self) -> &str {
        self.thread.name()
    }

    /// 可克隆的句柄
    pub fn handle(&self) -> ExecutorHandle<T> {
        self.handle.clone()
    }

    /// 启动后台线程
    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.thread.start(())?;
        self.handle.attach();
        Ok(())
    }

    /// 停止后台线程（等待正在执行的单项结束）
    ///
    /// 会话状态保留，重新 `start()` 后继续执行。
    /// 线程退出前未处理的静默停止在这里以 `DoneReason::Stop` 通知。
    pub fn stop(&mut self) -> Result<(), ThreadError> {
        let result = self.thread.stop().map(|_| ());
        self.handle.detach();
        result
    }

    /// 有界等待的 stop
    ///
    /// 超时放弃的线程仍持有它接手的会话，不会在这里通知。
    pub fn stop_timeout(&mut self, timeout: Duration) -> Result<(), ThreadError> {
        self.thread.stop_timeout(timeout)?;
        self.handle.detach();
        Ok(())
    }

    /// 后台线程是否正在运行
    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// 等待后台线程开始执行
    pub fn wait_for_start(
        &self,
        poll: Duration,
        timeout: Duration,
    ) -> Result<ThreadId, ThreadError> {
        self.thread.wait_for_start(poll, timeout)
    }

    /// 在后台线程未运行时访问执行钩子
    pub fn with_worker<R>(&self, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        self.thread.with_worker(|runner| f(&mut runner.worker))
    }

    /// 见 [`ExecutorHandle::execute_list`]
    pub fn execute_list<Item, E, B>(
        &self,
        label: &str,
        items: &[Item],
        build: B,
        loop_flag: bool,
        done_callback: Option<DoneCallback>,
    ) -> Result<(), ExecError>
    where
        B: FnOnce(&[Item]) -> Result<Vec<T>, E>,
        E: fmt::Display,
    {
        self.handle.execute_list(label, items, build, loop_flag, done_callback)
    }

    /// 见 [`ExecutorHandle::execute`]
    pub fn execute<Item, E, B>(
        &self,
        label: &str,
        item: Item,
        build: B,
        loop_flag: bool,
        done_callback: Option<DoneCallback>,
    ) -> Result<(), ExecError>
    where
        B: FnOnce(&[Item]) -> Result<Vec<T>, E>,
        E: fmt::Display,
    {
        self.handle.execute(label, item, build, loop_flag, done_callback)
    }

    /// 见 [`ExecutorHandle::stop_executing`]
    pub fn stop_executing(
        &self,
        reason: DoneReason,
        execute_callback: bool,
        verbose: bool,
    ) -> StopOutcome {
        self.handle.stop_executing(reason, execute_callback, verbose)
    }

    pub fn is_executing(&self) -> bool {
        self.handle.is_executing()
    }

    pub fn metrics(&self) -> ExecutorMetricsSnapshot {
        self.handle.metrics()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn state_view(&self) -> ExecStateView<T> {
        self.handle.state_view()
    }
}

impl<T, W> Drop for AsyncListExecutor<T, W>
where
    T: Send + Sync + 'static,
    W: ListWorker<T>,
{
    fn drop(&mut self) {
        if self.thread.is_created()
            && let Err(e) = self.thread.stop()
        {
            error!("AsyncListExecutor({}) stop on drop failed: {}", self.handle.name(), e);
        }
        self.handle.discard();
    }
}
