//! 托管线程（ManagedThread）
//!
//! 每个实例独占一个后台线程，为上层（周期调度器、列表执行器）提供干净的
//! start/stop 约定：
//!
//! - `start(arg)` 创建线程，线程体反复调用 [`ThreadWorker::step`]，直到观察到取消请求
//! - `stop()` 设置协作式取消标志并 **阻塞 join**，保证上层在释放相关资源之前
//!   线程体已经真正退出；返回最后一次 `step` 的输出
//! - 取消完全是协作式的：没有任何强制终止线程的手段
//!
//! `stop()` 之后可以再次 `start()`。worker 在两次运行之间保留自身状态。
//!
//! # 示例
//!
//! ```rust
//! use b2b_runtime::{ManagedThread, ThreadControl, ThreadWorker};
//!
//! struct Counter(u32);
//!
//! impl ThreadWorker for Counter {
//!     type Arg = u32;
//!     type Output = u32;
//!
//!     fn step(&mut self, step: &u32, _control: &ThreadControl) -> Option<u32> {
//!         self.0 += *step;
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!         Some(self.0)
//!     }
//! }
//!
//! let mut thread = ManagedThread::new("counter", Counter(0));
//! thread.start(2).unwrap();
//! std::thread::sleep(std::time::Duration::from_millis(10));
//! let last = thread.stop().unwrap();
//! assert!(last.unwrap() >= 2);
//! ```

use crate::error::ThreadError;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Drop 时仍在运行的线程最多等待这么久
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 线程体单步
///
/// 由上层实现，在后台线程中被反复调用，直到取消请求被观察到。
/// 长时间运行的 `step` 应自行轮询 [`ThreadControl::is_cancel_requested`]。
pub trait ThreadWorker: Send + 'static {
    /// `start()` 传入的参数，移动到后台线程，每次 `step` 以引用形式传入
    type Arg: Send + 'static;
    /// `stop()` 返回的退出值
    type Output: Send + 'static;

    /// 执行一步
    ///
    /// 返回 `Some` 时更新线程退出值；`None` 保留上一次的值。
    fn step(&mut self, arg: &Self::Arg, control: &ThreadControl) -> Option<Self::Output>;
}

/// 单次运行的控制块
///
/// 每次 `start()` 都会创建新的控制块。被有界 stop 放弃的线程保留自己的控制块，
/// 因此重新启动的线程不会与被放弃的线程共享取消标志。
#[derive(Debug, Default)]
pub struct ThreadControl {
    /// 协作式取消请求
    cancel: AtomicBool,
    /// 线程体正在运行
    running: AtomicBool,
    /// 线程 ID（仅在线程体运行期间有效）
    thread_id: Mutex<Option<ThreadId>>,
}

impl ThreadControl {
    /// 是否已请求取消
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// 线程体是否正在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 线程 ID（线程体开始执行后可用）
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// 线程体退出（包括 panic 展开）时清除运行标志
struct RunningGuard<'a>(&'a ThreadControl);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.0.thread_id.lock() = None;
        self.0.running.store(false, Ordering::Release);
    }
}

/// 一次运行：线程句柄 + 控制块
struct Run<O> {
    handle: JoinHandle<Option<O>>,
    control: Arc<ThreadControl>,
}

/// 托管线程
///
/// 线程生命周期状态：
/// - **created**: `start()` 成功后同步置位，`stop()` 后清除
/// - **running**: 线程体进入时置位，返回前清除
///
/// 不变式：running 意味着 created。
pub struct ManagedThread<W: ThreadWorker> {
    /// 名称（同时用作 OS 线程名和日志标签）
    name: String,
    /// worker 槽位：运行期间由线程体取走，退出时放回
    worker: Arc<Mutex<Option<W>>>,
    /// 当前运行（None 表示未创建）
    run: Option<Run<W::Output>>,
}

impl<W: ThreadWorker> ManagedThread<W> {
    /// 创建托管线程（不启动）
    pub fn new(name: impl Into<String>, worker: W) -> Self {
        Self {
            name: name.into(),
            worker: Arc::new(Mutex::new(Some(worker))),
            run: None,
        }
    }

    /// 名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 启动线程
    ///
    /// 线程体已经自行退出（例如上层在线程内请求了取消）时，先回收旧线程再启动。
    ///
    /// # 错误
    /// - `ThreadError::AlreadyRunning`: 线程仍在运行（调用方 bug，不会静默重启）
    /// - `ThreadError::WorkerLost`: 上一次运行 panic 或仍被放弃的线程持有
    /// - `ThreadError::SpawnFailed`: 操作系统拒绝创建线程
    pub fn start(&mut self, arg: W::Arg) -> Result<(), ThreadError> {
        if self.is_finished() {
            self.reap();
        }
        if self.run.is_some() {
            error!(
                "ManagedThread::start({}) FAIL: thread still running, call stop() first",
                self.name
            );
            return Err(ThreadError::AlreadyRunning);
        }
        if self.worker.lock().is_none() {
            error!(
                "ManagedThread::start({}) FAIL: worker not available",
                self.name
            );
            return Err(ThreadError::WorkerLost);
        }

        let control = Arc::new(ThreadControl::default());
        let control_clone = control.clone();
        let worker_slot = self.worker.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || thread_body(worker_slot, arg, control_clone, name))
            .map_err(|e| {
                error!(
                    "ManagedThread::start({}) FAIL. spawn error: {} (os code {:?})",
                    self.name,
                    e,
                    e.raw_os_error()
                );
                ThreadError::SpawnFailed(e)
            })?;

        self.run = Some(Run { handle, control });
        Ok(())
    }

    /// 停止线程并等待其退出
    ///
    /// 设置取消标志后阻塞 join。worker 的 `step` 必须在合理时间内返回，
    /// 否则此方法一直阻塞；需要上限时使用 [`stop_timeout`](Self::stop_timeout)。
    ///
    /// # 返回
    /// 最后一次 `step` 返回的 `Some` 值；线程体一次都没有产出时为 `None`。
    ///
    /// # 错误
    /// - `ThreadError::NotRunning`: 没有已创建的线程（无害的空操作）
    /// - `ThreadError::JoinFailed`: 线程体 panic
    pub fn stop(&mut self) -> Result<Option<W::Output>, ThreadError> {
        let Some(run) = self.run.take() else {
            return Err(ThreadError::NotRunning);
        };

        run.control.request_cancel();
        match run.handle.join() {
            Ok(output) => {
                debug!("ManagedThread::stop({}) SUCCESS", self.name);
                Ok(output)
            },
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("ManagedThread::stop({}) FAIL. join error: {}", self.name, msg);
                Err(ThreadError::JoinFailed(msg))
            },
        }
    }

    /// 有界等待的 stop
    ///
    /// 与 [`stop`](Self::stop) 相同，但最多等待 `timeout`。超时后线程被放弃
    /// （继续运行直到自行观察到取消），生命周期状态照常复位。
    ///
    /// # 错误
    /// - `ThreadError::StopTimeout`: 线程未在时限内退出
    /// - 以及 `stop()` 的所有错误
    pub fn stop_timeout(&mut self, timeout: Duration) -> Result<Option<W::Output>, ThreadError> {
        let Some(run) = self.run.take() else {
            return Err(ThreadError::NotRunning);
        };

        run.control.request_cancel();
        match run.handle.join_timeout(timeout) {
            Ok(output) => {
                debug!("ManagedThread::stop_timeout({}) SUCCESS", self.name);
                Ok(output)
            },
            Err(e) => {
                error!("ManagedThread::stop_timeout({}) FAIL: {}", self.name, e);
                Err(e)
            },
        }
    }

    /// 回收已退出的线程；其输出被丢弃
    fn reap(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        match run.handle.join() {
            Ok(_) => debug!("ManagedThread::start({}) reaped finished thread", self.name),
            Err(panic) => error!(
                "ManagedThread::start({}) reaped panicked thread: {}",
                self.name,
                panic_message(panic.as_ref())
            ),
        }
    }

    /// 请求取消（不等待）；由上层的 stop 在 join 之前调用
    pub(crate) fn request_cancel(&self) {
        if let Some(run) = &self.run {
            run.control.request_cancel();
        }
    }

    /// 是否已请求取消
    pub fn is_cancel_requested(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.control.is_cancel_requested())
    }

    /// 线程是否已创建
    pub fn is_created(&self) -> bool {
        self.run.is_some()
    }

    /// 线程体是否正在运行
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.control.is_running())
    }

    /// 线程已创建且线程体已经返回（尚未被 stop 回收）
    pub fn is_finished(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.handle.is_finished())
    }

    /// 线程 ID（线程体运行期间可用）
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.run.as_ref().and_then(|run| run.control.thread_id())
    }

    /// 轮询等待线程体开始执行，返回其线程 ID
    ///
    /// # 错误
    /// - `ThreadError::NotRunning`: 线程未创建，或在发布 ID 之前已经退出
    /// - `ThreadError::StartTimeout`: 超时
    pub fn wait_for_start(
        &self,
        poll: Duration,
        timeout: Duration,
    ) -> Result<ThreadId, ThreadError> {
        let Some(run) = &self.run else {
            return Err(ThreadError::NotRunning);
        };

        let start = Instant::now();
        loop {
            if let Some(id) = run.control.thread_id() {
                return Ok(id);
            }
            if run.handle.is_finished() {
                return Err(ThreadError::NotRunning);
            }
            if start.elapsed() >= timeout {
                return Err(ThreadError::StartTimeout);
            }
            thread::sleep(poll);
        }
    }

    /// 在线程未运行时访问 worker
    ///
    /// 线程运行期间 worker 归线程体所有，此时返回 `None`。
    pub fn with_worker<R>(&self, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        if self.run.is_some() {
            return None;
        }
        self.worker.lock().as_mut().map(f)
    }
}

impl<W: ThreadWorker> Drop for ManagedThread<W> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            error!(
                "ManagedThread {} dropped while its thread is still created: \
                stop() must be called first",
                self.name
            );
            run.control.request_cancel();
            if let Err(e) = run.handle.join_timeout(DROP_JOIN_TIMEOUT) {
                error!("ManagedThread {} failed to shut down on drop: {}", self.name, e);
            }
        }
    }
}

/// 后台线程入口：反复调用 `step` 直到取消
fn thread_body<W: ThreadWorker>(
    worker_slot: Arc<Mutex<Option<W>>>,
    arg: W::Arg,
    control: Arc<ThreadControl>,
    name: String,
) -> Option<W::Output> {
    let Some(mut worker) = worker_slot.lock().take() else {
        error!("ManagedThread {}: worker missing at thread entry", name);
        return None;
    };

    let id = thread::current().id();
    *control.thread_id.lock() = Some(id);
    control.running.store(true, Ordering::Release);
    let _guard = RunningGuard(&control);
    debug!("ManagedThread {} thread id: {:?}", name, id);

    #[cfg(feature = "realtime")]
    raise_priority(&name);

    let mut output = None;
    while !control.is_cancel_requested() {
        if let Some(value) = worker.step(&arg, &control) {
            output = Some(value);
        }
    }

    *worker_slot.lock() = Some(worker);
    output
}

/// 提升当前线程优先级（可选 feature）
#[cfg(feature = "realtime")]
fn raise_priority(name: &str) {
    use thread_priority::*;
    use tracing::{info, warn};

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => {
            info!("ManagedThread {} priority set to MAX (realtime)", name);
        },
        Err(e) => {
            warn!(
                "Failed to set ManagedThread {} priority: {:?}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                name, e
            );
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "thread panicked".to_string()
    }
}

/// 带超时的 join
trait JoinTimeout<T> {
    fn join_timeout(self, timeout: Duration) -> Result<T, ThreadError>;
}

impl<T: Send + 'static> JoinTimeout<T> for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<T, ThreadError> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程代为 join；超时后它继续等待，由进程退出回收
        thread::Builder::new()
            .name("b2b-join-watchdog".to_string())
            .spawn(move || {
                let result = self.join();
                // 接收端可能已超时离开
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(ThreadError::JoinFailed(panic_message(panic.as_ref()))),
            Err(RecvTimeoutError::Timeout) => Err(ThreadError::StopTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ThreadError::JoinFailed(
                "join watchdog disconnected".to_string(),
            )),
        }
    }
}
