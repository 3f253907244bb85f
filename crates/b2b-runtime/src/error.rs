//! 运行时错误类型定义
//!
//! 每一层一个错误枚举：线程生命周期、唤醒源（定时器）、周期调度器、
//! 列表执行器、配置。所有错误都是局部可恢复的，失败点会用 `tracing` 记录日志。

use std::time::Duration;
use thiserror::Error;

/// 托管线程错误
#[derive(Error, Debug)]
pub enum ThreadError {
    /// 线程已创建（调用方 bug：必须先 `stop()` 再 `start()`）
    #[error("Thread already running")]
    AlreadyRunning,

    /// 没有已创建的线程
    #[error("Thread not running")]
    NotRunning,

    /// 操作系统拒绝创建线程
    #[error("Thread spawn failed: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// join 失败（线程体 panic）
    #[error("Thread join failed: {0}")]
    JoinFailed(String),

    /// 有界 stop 超时，线程已被放弃
    #[error("Thread did not stop within {0:?}, abandoned")]
    StopTimeout(Duration),

    /// 线程体 panic 后 worker 已丢失，无法再次启动
    #[error("Thread worker lost after a failed join")]
    WorkerLost,

    /// 等待线程启动超时
    #[error("Thread did not start in time")]
    StartTimeout,
}

/// 唤醒源（周期定时器）错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// 创建失败
    #[error("Timer create failed: {0}")]
    Create(String),

    /// 设置周期失败
    #[error("Timer arm failed: {0}")]
    Arm(String),

    /// 等待到期失败
    #[error("Timer wait failed: {0}")]
    Wait(String),

    /// 强制立即到期失败
    #[error("Timer force-fire failed: {0}")]
    Fire(String),

    /// 销毁失败
    #[error("Timer delete failed: {0}")]
    Delete(String),

    /// 在非创建线程上等待（定时器绑定到创建它的线程）
    #[error("Timer waited on from a thread other than its owner")]
    WrongThread,
}

/// 周期调度器错误
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// 底层线程错误
    #[error("Scheduler thread error: {0}")]
    Thread(#[from] ThreadError),

    /// 唤醒源错误
    #[error("Scheduler timer error: {0}")]
    Timer(#[from] TimerError),
}

/// 列表执行器错误
#[derive(Error, Debug)]
pub enum ExecError {
    /// 非循环会话正在执行，拒绝新的列表
    #[error("{label}({items}) ignored: already busy executing a previous list")]
    Busy { label: String, items: usize },

    /// 调用方提供的 builder 失败
    #[error("{label}: building the execution list failed: {reason}")]
    BuildFailed { label: String, reason: String },

    /// builder 返回了空列表
    #[error("{label}: execution list is empty")]
    EmptyList { label: String },
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML 解析失败
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML 序列化失败
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// 配置值无效
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_error_display() {
        assert_eq!(format!("{}", ThreadError::AlreadyRunning), "Thread already running");
        assert_eq!(format!("{}", ThreadError::NotRunning), "Thread not running");

        let msg = format!("{}", ThreadError::StopTimeout(Duration::from_millis(20)));
        assert!(msg.contains("20ms") && msg.contains("abandoned"), "{}", msg);

        let msg = format!("{}", ThreadError::JoinFailed("boom".to_string()));
        assert!(msg.contains("join") && msg.contains("boom"));
    }

    #[test]
    fn test_exec_error_display() {
        let err = ExecError::Busy {
            label: "PlayFiles".to_string(),
            items: 3,
        };
        assert_eq!(
            format!("{}", err),
            "PlayFiles(3) ignored: already busy executing a previous list"
        );

        let err = ExecError::BuildFailed {
            label: "DisplayImageFiles".to_string(),
            reason: "missing file".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("DisplayImageFiles") && msg.contains("missing file"));
    }

    #[test]
    fn test_from_conversions() {
        let err: SchedulerError = TimerError::WrongThread.into();
        assert!(matches!(err, SchedulerError::Timer(TimerError::WrongThread)));

        let err: SchedulerError = ThreadError::NotRunning.into();
        assert!(matches!(err, SchedulerError::Thread(ThreadError::NotRunning)));

        let io = std::io::Error::other("no threads left");
        let err: ThreadError = io.into();
        assert!(format!("{}", err).contains("no threads left"));
    }
}
