//! 周期唤醒源
//!
//! 周期调度器阻塞等待的对象。唤醒源在拥有它的线程上创建，只有该线程可以
//! `wait()`（定时器投递必须唤醒 *这个* 线程，而不是任意线程）；`fire_now()`
//! 可以在任意线程调用，用于 stop 时立即打断等待。
//!
//! 默认实现 [`DeadlineTimer`] 基于单调时钟截止时间 + `parking_lot::Condvar`：
//! - 固定速率：每次到期后截止时间精确前进一个周期
//! - 错过的周期合并为一次唤醒（与 POSIX 定时器的 overrun 行为一致）
//! - 周期为 0 表示解除（不再到期，只能被 `fire_now()` 唤醒）

use crate::error::TimerError;
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// 一次唤醒的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// 周期到期
    Expired,
    /// 被 `fire_now()` 强制唤醒
    Forced,
}

/// 周期唤醒源能力
///
/// 每个目标平台可以提供自己的实现（例如原生定时器 API）；调度器只依赖此 trait。
pub trait WakeSource: Send + Sync + 'static {
    /// 在当前线程上创建，并绑定到当前线程
    fn create(name: &str) -> Result<Self, TimerError>
    where
        Self: Sized;

    /// 设置周期
    ///
    /// - `period`: 周期；`Duration::ZERO` 解除定时器
    /// - `first_expiration`: 首次到期距现在的时长（`Duration::ZERO` 表示立即）
    fn arm(&self, period: Duration, first_expiration: Duration) -> Result<(), TimerError>;

    /// 阻塞直到下一次到期或被强制唤醒（仅限拥有者线程）
    fn wait(&self) -> Result<Wake, TimerError>;

    /// 强制立即到期（任意线程）；在 `wait()` 之前调用同样生效
    fn fire_now(&self) -> Result<(), TimerError>;

    /// 销毁，之后的 `wait()` / `fire_now()` 都会失败
    fn close(&self) -> Result<(), TimerError>;
}

#[derive(Debug, Default)]
struct TimerSlot {
    period: Duration,
    /// 下一次到期时间；None 表示已解除
    next: Option<Instant>,
    forced: bool,
    closed: bool,
}

/// 基于单调截止时间的唤醒源
#[derive(Debug)]
pub struct DeadlineTimer {
    name: String,
    owner: ThreadId,
    slot: Mutex<TimerSlot>,
    cond: Condvar,
}

impl DeadlineTimer {
    /// 当前周期
    pub fn period(&self) -> Duration {
        self.slot.lock().period
    }

    /// 是否处于设置状态
    pub fn is_armed(&self) -> bool {
        self.slot.lock().next.is_some()
    }
}

impl WakeSource for DeadlineTimer {
    fn create(name: &str) -> Result<Self, TimerError> {
        Ok(Self {
            name: name.to_string(),
            owner: thread::current().id(),
            slot: Mutex::new(TimerSlot::default()),
            cond: Condvar::new(),
        })
    }

    fn arm(&self, period: Duration, first_expiration: Duration) -> Result<(), TimerError> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(TimerError::Arm(format!("{}: timer closed", self.name)));
        }
        slot.period = period;
        slot.next = if period.is_zero() {
            None
        } else {
            Some(Instant::now() + first_expiration)
        };
        self.cond.notify_all();
        Ok(())
    }

    fn wait(&self) -> Result<Wake, TimerError> {
        if thread::current().id() != self.owner {
            return Err(TimerError::WrongThread);
        }

        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return Err(TimerError::Wait(format!("{}: timer closed", self.name)));
            }
            if slot.forced {
                slot.forced = false;
                return Ok(Wake::Forced);
            }
            match slot.next {
                None => self.cond.wait(&mut slot),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let behind = now.duration_since(deadline).as_nanos();
                        let skips = (behind / slot.period.as_nanos()) as u32 + 1;
                        slot.next = Some(deadline + slot.period * skips);
                        return Ok(Wake::Expired);
                    }
                    self.cond.wait_until(&mut slot, deadline);
                },
            }
        }
    }

    fn fire_now(&self) -> Result<(), TimerError> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(TimerError::Fire(format!("{}: timer closed", self.name)));
        }
        slot.forced = true;
        self.cond.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<(), TimerError> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(TimerError::Delete(format!("{}: timer already closed", self.name)));
        }
        slot.closed = true;
        slot.next = None;
        self.cond.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_immediate_first_expiration() {
        let timer = DeadlineTimer::create("t").unwrap();
        timer.arm(Duration::from_millis(50), Duration::ZERO).unwrap();
        assert!(timer.is_armed());

        let start = Instant::now();
        assert_eq!(timer.wait().unwrap(), Wake::Expired);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn test_periodic_expirations() {
        let timer = DeadlineTimer::create("t").unwrap();
        timer.arm(Duration::from_millis(20), Duration::from_millis(20)).unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(timer.wait().unwrap(), Wake::Expired);
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(200), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_missed_periods_collapse() {
        let timer = DeadlineTimer::create("t").unwrap();
        timer.arm(Duration::from_millis(10), Duration::ZERO).unwrap();
        thread::sleep(Duration::from_millis(55));

        // 一次唤醒代表所有错过的周期，下一次在新的周期边界
        assert_eq!(timer.wait().unwrap(), Wake::Expired);
        let start = Instant::now();
        assert_eq!(timer.wait().unwrap(), Wake::Expired);
        assert!(start.elapsed() <= Duration::from_millis(15));
    }

    #[test]
    fn test_fire_now_wakes_disarmed_timer() {
        let timer = Arc::new(DeadlineTimer::create("t").unwrap());
        timer.arm(Duration::ZERO, Duration::ZERO).unwrap();
        assert!(!timer.is_armed());

        let firer = timer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            firer.fire_now().unwrap();
        });

        assert_eq!(timer.wait().unwrap(), Wake::Forced);
        handle.join().unwrap();
    }

    #[test]
    fn test_fire_before_wait_is_latched() {
        let timer = DeadlineTimer::create("t").unwrap();
        timer.arm(Duration::from_secs(10), Duration::from_secs(10)).unwrap();
        timer.fire_now().unwrap();

        let start = Instant::now();
        assert_eq!(timer.wait().unwrap(), Wake::Forced);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_wait_from_other_thread_refused() {
        let timer = Arc::new(DeadlineTimer::create("t").unwrap());
        timer.arm(Duration::from_millis(1), Duration::ZERO).unwrap();

        let other = timer.clone();
        let result = thread::spawn(move || other.wait()).join().unwrap();
        assert_eq!(result, Err(TimerError::WrongThread));
    }

    #[test]
    fn test_close() {
        let timer = DeadlineTimer::create("t").unwrap();
        timer.arm(Duration::from_millis(10), Duration::ZERO).unwrap();
        timer.close().unwrap();

        assert!(matches!(timer.fire_now(), Err(TimerError::Fire(_))));
        assert!(matches!(timer.wait(), Err(TimerError::Wait(_))));
        assert!(matches!(timer.close(), Err(TimerError::Delete(_))));
        assert!(matches!(
            timer.arm(Duration::from_millis(1), Duration::ZERO),
            Err(TimerError::Arm(_))
        ));
    }
}
