//! 周期调度器时序测试
//!
//! 这些测试依赖墙钟时间，使用 `#[serial]` 避免相互抢占 CPU。

use b2b_runtime::{PeriodicScheduler, SimpleTimer, TickContext, TickHandler, TimerConfig};
use crossbeam_channel::{Sender, unbounded};
use serial_test::serial;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

/// 发送每次 tick 的时间；`switch_at` 次 tick 时在处理函数内修改周期
struct Stamp {
    tx: Sender<Instant>,
    ticks: u32,
    switch_at: Option<(u32, u32)>,
}

impl TickHandler for Stamp {
    type Arg = Instant;
    type Output = u32;

    fn on_tick(&mut self, _started: &Instant, ctx: &TickContext<'_>) -> u32 {
        self.ticks += 1;
        if let Some((at, interval_ms)) = self.switch_at
            && self.ticks == at
        {
            ctx.change_interval(interval_ms);
        }
        let _ = self.tx.send(Instant::now());
        self.ticks
    }
}

fn stamp(switch_at: Option<(u32, u32)>) -> (Stamp, crossbeam_channel::Receiver<Instant>) {
    let (tx, rx) = unbounded();
    (
        Stamp {
            tx,
            ticks: 0,
            switch_at,
        },
        rx,
    )
}

#[test]
#[serial]
fn immediate_first_tick_then_every_interval() {
    let (handler, rx) = stamp(None);
    let mut scheduler = PeriodicScheduler::new("imm", 40, true, handler);

    let t0 = Instant::now();
    scheduler.start(t0).unwrap();

    let first = rx.recv_timeout(WAIT).unwrap();
    assert!(first.duration_since(t0) < Duration::from_millis(25), "first tick {:?}", first - t0);

    let second = rx.recv_timeout(WAIT).unwrap();
    let gap = second.duration_since(first);
    assert!(gap >= Duration::from_millis(30), "gap {:?}", gap);
    assert!(gap < Duration::from_millis(90), "gap {:?}", gap);

    assert!(scheduler.stop().unwrap().unwrap() >= 2);
}

#[test]
#[serial]
fn delayed_first_tick() {
    let (handler, rx) = stamp(None);
    let config = TimerConfig {
        interval_ms: 40,
        first_expiration_immediate: false,
    };
    let mut scheduler = PeriodicScheduler::from_config("delayed", &config, handler);

    let t0 = Instant::now();
    scheduler.start(t0).unwrap();
    let first = rx.recv_timeout(WAIT).unwrap();
    assert!(first.duration_since(t0) >= Duration::from_millis(35), "first tick {:?}", first - t0);
    scheduler.stop().unwrap();
}

#[test]
#[serial]
fn change_inside_handler_applies_to_next_period() {
    // 第 1 次 tick（t≈0）把周期从 200ms 改为 20ms
    let (handler, rx) = stamp(Some((1, 20)));
    let mut scheduler = PeriodicScheduler::new("fast", 200, true, handler);

    scheduler.start(Instant::now()).unwrap();
    let first = rx.recv_timeout(WAIT).unwrap();
    let second = rx.recv_timeout(WAIT).unwrap();
    let gap = second.duration_since(first);
    assert!(gap < Duration::from_millis(100), "gap {:?}", gap);
    assert_eq!(scheduler.interval_ms(), 20);

    scheduler.stop().unwrap();
    assert!(scheduler.metrics().rearms >= 2);
}

#[test]
#[serial]
fn external_change_waits_for_scheduled_tick() {
    let (handler, rx) = stamp(None);
    let mut scheduler = PeriodicScheduler::new("deferred", 150, true, handler);

    scheduler.start(Instant::now()).unwrap();
    let first = rx.recv_timeout(WAIT).unwrap();

    // 确保调度线程已经回到等待
    thread::sleep(Duration::from_millis(20));
    scheduler.change_interval(10).unwrap();
    // 已经排定的 150ms 周期不会被提前
    let second = rx.recv_timeout(WAIT).unwrap();
    assert!(second.duration_since(first) >= Duration::from_millis(120));

    // 之后按新周期
    let third = rx.recv_timeout(WAIT).unwrap();
    assert!(third.duration_since(second) < Duration::from_millis(80));
    scheduler.stop().unwrap();
}

#[test]
#[serial]
fn stop_is_prompt_and_handler_not_called_afterwards() {
    let (handler, rx) = stamp(None);
    let mut scheduler = PeriodicScheduler::new("prompt", 5_000, false, handler);

    scheduler.start(Instant::now()).unwrap();
    scheduler.wait_is_armed();

    let t0 = Instant::now();
    assert_eq!(scheduler.stop().unwrap(), None);
    assert!(t0.elapsed() < Duration::from_millis(500));
    assert!(!scheduler.is_armed());

    thread::sleep(Duration::from_millis(20));
    assert!(rx.try_recv().is_err());
}

#[test]
#[serial]
fn drop_stops_running_scheduler() {
    let (handler, rx) = stamp(None);
    let mut scheduler = PeriodicScheduler::new("dropped", 10, true, handler);
    scheduler.start(Instant::now()).unwrap();
    rx.recv_timeout(WAIT).unwrap();

    let t0 = Instant::now();
    drop(scheduler);
    assert!(t0.elapsed() < Duration::from_millis(500));

    // 处理函数连同发送端一起被释放
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
#[serial]
fn simple_timer_counts_ticks() {
    let (tx, rx) = unbounded();
    let mut timer = SimpleTimer::new("simple", 10, true, move |ctx| {
        let _ = tx.send(ctx.interval_ms());
        true
    });

    timer.start().unwrap();
    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 10);
    }
    assert_eq!(timer.stop().unwrap(), Some(true));
    assert!(timer.metrics().ticks >= 3);
}

/// 轮询直到定时器被设置
trait WaitArmed {
    fn wait_is_armed(&self);
}

impl<H: TickHandler> WaitArmed for PeriodicScheduler<H> {
    fn wait_is_armed(&self) {
        let deadline = Instant::now() + WAIT;
        while !self.is_armed() {
            assert!(Instant::now() < deadline, "scheduler never armed");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
