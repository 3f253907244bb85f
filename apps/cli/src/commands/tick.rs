//! 周期定时器命令

use anyhow::Result;
use b2b_runtime::{RuntimeConfig, SimpleTimer, monotonic_millis};
use clap::Args;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// 定时器参数
#[derive(Args, Debug)]
pub struct TickCommand {
    /// 周期（毫秒），默认取配置
    #[arg(long)]
    pub interval_ms: Option<u32>,

    /// tick 次数（0 表示直到 Ctrl+C）
    #[arg(long, default_value_t = 10)]
    pub count: u32,

    /// 首次 tick 推迟一个周期
    #[arg(long)]
    pub no_immediate: bool,

    /// 第 N 次 tick 时在处理函数内把周期减半
    #[arg(long)]
    pub speedup_after: Option<u32>,
}

impl TickCommand {
    pub fn execute(&self, config: &RuntimeConfig) -> Result<()> {
        let interval_ms = self.interval_ms.unwrap_or(config.timer.interval_ms);
        let immediate = config.timer.first_expiration_immediate && !self.no_immediate;
        let speedup_after = self.speedup_after;

        let (tx, rx) = unbounded();
        let mut ticks = 0u32;
        let mut timer = SimpleTimer::new("cli-tick", interval_ms, immediate, move |ctx| {
            ticks += 1;
            if speedup_after == Some(ticks) {
                ctx.change_interval((ctx.interval_ms() / 2).max(1));
            }
            tx.send((ticks, monotonic_millis(), ctx.interval_ms())).is_ok()
        });

        let interrupted = super::interrupt_flag()?;
        let t0 = monotonic_millis();
        timer.start()?;

        let mut last = t0;
        let mut received = 0;
        while self.count == 0 || received < self.count {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok((n, at, interval)) => {
                    println!(
                        "tick #{:<4} t={:>6} ms  Δ={:>5} ms  interval={} ms",
                        n,
                        at - t0,
                        at - last,
                        interval
                    );
                    last = at;
                    received += 1;
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(e) => return Err(e.into()),
            }
            if interrupted.load(Ordering::SeqCst) {
                break;
            }
        }

        timer.stop()?;
        let metrics = timer.metrics();
        println!(
            "ticks: {}, re-arms: {}, forced wakes: {}",
            metrics.ticks, metrics.rearms, metrics.forced_wakes
        );
        Ok(())
    }
}
