//! 列表执行命令
//!
//! 每个工作项打印自身并睡眠 `item-ms`，结束时打印完成原因。

use anyhow::Result;
use b2b_runtime::{AsyncListExecutor, DoneReason, RuntimeConfig, done_callback, monotonic_millis};
use clap::Args;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 列表执行参数
#[derive(Args, Debug)]
pub struct ExecCommand {
    /// 工作项（逗号分隔）
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub items: Vec<String>,

    /// 循环执行直到 Ctrl+C 或 `--run-ms` 到期
    #[arg(long = "loop")]
    pub looping: bool,

    /// 每项耗时（毫秒）
    #[arg(long, default_value_t = 100)]
    pub item_ms: u64,

    /// 最长运行时间（毫秒）
    #[arg(long)]
    pub run_ms: Option<u64>,
}

impl ExecCommand {
    pub fn execute(&self, config: &RuntimeConfig) -> Result<()> {
        let item_delay = Duration::from_millis(self.item_ms);
        let mut executor = AsyncListExecutor::from_fn(
            "cli-exec",
            move |item: &String| {
                println!("[{:>8} ms] ▶ {}", monotonic_millis(), item);
                spin_sleep::sleep(item_delay);
                true
            },
            &config.executor,
        );
        executor.start()?;

        let interrupted = super::interrupt_flag()?;
        let (tx, rx) = unbounded();
        let callback = done_callback(move |reason| tx.send(reason).is_ok());

        executor.execute_list(
            "cli",
            self.items.as_slice(),
            |items| Ok::<_, Infallible>(items.to_vec()),
            self.looping,
            Some(callback),
        )?;

        let started = Instant::now();
        let deadline = self.run_ms.map(Duration::from_millis);
        let reason = loop {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(reason) => break reason,
                Err(RecvTimeoutError::Timeout) => {},
                Err(e) => return Err(e.into()),
            }

            let expired = deadline.is_some_and(|d| started.elapsed() >= d);
            if interrupted.load(Ordering::SeqCst) || expired {
                executor.stop_executing(DoneReason::Stop, true, true);
                break rx.recv_timeout(Duration::from_secs(1))?;
            }
        };
        println!("done: {}", reason);

        executor.stop_timeout(config.executor.stop_timeout())?;

        let metrics = executor.metrics();
        println!(
            "items executed: {}, sessions: {} started / {} completed / {} stopped",
            metrics.items_executed,
            metrics.sessions_started,
            metrics.sessions_completed,
            metrics.sessions_stopped
        );
        Ok(())
    }
}
