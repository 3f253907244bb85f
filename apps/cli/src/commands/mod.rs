//! 命令定义和实现

pub mod config;
pub mod exec;
pub mod tick;

pub use config::ConfigCommand;
pub use exec::ExecCommand;
pub use tick::TickCommand;

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 安装 Ctrl+C 处理，返回中断标志
pub(crate) fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Stopping...");
        handler_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}
