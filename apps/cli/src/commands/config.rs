//! 配置命令
//!
//! 打印生效的运行时配置，可选写入文件

use anyhow::{Context, Result};
use b2b_runtime::RuntimeConfig;
use clap::Args;
use std::fs;
use std::path::PathBuf;

/// 配置命令参数
#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// 同时写入该文件
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn execute(&self, config: &RuntimeConfig) -> Result<()> {
        let content = config.to_toml_string()?;
        print!("{}", content);

        if let Some(path) = &self.path {
            fs::write(path, &content)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            eprintln!("Config written to {}", path.display());
        }
        Ok(())
    }
}
