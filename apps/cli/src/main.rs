//! # b2b CLI
//!
//! 运行时原语的演示与诊断工具。
//!
//! ```bash
//! # 后台执行一个列表
//! b2b-cli exec --items a,b,c --item-ms 200
//!
//! # 循环执行，Ctrl+C 或 3 秒后停止
//! b2b-cli exec --items a,b --loop --run-ms 3000
//!
//! # 20Hz 定时器，第 10 次 tick 后周期减半
//! b2b-cli tick --interval-ms 50 --count 20 --speedup-after 10
//!
//! # 打印生效配置
//! b2b-cli --config runtime.toml config
//! ```

use anyhow::{Context, Result};
use b2b_runtime::RuntimeConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, ExecCommand, TickCommand};

/// b2b CLI - 运行时演示工具
#[derive(Parser, Debug)]
#[command(name = "b2b-cli")]
#[command(about = "Demo and diagnostics for the b2b runtime primitives", long_about = None)]
#[command(version)]
struct Cli {
    /// 运行时配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 在后台线程执行一个工作项列表
    Exec {
        #[command(flatten)]
        args: ExecCommand,
    },

    /// 运行周期定时器
    Tick {
        #[command(flatten)]
        args: TickCommand,
    },

    /// 打印生效配置
    Config {
        #[command(flatten)]
        args: ConfigCommand,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("b2b_cli=info".parse()?)
                .add_directive("b2b_runtime=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    tracing::debug!("Effective config: {:?}", config);

    match cli.command {
        Commands::Exec { args } => args.execute(&config),
        Commands::Tick { args } => args.execute(&config),
        Commands::Config { args } => args.execute(&config),
    }
}
