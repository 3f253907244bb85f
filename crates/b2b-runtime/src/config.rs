//! 运行时配置
//!
//! 从 TOML 加载周期调度器和列表执行器的默认参数，缺省字段使用默认值。
//!
//! ```toml
//! [timer]
//! interval_ms = 50
//! first_expiration_immediate = true
//!
//! [executor]
//! yield_ms = 10
//! stop_timeout_ms = 2000
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 周期调度器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// 周期（毫秒），例如 50 表示 20Hz；0 表示不启动定时器
    pub interval_ms: u32,

    /// 首次到期是否立即触发
    ///
    /// - `true`: 创建后立即触发一次，之后每 `interval_ms` 触发
    /// - `false`: 首次触发在 `interval_ms` 之后
    pub first_expiration_immediate: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50, // 20Hz
            first_expiration_immediate: true,
        }
    }
}

/// 列表执行器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 每轮执行后让出 CPU 的时长（毫秒）
    pub yield_ms: u64,

    /// 有界 stop 的等待上限（毫秒）
    pub stop_timeout_ms: u64,
}

impl ExecutorConfig {
    /// 让出时长
    pub fn yield_period(&self) -> Duration {
        Duration::from_millis(self.yield_ms)
    }

    /// 有界 stop 超时
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            yield_ms: 10,
            stop_timeout_ms: 2000,
        }
    }
}

/// 完整运行时配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timer: TimerConfig,
    pub executor: ExecutorConfig,
}

impl RuntimeConfig {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timer.interval_ms must be > 0 (0 disarms the timer)".to_string(),
            ));
        }
        if self.executor.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "executor.stop_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
