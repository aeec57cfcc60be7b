// src/config.rs

//! # 配置模块 (config)
//!
//! broker 的运行参数。实现了 `Deserialize`，宿主程序可以直接嵌入自己的配置文件。

use crate::error::ConfigError;
use serde::Deserialize;

/// 每个邮箱队列的默认容量。
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// ## `BrokerConfig`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 每个邮箱的有界队列容量。队列满时丢弃新消息。
    pub queue_capacity: usize,
    /// 为 `true` 时，没有接收者的广播返回 `NoRecipients`；否则返回 `Ok(0)`。
    pub strict_broadcast: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            strict_broadcast: true,
        }
    }
}

impl BrokerConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_strict_broadcast(mut self, strict: bool) -> Self {
        self.strict_broadcast = strict;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}
