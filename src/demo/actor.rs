// src/demo/actor.rs

//! # Actor 模块
//!
//! 演示程序中各个独立组件（生产者、消费者）的通用生命周期 trait。

use std::sync::Arc;
use tokio::task::JoinHandle;

/// ## `Actor` Trait
///
/// 为演示负载中的所有组件提供统一的启动接口。
/// Actor 应该在 `start` 方法内部完成向 broker 的注册。
/// 返回一个 `JoinHandle` 向量，以便主程序可以等待或中止它们。
#[async_trait::async_trait]
pub trait Actor: Send + Sync {
    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>>;
}
