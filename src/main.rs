// src/main.rs

//! # 主程序 (main)
//!
//! 演示程序：组装 broker、消费者与生产者，运行一段负载后优雅关闭。

mod demo;

use demo::actor::Actor;
use demo::consumer::ConsumerPool;
use demo::producer::{Producer, SendMode};

use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use light_broker::{Broker, BrokerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "light-broker", version, about = "In-process pub/sub broker demo")]
struct Cli {
    /// 消费者数量，消费者 i 订阅分类 i
    #[arg(long, default_value_t = 30)]
    consumers: usize,

    /// 生产者发送的轮数
    #[arg(long, default_value_t = 1000)]
    messages: usize,

    /// 发送方式
    #[arg(long, value_enum, default_value_t = SendMode::Direct)]
    mode: SendMode,

    /// 每个邮箱的队列容量
    #[arg(long, default_value_t = light_broker::config::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// 等待消费者处理剩余消息的时间（毫秒）
    #[arg(long, default_value_t = 500)]
    drain_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. 初始化 ---
    // 设置日志，可以通过 RUST_LOG 环境变量控制级别, e.g., RUST_LOG=info,BROKER=debug
    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = BrokerConfig::default()
        .with_queue_capacity(cli.queue_capacity)
        .with_strict_broadcast(true);
    let broker = Broker::new(config)?;

    // --- 2. 组装 Actors ---
    let consumers = Arc::new(ConsumerPool::new(
        broker.clone(),
        cli.consumers,
        Duration::from_millis(200),
    ));
    let producer = Arc::new(Producer::new(
        broker.clone(),
        cli.messages,
        cli.consumers,
        cli.mode,
    ));

    info!(target: "MAIN", "System starting up...");

    // --- 3. 启动 Actors ---
    // 消费者必须先注册，生产者才有发送目标。
    let reporters = Arc::clone(&consumers).start().await;
    let producers = producer.start().await;

    let _ = join_all(producers).await;
    tokio::time::sleep(Duration::from_millis(cli.drain_ms)).await;

    // --- 4. 优雅关闭 ---
    info!(target: "MAIN", "Shutting down...");
    for handle in &reporters {
        handle.abort();
    }
    let _ = join_all(reporters).await;

    let counts = consumers.snapshot();
    for (client_id, count) in counts.iter().enumerate() {
        info!(target: "MAIN", "Consumer {} received {} messages", client_id, count);
    }
    info!(target: "MAIN", "Total delivered: {}", consumers.total());

    broker.shutdown().await;
    info!(target: "MAIN", "System shut down gracefully.");
    Ok(())
}
