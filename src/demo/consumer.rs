// src/demo/consumer.rs

//! # 消费者模块 (consumer)
//!
//! 注册一组消费者，消费者 i 订阅分类 i，并统计各自收到的消息数。

use super::actor::Actor;
use light_broker::{Broker, ClientId, HandlerError, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// ## `ConsumerPool`
pub struct ConsumerPool {
    broker: Broker,
    counts: Arc<Vec<AtomicU64>>,
    report_every: Duration,
}

impl ConsumerPool {
    pub fn new(broker: Broker, consumers: usize, report_every: Duration) -> Self {
        let counts = (0..consumers).map(|_| AtomicU64::new(0)).collect();
        Self {
            broker,
            counts: Arc::new(counts),
            report_every,
        }
    }

    /// 每个消费者当前收到的消息数。
    pub fn snapshot(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub fn total(&self) -> u64 {
        self.snapshot().iter().sum()
    }
}

#[async_trait::async_trait]
impl Actor for ConsumerPool {
    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        for index in 0..self.counts.len() {
            let client_id = index as ClientId;
            let counts = Arc::clone(&self.counts);
            let on_message = move |id: ClientId, _msg: &Message| -> Result<(), HandlerError> {
                counts[id as usize].fetch_add(1, Ordering::Relaxed);
                Ok(())
            };
            if let Err(e) = self.broker.attach(client_id, [client_id], on_message).await {
                error!(target: "CONSUMER", "Failed to attach consumer {}: {}", client_id, e);
            }
        }
        info!(target: "CONSUMER", "Attached {} consumers", self.counts.len());

        let this = Arc::clone(&self);
        let reporter = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.report_every);
            loop {
                ticker.tick().await;
                info!(target: "CONSUMER", "Received so far: {}", this.total());
            }
        });
        vec![reporter]
    }
}
