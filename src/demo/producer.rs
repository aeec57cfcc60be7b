// src/demo/producer.rs

//! # 生产者模块 (producer)
//!
//! 按选定的方式向消费者发送消息，用来给 broker 施加负载。

use super::actor::Actor;
use super::DEMO_MESSAGE_KEY;
use clap::ValueEnum;
use light_broker::{Broker, ClientId, Payload};
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// 生产者的发送方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SendMode {
    /// 每一轮逐个点对点发送给所有消费者。
    Direct,
    /// 每一轮向一个随机分类广播。
    Category,
    /// 每一轮向所有客户端广播。
    All,
}

/// ## `Producer`
pub struct Producer {
    broker: Broker,
    client_id: ClientId,
    rounds: usize,
    consumers: usize,
    mode: SendMode,
}

impl Producer {
    pub fn new(broker: Broker, rounds: usize, consumers: usize, mode: SendMode) -> Self {
        // 生产者本身不注册邮箱，只需要一个不会和消费者冲突的发送方 id。
        let client_id = Uuid::new_v4().as_u64_pair().0 as ClientId;
        Self {
            broker,
            client_id,
            rounds,
            consumers,
            mode,
        }
    }

    async fn run_round(&self, round: usize) {
        let payload = Payload::new(round);
        match self.mode {
            SendMode::Direct => {
                for target in 0..self.consumers {
                    let target = target as ClientId;
                    if let Err(e) = self
                        .broker
                        .send_to_client(target, DEMO_MESSAGE_KEY, payload.clone())
                        .await
                    {
                        warn!(target: "PRODUCER", "Failed to send to {}: {}", target, e);
                    }
                }
            }
            SendMode::Category => {
                let category = rand::thread_rng().gen_range(0..self.consumers.max(1)) as i64;
                if let Err(e) = self
                    .broker
                    .broadcast(self.client_id, DEMO_MESSAGE_KEY, Some(category), payload)
                    .await
                {
                    warn!(target: "PRODUCER", "Category broadcast failed: {}", e);
                }
            }
            SendMode::All => {
                if let Err(e) = self
                    .broker
                    .broadcast(self.client_id, DEMO_MESSAGE_KEY, None, payload)
                    .await
                {
                    warn!(target: "PRODUCER", "Broadcast failed: {}", e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for Producer {
    async fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let handle = tokio::spawn(async move {
            info!(
                target: "PRODUCER",
                "Producer {} sending {} rounds in {:?} mode",
                self.client_id,
                self.rounds,
                self.mode
            );
            for round in 0..self.rounds {
                self.run_round(round).await;
                // 让出调度，给消费任务留出时间，避免有界队列被瞬间灌满。
                tokio::task::yield_now().await;
            }
            info!(target: "PRODUCER", "Producer {} finished", self.client_id);
        });
        vec![handle]
    }
}
