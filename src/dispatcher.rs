// src/dispatcher.rs

//! # 分发模块 (dispatcher)
//!
//! 提供 broker 的对外入口 `Broker`：注册、移除，以及三种发送方式
//! （点对点、全量广播、按分类广播）。

use crate::config::BrokerConfig;
use crate::error::{BrokerError, ConfigError};
use crate::handler::{ErrorObserver, LogObserver, MessageHandler};
use crate::mailbox::{Mailbox, PostOutcome};
use crate::message::{CategoryId, ClientId, Message, MessageKey, Payload};
use crate::registry::Registry;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// ## `Broker`
///
/// 进程内的发布/订阅中枢，显式创建，取代全局单例。
/// 克隆代价很低，所有克隆共享同一个 `Registry`。
///
/// 生命周期：程序启动时创建，关闭时调用 `shutdown` 后丢弃。
#[derive(Clone)]
pub struct Broker {
    registry: Arc<Registry>,
    observer: Arc<dyn ErrorObserver>,
    config: BrokerConfig,
}

impl Broker {
    /// 使用当前 Tokio 运行时创建 broker。
    /// 在运行时之外调用返回 `ConfigError::NoRuntime`。
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        Self::with_observer(config, Arc::new(LogObserver))
    }

    /// 使用自定义的错误观察者创建 broker。
    pub fn with_observer(
        config: BrokerConfig,
        observer: Arc<dyn ErrorObserver>,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Self::with_runtime(config, observer, runtime)
    }

    /// 指定邮箱消费任务所在的运行时。
    pub fn with_runtime(
        config: BrokerConfig,
        observer: Arc<dyn ErrorObserver>,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(Registry::new(runtime)),
            observer,
            config,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// ## `attach`
    ///
    /// 为 `client_id` 注册邮箱。
    /// - `categories` 为空时只接收无分类的广播；重复的分类只记录一次。
    /// - id 已被占用时返回 `DuplicateClient`。
    pub async fn attach<H>(
        &self,
        client_id: ClientId,
        categories: impl IntoIterator<Item = CategoryId>,
        handler: H,
    ) -> Result<(), BrokerError>
    where
        H: MessageHandler,
    {
        self.attach_shared(client_id, categories, Arc::new(handler))
            .await
    }

    /// 与 `attach` 相同，接收已经共享的处理器。
    pub async fn attach_shared(
        &self,
        client_id: ClientId,
        categories: impl IntoIterator<Item = CategoryId>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError> {
        let mut categories: Vec<_> = categories.into_iter().collect();
        categories.sort_unstable();
        categories.dedup();

        let mailbox = Mailbox::new(
            client_id,
            categories,
            self.config.queue_capacity,
            handler,
            Arc::clone(&self.observer),
        );
        self.registry.attach(mailbox).await?;
        Ok(())
    }

    /// 移除客户端，未注册的 id 直接忽略。
    pub async fn remove(&self, client_id: ClientId) {
        self.registry.remove(client_id).await;
    }

    pub async fn clear_all(&self) {
        self.registry.clear_all().await;
    }

    /// 关闭 broker：释放所有邮箱。之后仍可重新注册。
    pub async fn shutdown(&self) {
        info!(target: "BROKER", "Shutting down broker");
        self.clear_all().await;
    }

    /// ## `send_to_client`
    ///
    /// 点对点发送，消息不带分类。目标未注册时返回 `NoSuchClient`。
    /// 只负责入队，不等待投递完成。
    pub async fn send_to_client(
        &self,
        target: ClientId,
        key: MessageKey,
        payload: Payload,
    ) -> Result<(), BrokerError> {
        let mailbox = self
            .registry
            .resolve_one(target)
            .await
            .ok_or(BrokerError::NoSuchClient(target))?;

        let outcome = mailbox.post(Message::new(key, None, payload));
        debug!(target: "BROKER", target_id = target, key, ?outcome, "Direct send");
        Ok(())
    }

    /// ## `broadcast`
    ///
    /// 广播给除发送方外的所有合格邮箱，返回接收者数量。
    /// - `category` 为 `None`：所有已注册客户端。
    /// - `category` 为 `Some(c)`：只有订阅了 `c` 的客户端。
    /// - 没有接收者时，严格模式返回 `NoRecipients`，否则返回 `Ok(0)`。
    ///
    /// 所有接收者共享同一个消息实例；某个邮箱队列已满不影响其他邮箱。
    pub async fn broadcast(
        &self,
        sender: ClientId,
        key: MessageKey,
        category: Option<CategoryId>,
        payload: Payload,
    ) -> Result<usize, BrokerError> {
        let targets = match category {
            None => self.registry.resolve_all(sender).await,
            Some(c) => {
                let mut targets = self.registry.resolve_for_category(c).await;
                targets.retain(|mb| mb.client_id() != sender);
                targets
            }
        };

        if targets.is_empty() {
            debug!(target: "BROKER", sender, ?category, "Broadcast found no recipients");
            if self.config.strict_broadcast {
                return Err(BrokerError::NoRecipients { sender, category });
            }
            return Ok(0);
        }

        let message = Message::new(key, category, payload);
        let mut dropped = 0usize;
        for mailbox in &targets {
            if mailbox.post(message.clone()) == PostOutcome::Dropped {
                dropped += 1;
            }
        }
        debug!(
            target: "BROKER",
            sender,
            key,
            ?category,
            recipients = targets.len(),
            dropped,
            "Broadcast"
        );
        Ok(targets.len())
    }
}
