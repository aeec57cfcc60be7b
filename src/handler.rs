// src/handler.rs

//! # 处理器模块 (handler)
//!
//! 客户端接收消息的能力接口，以及回调失败时的旁路上报接口。
//! 闭包、trait object 与 channel 都可以作为处理器使用。

use crate::error::{HandlerError, HandlerInvocationError};
use crate::message::{ClientId, Message};
use tokio::sync::mpsc;
use tracing::error;

/// ## `MessageHandler` Trait
///
/// 邮箱的消费任务对每条消息调用一次 `handle`。
/// 返回 `Err` 或发生 panic 都只影响当前这条消息。
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, client_id: ClientId, message: Message) -> Result<(), HandlerError>;
}

/// 普通同步闭包直接作为处理器。
#[async_trait::async_trait]
impl<F> MessageHandler for F
where
    F: Fn(ClientId, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, client_id: ClientId, message: Message) -> Result<(), HandlerError> {
        self(client_id, &message)
    }
}

/// 通过 `ChannelHandler` 转发出去的一次投递。
#[derive(Clone, Debug)]
pub struct Delivery {
    pub client_id: ClientId,
    pub message: Message,
}

/// ## `ChannelHandler`
///
/// 把每次投递转发到一个有界 `mpsc` 通道，由调用方在自己的任务里消费。
/// 通道满时消费任务会等待，等待期间邮箱被移除则立即退出。
pub struct ChannelHandler {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, client_id: ClientId, message: Message) -> Result<(), HandlerError> {
        self.tx
            .send(Delivery { client_id, message })
            .await
            .map_err(|_| "delivery receiver dropped".into())
    }
}

/// ## `ErrorObserver` Trait
///
/// 接收消费任务中产生的 `HandlerInvocationError`。
/// 在消费任务内同步调用，实现方不应阻塞。
pub trait ErrorObserver: Send + Sync + 'static {
    fn on_handler_error(&self, error: &HandlerInvocationError);
}

/// 默认观察者：只写日志。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ErrorObserver for LogObserver {
    fn on_handler_error(&self, err: &HandlerInvocationError) {
        error!(
            target: "MAILBOX",
            client_id = err.client_id,
            key = err.key,
            "{}: {}",
            err,
            err.failure
        );
    }
}

impl<F> ErrorObserver for F
where
    F: Fn(&HandlerInvocationError) + Send + Sync + 'static,
{
    fn on_handler_error(&self, error: &HandlerInvocationError) {
        self(error)
    }
}
