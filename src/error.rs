// src/error.rs

//! # 错误模块 (error)
//!
//! broker 的错误分类。
//! `BrokerError` 同步返回给调用方；`HandlerInvocationError` 只在邮箱的消费任务中产生，
//! 通过 `ErrorObserver` 旁路上报，不会回到发送方的调用栈。

use crate::message::{CategoryId, ClientId, MessageKey};
use thiserror::Error;

/// 客户端回调返回的错误类型。
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// ## `BrokerError`
///
/// attach / send / broadcast 的同步错误。broker 内部不做重试，由调用方决定。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("there is already a message client with id {0}")]
    DuplicateClient(ClientId),

    #[error("target client id {0} is not registered")]
    NoSuchClient(ClientId),

    #[error("client id {sender}: no recipients available{}", fmt_category(.category))]
    NoRecipients {
        sender: ClientId,
        category: Option<CategoryId>,
    },
}

fn fmt_category(category: &Option<CategoryId>) -> String {
    match category {
        Some(c) => format!(" for category {c}"),
        None => String::new(),
    }
}

/// 回调失败的具体形式。
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("handler returned an error: {0}")]
    Returned(#[source] HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// ## `HandlerInvocationError`
///
/// 某个邮箱在投递消息时回调失败。只影响这一条消息，后续消息继续投递。
#[derive(Debug, Error)]
#[error("client id {client_id}: unable to handle message {key}")]
pub struct HandlerInvocationError {
    pub client_id: ClientId,
    pub key: MessageKey,
    #[source]
    pub failure: HandlerFailure,
}

/// 配置校验错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("queue_capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("no Tokio runtime is running on the current thread")]
    NoRuntime,
}
