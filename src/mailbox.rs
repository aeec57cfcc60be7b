// src/mailbox.rs

//! # 邮箱模块 (mailbox)
//!
//! 每个注册客户端拥有一个 `Mailbox`：一个有界队列加一个消费任务。
//! 多个发送方可以并发投递，消费任务按入队顺序逐条调用客户端处理器。

use crate::error::{HandlerFailure, HandlerInvocationError};
use crate::handler::{ErrorObserver, MessageHandler};
use crate::message::{CategoryId, ClientId, Message};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// `post` 的结果。发送方不会因为单个邮箱的状态而失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Queued,
    /// 队列已满，新消息被丢弃。
    Dropped,
    /// 邮箱已释放，消息被忽略。
    Disposed,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// 消费任务启动前由邮箱暂存的部分。
struct Consumer {
    rx: mpsc::Receiver<Message>,
    handler: Arc<dyn MessageHandler>,
    observer: Arc<dyn ErrorObserver>,
}

/// ## `Mailbox`
///
/// 状态机：Active → Disposed（终态）。
/// 由 `Registry` 独占持有；`dispose` 之后 `post` 变成无操作。
pub struct Mailbox {
    client_id: ClientId,
    categories: Vec<CategoryId>,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    consumer: Mutex<Option<Consumer>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("client_id", &self.client_id)
            .field("categories", &self.categories)
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    pub(crate) fn new(
        client_id: ClientId,
        categories: Vec<CategoryId>,
        capacity: usize,
        handler: Arc<dyn MessageHandler>,
        observer: Arc<dyn ErrorObserver>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            client_id,
            categories,
            tx,
            cancel: CancellationToken::new(),
            consumer: Mutex::new(Some(Consumer {
                rx,
                handler,
                observer,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// 订阅的分类，已去重。为空表示只接收无分类广播。
    pub fn categories(&self) -> &[CategoryId] {
        &self.categories
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// 非阻塞入队。队列满时丢弃这条新消息。
    pub fn post(&self, message: Message) -> PostOutcome {
        if self.is_disposed() {
            return PostOutcome::Disposed;
        }
        match self.tx.try_send(message) {
            Ok(()) => PostOutcome::Queued,
            Err(TrySendError::Full(msg)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "MAILBOX",
                    client_id = self.client_id,
                    key = msg.key(),
                    "Queue full, dropping message"
                );
                PostOutcome::Dropped
            }
            // 消费任务已退出，只会发生在释放之后。
            Err(TrySendError::Closed(_)) => PostOutcome::Disposed,
        }
    }

    /// 在给定运行时上启动消费任务。重复调用或释放后调用都不会产生第二个任务。
    pub(crate) fn start(&self, runtime: &Handle) {
        let consumer = match self.consumer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(consumer) = consumer else {
            return;
        };
        if self.is_disposed() {
            return;
        }
        runtime.spawn(consume(
            self.client_id,
            consumer,
            self.cancel.clone(),
            Arc::clone(&self.counters),
        ));
    }

    /// 释放邮箱：取消消费任务。可重复调用。
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!(target: "MAILBOX", client_id = self.client_id, "Disposing mailbox");
            self.cancel.cancel();
        }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 消费循环：取消优先于已就绪的消息，正在执行的处理器也会被取消打断。
async fn consume(
    client_id: ClientId,
    consumer: Consumer,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    let Consumer {
        mut rx,
        handler,
        observer,
    } = consumer;

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        if cancel.is_cancelled() {
            break;
        }

        let key = message.key();
        let invocation = AssertUnwindSafe(handler.handle(client_id, message)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = invocation => outcome,
        };

        let failure = match outcome {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Ok(Err(err)) => HandlerFailure::Returned(err),
            Err(panic) => HandlerFailure::Panicked(panic_message(panic.as_ref())),
        };
        counters.failed.fetch_add(1, Ordering::Relaxed);
        let err = HandlerInvocationError {
            client_id,
            key,
            failure,
        };
        // 观察者的 panic 同样不能终止消费任务。
        let reported = std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_handler_error(&err)));
        if let Err(panic) = reported {
            error!(
                target: "MAILBOX",
                client_id,
                key,
                "Error observer panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }

    rx.close();
    debug!(target: "MAILBOX", client_id, "Consumer stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{ChannelHandler, LogObserver};
    use crate::message::Payload;
    use std::time::Duration;
    use tokio::time::timeout;

    fn msg(key: i64) -> Message {
        Message::new(key, None, Payload::new(key))
    }

    fn mailbox_with_channel(capacity: usize) -> (Mailbox, mpsc::Receiver<crate::handler::Delivery>) {
        let (handler, rx) = ChannelHandler::new(64);
        let mailbox = Mailbox::new(42, vec![5, 6], capacity, Arc::new(handler), Arc::new(LogObserver));
        (mailbox, rx)
    }

    #[tokio::test]
    async fn test_delivers_in_submission_order() {
        let (mailbox, mut rx) = mailbox_with_channel(16);
        mailbox.start(&Handle::current());

        for key in 0..10 {
            assert_eq!(mailbox.post(msg(key)), PostOutcome::Queued);
        }
        for expected in 0..10 {
            let delivery = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(delivery.client_id, 42);
            assert_eq!(delivery.message.key(), expected);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        // 不启动消费任务，队列只进不出。
        let (mailbox, _rx) = mailbox_with_channel(2);
        assert_eq!(mailbox.post(msg(1)), PostOutcome::Queued);
        assert_eq!(mailbox.post(msg(2)), PostOutcome::Queued);
        assert_eq!(mailbox.post(msg(3)), PostOutcome::Dropped);
        assert_eq!(mailbox.dropped(), 1);
    }

    #[tokio::test]
    async fn test_post_after_dispose_is_noop() {
        let (mailbox, mut rx) = mailbox_with_channel(4);
        mailbox.start(&Handle::current());
        mailbox.dispose();
        mailbox.dispose();

        assert!(mailbox.is_disposed());
        assert_eq!(mailbox.post(msg(1)), PostOutcome::Disposed);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_messages_not_delivered_after_dispose() {
        let (mailbox, mut rx) = mailbox_with_channel(8);
        for key in 0..5 {
            mailbox.post(msg(key));
        }
        mailbox.dispose();
        mailbox.start(&Handle::current());

        // 处理器随邮箱的 Consumer 一起被丢弃，通道直接关闭。
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_consuming() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<i64>();
        let handler = move |_: ClientId, m: &Message| -> Result<(), HandlerError> {
            if m.key() == 1 {
                return Err("bad message".into());
            }
            if m.key() == 2 {
                panic!("handler exploded");
            }
            let _ = seen_tx.send(m.key());
            Ok(())
        };
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<(ClientId, i64, bool)>();
        let observer = move |e: &HandlerInvocationError| {
            let panicked = matches!(e.failure, HandlerFailure::Panicked(_));
            let _ = err_tx.send((e.client_id, e.key, panicked));
        };

        let mailbox = Mailbox::new(7, vec![], 8, Arc::new(handler), Arc::new(observer));
        mailbox.start(&Handle::current());
        for key in 0..5 {
            mailbox.post(msg(key));
        }

        let wait = Duration::from_secs(2);
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(0));
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(3));
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(4));
        assert_eq!(timeout(wait, err_rx.recv()).await.unwrap(), Some((7, 1, false)));
        assert_eq!(timeout(wait, err_rx.recv()).await.unwrap(), Some((7, 2, true)));
        assert_eq!(mailbox.failed(), 2);
        assert!(mailbox.delivered() >= 2);
    }

    #[tokio::test]
    async fn test_panicking_observer_keeps_consuming() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<i64>();
        let handler = move |_: ClientId, m: &Message| -> Result<(), HandlerError> {
            if m.key() == 0 {
                return Err("first message rejected".into());
            }
            let _ = seen_tx.send(m.key());
            Ok(())
        };
        let observer = |_: &HandlerInvocationError| panic!("observer exploded");

        let mailbox = Mailbox::new(9, vec![], 8, Arc::new(handler), Arc::new(observer));
        mailbox.start(&Handle::current());
        for key in 0..3 {
            assert_eq!(mailbox.post(msg(key)), PostOutcome::Queued);
        }

        let wait = Duration::from_secs(2);
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(1));
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(2));
        assert_eq!(mailbox.failed(), 1);
        assert!(!mailbox.is_disposed());
        assert_eq!(mailbox.post(msg(3)), PostOutcome::Queued);
        assert_eq!(timeout(wait, seen_rx.recv()).await.unwrap(), Some(3));
    }
}
