// src/lib.rs

//! # light-broker
//!
//! 进程内的轻量级发布/订阅 broker。
//!
//! 每个客户端以唯一的数字 id 注册一个邮箱，并可选地订阅若干分类。
//! 发送方可以点对点发送、向所有客户端广播，或只向某个分类的订阅者广播。
//! 每个邮箱拥有独立的有界队列和消费任务，同一邮箱内按入队顺序投递。
//!
//! ```no_run
//! use light_broker::{Broker, BrokerConfig, ClientId, HandlerError, Message, Payload};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::new(BrokerConfig::default())?;
//! broker
//!     .attach(1, [5], |id: ClientId, msg: &Message| -> Result<(), HandlerError> {
//!         println!("client {id} got key {}", msg.key());
//!         Ok(())
//!     })
//!     .await?;
//!
//! broker.broadcast(99, 1, Some(5), Payload::new("hello")).await?;
//! broker.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod message;
pub mod registry;

pub use config::BrokerConfig;
pub use dispatcher::Broker;
pub use error::{BrokerError, ConfigError, HandlerError, HandlerFailure, HandlerInvocationError};
pub use handler::{ChannelHandler, Delivery, ErrorObserver, LogObserver, MessageHandler};
pub use mailbox::{Mailbox, PostOutcome};
pub use message::{category_from_raw, CategoryId, ClientId, Message, MessageKey, Payload, NO_CATEGORY};
pub use registry::Registry;
