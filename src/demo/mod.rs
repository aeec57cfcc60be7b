// src/demo/mod.rs

//! # 演示负载 (demo)
//!
//! 一组消费者加一个生产者，用来驱动 broker 的三种发送方式。

pub mod actor;
pub mod consumer;
pub mod producer;

/// 演示中所有消息使用的业务键。
pub const DEMO_MESSAGE_KEY: i64 = 68_723_673_678;
