// src/message.rs

//! # 消息模块 (message)
//!
//! 定义了 broker 内部流转的消息类型以及客户端、分类的标识类型。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 客户端（邮箱所有者）的唯一标识。
pub type ClientId = i64;

/// 路由分类标识。
pub type CategoryId = i64;

/// 消息的业务键，由发送方自行定义含义。
pub type MessageKey = i64;

/// 数值形式的“无分类”标记，用于与使用整数协议的调用方互通。
pub const NO_CATEGORY: i64 = -1;

/// 把整数分类转换为 `Option`，`NO_CATEGORY` 映射为 `None`。
pub fn category_from_raw(raw: i64) -> Option<CategoryId> {
    (raw != NO_CATEGORY).then_some(raw)
}

/// ## `Payload`
///
/// 类型擦除的不透明负载。
/// 克隆只增加引用计数，广播时所有接收者共享同一份数据。
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// 尝试将负载向下转型为具体类型 `T`。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// 两个负载是否指向同一份数据。
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

/// ## `Message`
///
/// 不可变的消息值：业务键、可选分类与负载。
/// 字段私有，构造之后无法修改。
#[derive(Clone, Debug)]
pub struct Message {
    key: MessageKey,
    category: Option<CategoryId>,
    payload: Payload,
}

impl Message {
    pub fn new(key: MessageKey, category: Option<CategoryId>, payload: Payload) -> Self {
        Self {
            key,
            category,
            payload,
        }
    }

    pub fn key(&self) -> MessageKey {
        self.key
    }

    pub fn category(&self) -> Option<CategoryId> {
        self.category
    }

    /// 分类的整数形式，无分类时为 `NO_CATEGORY`。
    pub fn raw_category(&self) -> i64 {
        self.category.unwrap_or(NO_CATEGORY)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}
