// src/registry.rs

//! # 注册表模块 (registry)
//!
//! 持有所有存活的邮箱，以及 分类 → 客户端 的二级索引。
//! 两张表由同一把 `RwLock` 保护：变更操作互斥，查询之间可以并发，
//! 查询永远看不到只完成一半的 attach / remove。

use crate::error::BrokerError;
use crate::mailbox::Mailbox;
use crate::message::{CategoryId, ClientId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<ClientId, Arc<Mailbox>>,
    /// 派生索引，始终等于所有已注册邮箱订阅分类的并集。
    by_category: HashMap<CategoryId, BTreeSet<ClientId>>,
}

impl RegistryState {
    fn unindex(&mut self, mailbox: &Mailbox) {
        for category in mailbox.categories() {
            if let Some(bucket) = self.by_category.get_mut(category) {
                bucket.remove(&mailbox.client_id());
                if bucket.is_empty() {
                    self.by_category.remove(category);
                }
            }
        }
    }
}

/// ## `Registry`
pub struct Registry {
    state: RwLock<RegistryState>,
    runtime: Handle,
}

impl Registry {
    /// 邮箱的消费任务都在 `runtime` 上启动。
    pub fn new(runtime: Handle) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            runtime,
        }
    }

    /// 注册一个邮箱并启动它的消费任务。
    ///
    /// - id 已存在时返回 `DuplicateClient`，注册表保持不变。
    /// - 主表写入与索引更新在同一个写锁内完成。
    pub(crate) async fn attach(&self, mailbox: Mailbox) -> Result<Arc<Mailbox>, BrokerError> {
        let client_id = mailbox.client_id();
        let mut state = self.state.write().await;
        if state.by_id.contains_key(&client_id) {
            return Err(BrokerError::DuplicateClient(client_id));
        }

        let mailbox = Arc::new(mailbox);
        for category in mailbox.categories() {
            state.by_category.entry(*category).or_default().insert(client_id);
        }
        state.by_id.insert(client_id, Arc::clone(&mailbox));
        mailbox.start(&self.runtime);
        drop(state);

        debug!(
            target: "REGISTRY",
            client_id,
            categories = ?mailbox.categories(),
            "Attached mailbox"
        );
        Ok(mailbox)
    }

    /// 移除并释放邮箱。未知 id 是无操作，返回 `false`。
    pub async fn remove(&self, client_id: ClientId) -> bool {
        let mut state = self.state.write().await;
        let Some(mailbox) = state.by_id.remove(&client_id) else {
            return false;
        };
        mailbox.dispose();
        state.unindex(&mailbox);
        drop(state);

        debug!(target: "REGISTRY", client_id, "Removed mailbox");
        true
    }

    /// 移除全部邮箱，返回移除的数量。
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.write().await;
        let removed = state.by_id.len();
        for (_, mailbox) in state.by_id.drain() {
            mailbox.dispose();
        }
        state.by_category.clear();
        drop(state);

        info!(target: "REGISTRY", removed, "Cleared all mailboxes");
        removed
    }

    /// 订阅了 `category` 的邮箱快照。
    pub async fn resolve_for_category(&self, category: CategoryId) -> Vec<Arc<Mailbox>> {
        let state = self.state.read().await;
        state
            .by_category
            .get(&category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 除 `excluding` 之外所有邮箱的快照。
    pub async fn resolve_all(&self, excluding: ClientId) -> Vec<Arc<Mailbox>> {
        let state = self.state.read().await;
        state
            .by_id
            .iter()
            .filter(|(id, _)| **id != excluding)
            .map(|(_, mailbox)| Arc::clone(mailbox))
            .collect()
    }

    pub async fn resolve_one(&self, client_id: ClientId) -> Option<Arc<Mailbox>> {
        self.state.read().await.by_id.get(&client_id).cloned()
    }

    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.state.read().await.by_id.contains_key(&client_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.by_id.is_empty()
    }

    /// 已注册的客户端 id，升序。
    pub async fn client_ids(&self) -> Vec<ClientId> {
        let state = self.state.read().await;
        let mut ids: Vec<_> = state.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 订阅了 `category` 的客户端 id，升序。
    pub async fn subscribers_of(&self, category: CategoryId) -> Vec<ClientId> {
        let state = self.state.read().await;
        state
            .by_category
            .get(&category)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 分类索引的完整快照。
    pub async fn category_index(&self) -> HashMap<CategoryId, BTreeSet<ClientId>> {
        self.state.read().await.by_category.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::LogObserver;
    use crate::message::Message;

    fn mailbox(client_id: ClientId, categories: Vec<CategoryId>) -> Mailbox {
        let noop = |_: ClientId, _: &Message| -> Result<(), HandlerError> { Ok(()) };
        let mut categories = categories;
        categories.sort_unstable();
        categories.dedup();
        Mailbox::new(client_id, categories, 8, Arc::new(noop), Arc::new(LogObserver))
    }

    /// 索引必须恰好等于已注册客户端订阅分类的并集。
    async fn assert_index_consistent(registry: &Registry) {
        let index = registry.category_index().await;
        let mut expected: HashMap<CategoryId, BTreeSet<ClientId>> = HashMap::new();
        for id in registry.client_ids().await {
            let mb = registry.resolve_one(id).await.unwrap();
            for category in mb.categories() {
                expected.entry(*category).or_default().insert(id);
            }
        }
        assert_eq!(index, expected);
    }

    #[tokio::test]
    async fn test_attach_indexes_categories() {
        let registry = Registry::new(Handle::current());
        registry.attach(mailbox(27, vec![56, 23, 5])).await.unwrap();

        assert!(registry.contains(27).await);
        for category in [56, 23, 5] {
            assert_eq!(registry.subscribers_of(category).await, vec![27]);
        }
        assert_index_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_duplicate_attach_leaves_state_untouched() {
        let registry = Registry::new(Handle::current());
        let first = registry.attach(mailbox(1, vec![5])).await.unwrap();

        let err = registry.attach(mailbox(1, vec![6, 7])).await.unwrap_err();
        assert_eq!(err, BrokerError::DuplicateClient(1));

        assert!(Arc::ptr_eq(&registry.resolve_one(1).await.unwrap(), &first));
        assert!(registry.subscribers_of(6).await.is_empty());
        assert!(registry.subscribers_of(7).await.is_empty());
        assert!(!first.is_disposed());
        assert_index_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_remove_scrubs_index_and_disposes() {
        let registry = Registry::new(Handle::current());
        let mb = registry.attach(mailbox(42, vec![56, 23, 5])).await.unwrap();
        registry.attach(mailbox(43, vec![5])).await.unwrap();

        assert!(registry.remove(42).await);
        assert!(mb.is_disposed());
        assert!(registry.resolve_one(42).await.is_none());
        assert!(registry.subscribers_of(56).await.is_empty());
        assert!(registry.subscribers_of(23).await.is_empty());
        assert_eq!(registry.subscribers_of(5).await, vec![43]);

        let index = registry.category_index().await;
        assert!(!index.contains_key(&56));
        assert!(!index.contains_key(&23));
        assert_index_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let registry = Registry::new(Handle::current());
        registry.attach(mailbox(1, vec![1])).await.unwrap();
        assert!(!registry.remove(52).await);
        assert_eq!(registry.len().await, 1);
        assert_index_consistent(&registry).await;
    }

    #[tokio::test]
    async fn test_resolve_snapshots() {
        let registry = Registry::new(Handle::current());
        for id in 0..4 {
            registry.attach(mailbox(id, vec![id % 2])).await.unwrap();
        }

        let mut all: Vec<_> = registry
            .resolve_all(2)
            .await
            .iter()
            .map(|mb| mb.client_id())
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 3]);

        let odd: Vec<_> = registry
            .resolve_for_category(1)
            .await
            .iter()
            .map(|mb| mb.client_id())
            .collect();
        assert_eq!(odd, vec![1, 3]);
        assert!(registry.resolve_for_category(9).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_empties_everything() {
        let registry = Registry::new(Handle::current());
        let mut attached = Vec::new();
        for id in 0..5 {
            attached.push(registry.attach(mailbox(id, vec![id, 100])).await.unwrap());
        }

        assert_eq!(registry.clear_all().await, 5);
        assert!(registry.is_empty().await);
        assert!(registry.category_index().await.is_empty());
        assert!(attached.iter().all(|mb| mb.is_disposed()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attach_remove_keeps_index_consistent() {
        let registry = Arc::new(Registry::new(Handle::current()));
        let mut tasks = Vec::new();
        for id in 0..64i64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.attach(mailbox(id, vec![id % 3, id % 5])).await.unwrap();
                if id % 2 == 0 {
                    registry.remove(id).await;
                }
            }));
        }
        futures::future::join_all(tasks).await;

        assert_eq!(registry.len().await, 32);
        assert_index_consistent(&registry).await;
    }
}
