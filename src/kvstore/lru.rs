use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{KvStore, KvStoreConfig, KvStoreError};

#[derive(Debug)]
struct Node {
    key: String,
    value: String,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list stored in a slot arena, most recent entry at the head.
#[derive(Debug, Default)]
struct LruList {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<String, usize>,
}

impl LruList {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, idx: usize) -> &Node {
        self.slots[idx].as_ref().expect("indexed slot is occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx].as_mut().expect("indexed slot is occupied")
    }

    fn push_front(&mut self, key: String, value: String) {
        let node = Node {
            key: key.clone(),
            value,
            inserted_at: Instant::now(),
            prev: None,
            next: None,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.link_front(idx);
        self.index.insert(key, idx);
    }

    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    fn remove(&mut self, idx: usize) -> Node {
        self.unlink(idx);
        let node = self.slots[idx].take().expect("indexed slot is occupied");
        self.free.push(idx);
        self.index.remove(&node.key);
        node
    }

    fn remove_oldest(&mut self) -> Option<(String, String)> {
        let tail = self.tail?;
        let node = self.remove(tail);
        Some((node.key, node.value))
    }

    fn purge_expired(&mut self, expiration: Duration) -> usize {
        let expired: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&idx| self.node(idx).inserted_at.elapsed() > expiration)
            .collect();

        for idx in &expired {
            self.remove(*idx);
        }

        expired.len()
    }
}

/// Bounded in-process LRU store, safe for concurrent access.
///
/// All operations go through a single mutex guarding the list and its index.
pub struct LruStore {
    inner: Arc<Mutex<LruList>>,
    max_entries: Option<usize>,
    expiration: Option<Duration>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl LruStore {
    /// `max_entries` of `None` disables the bound.
    pub fn new(max_entries: Option<usize>, expiration: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruList::default())),
            max_entries,
            expiration,
            cleanup: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &KvStoreConfig) -> Self {
        let max_entries = usize::try_from(cfg.max_entries).ok();
        let expiration = match cfg.cache.expiration {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let store = Self::new(max_entries, expiration);

        if cfg.cache.cleanup_interval > 0 {
            store.start_cleanup(Duration::from_secs(cfg.cache.cleanup_interval));
        }

        store
    }

    /// Spawns a task purging expired entries every `interval`.
    pub fn start_cleanup(&self, interval: Duration) {
        let Some(expiration) = self.expiration else {
            log::debug!("LRU cleanup requested without expiration, ignoring");
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No tokio runtime available, LRU cleanup disabled");
            return;
        };

        let weak: Weak<Mutex<LruList>> = Arc::downgrade(&self.inner);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.lock().purge_expired(expiration);
                if purged > 0 {
                    log::debug!("Purged {} expired entries from LRU cache", purged);
                }
            }
        });

        if let Some(previous) = self.cleanup.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the least recently used entry.
    pub fn remove_oldest(&self) -> Option<(String, String)> {
        self.inner.lock().remove_oldest()
    }

    fn is_expired(&self, node: &Node) -> bool {
        self.expiration
            .map(|expiration| node.inserted_at.elapsed() > expiration)
            .unwrap_or(false)
    }
}

#[async_trait]
impl KvStore for LruStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let mut list = self.inner.lock();

        let Some(&idx) = list.index.get(key) else {
            return Ok(None);
        };

        if self.is_expired(list.node(idx)) {
            list.remove(idx);
            return Ok(None);
        }

        list.move_to_front(idx);
        Ok(Some(list.node(idx).value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        let mut list = self.inner.lock();

        if let Some(&idx) = list.index.get(key) {
            list.move_to_front(idx);
            let node = list.node_mut(idx);
            node.value = value.to_string();
            node.inserted_at = Instant::now();
            return Ok(());
        }

        list.push_front(key.to_string(), value.to_string());

        if let Some(max) = self.max_entries {
            if list.len() > max {
                if let Some((evicted, _)) = list.remove_oldest() {
                    log::debug!("Evicted {} from LRU cache", evicted);
                }
            }
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        let list = self.inner.lock();

        match list.index.get(key) {
            Some(&idx) => !self.is_expired(list.node(idx)),
            None => false,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        let mut list = self.inner.lock();

        match list.index.get(key) {
            Some(&idx) => {
                list.remove(idx);
                Ok(())
            }
            None => Err(KvStoreError::KeyNotFound(key.to_string())),
        }
    }

    async fn close(&self) -> Result<(), KvStoreError> {
        if let Some(task) = self.cleanup.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(max: usize) -> LruStore {
        LruStore::new(Some(max), None)
    }

    #[tokio::test]
    async fn get_returns_stored_value() {
        let store = bounded(10);
        store.set("a", "1").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert!(store.exists("a").await);
    }

    #[tokio::test]
    async fn absent_is_not_empty() {
        let store = bounded(10);
        store.set("empty", "").await.unwrap();

        assert_eq!(store.get("empty").await.unwrap(), Some(String::new()));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(store.exists("empty").await);
        assert!(!store.exists("missing").await);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let store = bounded(3);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.set("c", "3").await.unwrap();

        // "a" is the oldest insert but was just read
        assert!(store.get("a").await.unwrap().is_some());

        store.set("d", "4").await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("c").await.unwrap(), Some("3".to_string()));
        assert_eq!(store.get("d").await.unwrap(), Some("4".to_string()));
    }

    #[tokio::test]
    async fn inserting_past_capacity_evicts_exactly_one() {
        let store = bounded(5);
        for i in 0..5 {
            store.set(&format!("k{}", i), "v").await.unwrap();
        }
        assert_eq!(store.len(), 5);

        store.set("k5", "v").await.unwrap();

        assert_eq!(store.len(), 5);
        assert!(!store.exists("k0").await);
        for i in 1..6 {
            assert!(store.exists(&format!("k{}", i)).await);
        }
    }

    #[tokio::test]
    async fn set_existing_key_updates_and_bumps() {
        let store = bounded(2);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.set("a", "updated").await.unwrap();
        store.set("c", "3").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("updated".to_string()));
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn unbounded_never_evicts() {
        let store = LruStore::new(None, None);
        for i in 0..1000 {
            store.set(&i.to_string(), "v").await.unwrap();
        }
        assert_eq!(store.len(), 1000);
    }

    #[tokio::test]
    async fn negative_max_entries_disables_bound() {
        let cfg = KvStoreConfig {
            kind: Some("cache".to_string()),
            max_entries: -1,
            ..Default::default()
        };
        let store = LruStore::from_config(&cfg);
        for i in 0..50 {
            store.set(&i.to_string(), "v").await.unwrap();
        }
        assert_eq!(store.len(), 50);
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_found() {
        let store = bounded(2);
        store.set("a", "1").await.unwrap();

        assert!(store.delete("a").await.is_ok());
        assert!(matches!(
            store.delete("a").await,
            Err(KvStoreError::KeyNotFound(key)) if key == "a"
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn slots_are_reused_after_removal() {
        let store = bounded(2);
        for i in 0..100 {
            store.set(&i.to_string(), "v").await.unwrap();
        }
        assert_eq!(store.len(), 2);
        assert!(store.inner.lock().slots.len() <= 3);
    }

    #[tokio::test]
    async fn remove_oldest_follows_recency() {
        let store = bounded(10);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.get("a").await.unwrap();

        assert_eq!(store.remove_oldest(), Some(("b".to_string(), "2".to_string())));
        assert_eq!(store.remove_oldest(), Some(("a".to_string(), "1".to_string())));
        assert_eq!(store.remove_oldest(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = LruStore::new(None, Some(Duration::from_millis(30)));
        store.set("a", "1").await.unwrap();
        assert!(store.exists("a").await);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!store.exists("a").await);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cleanup_task_purges_expired_entries() {
        let store = LruStore::new(None, Some(Duration::from_millis(20)));
        store.start_cleanup(Duration::from_millis(10));

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.len(), 0);
        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_respect_bound() {
        let store = Arc::new(bounded(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        let key = format!("{}-{}", t, i);
                        store.set(&key, "v").await.unwrap();
                        store.get(&key).await.unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 16);
    }
}
