//! External identity to directory object id cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;

use crate::error::Result;

/// Memoizes directory lookups for the lifetime of the process.
///
/// Each external id owns one [`OnceCell`]; concurrent misses for the same id
/// await the same lookup. A failed lookup leaves the cell empty so the next
/// caller tries again. The map lock is never held while a lookup runs.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RwLock<HashMap<String, Arc<OnceCell<String>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached object id for `external_id`, if resolved.
    pub fn get(&self, external_id: &str) -> Option<String> {
        self.entries
            .read()
            .get(external_id)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached id, or run `lookup` once and cache its success.
    pub async fn get_or_resolve<F, Fut>(&self, external_id: &str, lookup: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cell = self.cell(external_id);
        cell.get_or_try_init(lookup).await.cloned()
    }

    fn cell(&self, external_id: &str) -> Arc<OnceCell<String>> {
        if let Some(cell) = self.entries.read().get(external_id) {
            return cell.clone();
        }
        self.entries
            .write()
            .entry(external_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PresenceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_lookup_runs_once() {
        let cache = IdentityCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let id = cache
                .get_or_resolve("alice@example.com", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("object-1".to_string())
                })
                .await
                .unwrap();
            assert_eq!(id, "object-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("alice@example.com").as_deref(), Some("object-1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = IdentityCache::new();

        let err = cache
            .get_or_resolve("bob@example.com", || async {
                Err(PresenceError::NotFound("bob@example.com".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PresenceError::NotFound(_)));
        assert!(cache.is_empty());

        let id = cache
            .get_or_resolve("bob@example.com", || async { Ok("object-2".to_string()) })
            .await
            .unwrap();
        assert_eq!(id, "object-2");
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_lookup() {
        let cache = Arc::new(IdentityCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_resolve("carol@example.com", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok("object-3".to_string())
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "object-3");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
