//! Process-wide memo of synthesized templates

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use super::synthesizer::{synthesize, OperationKind};
use crate::error::Result;
use crate::mapping::{describe_entity, Entity};

/// Cache key: mapped type, operation and batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub type_id: TypeId,
    pub operation: OperationKind,
    pub batch_size: Option<usize>,
}

impl TemplateKey {
    pub fn of<T: Entity>(operation: OperationKind, batch_size: Option<usize>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            operation,
            batch_size,
        }
    }
}

/// Synthesized templates, computed at most once per key
///
/// Entries are never evicted; the key space is bounded by mapped types,
/// operations and the batch sizes actually used.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<TemplateKey, Arc<OnceCell<Arc<str>>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the template for `key`, running `create` if it is not cached yet
    ///
    /// Concurrent first requests for the same key block on a single run of
    /// `create`. A failed run caches nothing.
    pub fn get_or_create<F>(&self, key: TemplateKey, create: F) -> Result<Arc<str>>
    where
        F: FnOnce() -> Result<String>,
    {
        // Clone the cell out so the shard lock is not held while synthesizing.
        let cell = Arc::clone(self.entries.entry(key).or_default().value());
        cell.get_or_try_init(|| {
            tracing::debug!(operation = %key.operation, batch_size = ?key.batch_size, "Synthesizing SQL template");
            create().map(Arc::from)
        })
        .cloned()
    }

    /// Template for operation `kind` over mapped type `T`
    pub fn template<T: Entity>(
        &self,
        kind: OperationKind,
        batch_size: Option<usize>,
    ) -> Result<Arc<str>> {
        self.get_or_create(TemplateKey::of::<T>(kind, batch_size), || {
            let entity = describe_entity::<T>()?;
            synthesize(&entity, kind, batch_size)
        })
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::Widget;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_concurrent_first_requests_synthesize_once() {
        let cache = Arc::new(TemplateCache::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));
        let key = TemplateKey::of::<Widget>(OperationKind::Select, None);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(key, || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok("SELECT 1".to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<str>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn test_keys_distinguish_batch_size() {
        let cache = TemplateCache::new();
        let two = cache.template::<Widget>(OperationKind::BulkInsert, Some(2)).unwrap();
        let three = cache.template::<Widget>(OperationKind::BulkInsert, Some(3)).unwrap();
        assert_ne!(two, three);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_template_is_synthesized_from_the_entity_descriptor() {
        let cache = TemplateCache::new();
        let sql = cache.template::<Widget>(OperationKind::SelectByKey, None).unwrap();
        let entity = describe_entity::<Widget>().unwrap();
        assert_eq!(
            &*sql,
            synthesize(&entity, OperationKind::SelectByKey, None).unwrap()
        );
        assert!(Arc::ptr_eq(
            &sql,
            &cache.template::<Widget>(OperationKind::SelectByKey, None).unwrap()
        ));
    }

    #[test]
    fn test_failed_synthesis_is_not_cached() {
        let cache = TemplateCache::new();
        let key = TemplateKey::of::<Widget>(OperationKind::Count, None);
        let err = cache.get_or_create(key, || Err(Error::configuration("boom")));
        assert!(err.is_err());
        assert!(cache.is_empty());

        let sql = cache.get_or_create(key, || Ok("SELECT COUNT(1)".to_string())).unwrap();
        assert_eq!(&*sql, "SELECT COUNT(1)");
    }
}
