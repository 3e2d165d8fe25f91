use std::hash::Hash;

use moka::sync::Cache;

/// Upper bound on entries; one instance never sees more chunks than this
const MAX_ENTRIES: u64 = 10_000;

/// Memoization cache owned by one strategy instance.
///
/// Entries live as long as the instance, which serves a single query.
#[derive(Debug)]
pub struct MemoArena<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<K, V>,
}

impl<K, V> Default for MemoArena<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            entries: Cache::new(MAX_ENTRIES),
        }
    }
}

impl<K, V> MemoArena<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_insert() {
        let arena: MemoArena<String, Vec<String>> = MemoArena::new();
        assert!(arena.get(&"c1".to_string()).is_none());
        assert!(arena.is_empty());

        arena.insert("c1".to_string(), vec!["rag".to_string()]);

        assert_eq!(arena.get(&"c1".to_string()), Some(vec!["rag".to_string()]));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let arena: MemoArena<String, usize> = MemoArena::new();

        arena.insert("g".to_string(), 1);
        arena.insert("g".to_string(), 2);

        assert_eq!(arena.get(&"g".to_string()), Some(2));
        assert_eq!(arena.len(), 1);
    }
}
