// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Best-effort TTL cache with glob key scan.
//!
//! Every operation may report a miss even after a successful `set`; callers
//! must tolerate that. Values are opaque strings (JSON); serialization is the
//! orchestrator's responsibility.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
    /// Enumerate live keys matching a glob pattern (`prefix:*:suffix`).
    async fn keys(&self, pattern: &str) -> Vec<String>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache store. Entries expire lazily on read and are swept
/// during scans.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if entry.expires_at > Instant::now() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        // Entry present but expired: drop it under the write lock
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect()
    }
}

/// Match a key against a glob pattern where `*` matches any run of
/// characters (including none). Patterns without `*` are exact matches.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        assert!(cache.get("event:e1").await.is_none());

        cache
            .set("event:e1", "{\"status\":\"LIVENESS\"}".to_string(), Duration::from_secs(300))
            .await;
        assert_eq!(
            cache.get("event:e1").await.unwrap(),
            "{\"status\":\"LIVENESS\"}"
        );

        cache.delete("event:e1").await;
        assert!(cache.get("event:e1").await.is_none());
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = MemoryCache::new();
        cache
            .set("event:e1", "v".to_string(), Duration::from_millis(30))
            .await;
        assert!(cache.get("event:e1").await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("event:e1").await.is_none());
        // expired entries are also invisible to scans
        assert!(cache.keys("event:*").await.is_empty());
    }

    #[tokio::test]
    async fn test_keys_pattern_scan() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("event:e1", "a".to_string(), ttl).await;
        cache.set("proposal:p1:e1", "b".to_string(), ttl).await;
        cache.set("proposal:p2:e1", "c".to_string(), ttl).await;
        cache.set("proposal:p3:e2", "d".to_string(), ttl).await;

        let mut keys = cache.keys("proposal:*:e1").await;
        keys.sort();
        assert_eq!(keys, vec!["proposal:p1:e1", "proposal:p2:e1"]);

        assert_eq!(cache.keys("event:e1").await, vec!["event:e1"]);
        assert!(cache.keys("dispute:*").await.is_empty());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("proposal:*:e1", "proposal:p1:e1"));
        assert!(glob_match("proposal:*", "proposal:p1:e1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("event:e1", "event:e1"));
        assert!(!glob_match("event:e1", "event:e2"));
        assert!(!glob_match("proposal:*:e1", "proposal:p1:e2"));
        assert!(!glob_match("proposal:*:e1", "event:p1:e1"));
        // multiple wildcards
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXcYYb"));
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        let _ = cache.get("k").await;
        let _ = cache.get("k").await;
        let _ = cache.get("absent").await;
        let (hits, misses) = cache.stats();
        assert_eq!(hits, 2);
        assert_eq!(misses, 1);
    }
}
