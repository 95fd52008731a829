// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MemoryCache: an in-process cache store with TTL, cursor scan and fault injection,
//! standing in for Redis in tests.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache_store::CacheStore;
use crate::cache_store::ScanPage;
use crate::cache_store::SCAN_CURSOR_START;
use crate::errors::ConnectionClosed;
use crate::keys::matches_pattern;

/// Open cursors kept at most; past that the oldest is dropped.
const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Calls received, by operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    pub get: u64,
    pub set: u64,
    pub mget: u64,
    pub scan: u64,
    pub del: u64,
}

#[derive(Debug, Default)]
pub struct State {
    data: BTreeMap<String, Entry>,

    connected: bool,

    /// Simulated outage: every call fails while set, connected or not.
    down: bool,

    /// Live scan cursors: cursor id -> the last key returned.
    cursors: BTreeMap<u64, String>,
    next_cursor: u64,

    pub stats: CallStats,
}

impl State {
    fn check(&self, op: &str) -> Result<(), ConnectionClosed> {
        if self.down {
            return Err(ConnectionClosed::new("simulated outage").context(op));
        }
        if !self.connected {
            return Err(ConnectionClosed::new("not connected").context(op));
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<&Entry> {
        self.data.get(key).filter(|e| e.expires_at > Instant::now())
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.data.retain(|_, e| e.expires_at > now);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    pub state: Arc<Mutex<State>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (`true`) or work again (`false`).
    pub async fn set_down(&self, down: bool) {
        self.state.lock().await.down = down;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// The live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        state.purge_expired();
        state.data.keys().cloned().collect()
    }

    /// The raw value at `key`, bypassing connection state and call counting.
    pub async fn raw(&self, key: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.live(key).map(|e| e.value.clone())
    }

    pub async fn stats(&self) -> CallStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn reset_stats(&self) {
        self.state.lock().await.stats = CallStats::default();
    }

    /// Insert directly, bypassing connection state and call counting.
    pub async fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        let mut state = self.state.lock().await;
        state.data.insert(key.to_string(), Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        });
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn connect(&self) -> Result<(), ConnectionClosed> {
        let mut state = self.state.lock().await;
        if state.down {
            return Err(ConnectionClosed::new("simulated outage").context("connect"));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.connected = false;
        state.cursors.clear();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.get += 1;
        state.check("get")?;
        Ok(state.live(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.set += 1;
        state.check("set")?;
        state.data.insert(key.to_string(), Entry {
            value,
            expires_at: Instant::now() + ttl,
        });
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.mget += 1;
        state.check("mget")?;
        Ok(keys
            .iter()
            .map(|k| state.live(k).map(|e| e.value.clone()))
            .collect())
    }

    /// Walks keys in sorted order, `count` slots per round, resuming after the last key
    /// returned; keys inserted or deleted meanwhile do not shift the walk.
    async fn scan(
        &self,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.scan += 1;
        state.check("scan")?;

        let lower = if cursor == SCAN_CURSOR_START {
            Bound::Unbounded
        } else {
            let id: u64 = cursor
                .parse()
                .map_err(|_| ConnectionClosed::new(format!("invalid cursor '{}'", cursor)))?;
            let last = state
                .cursors
                .remove(&id)
                .ok_or_else(|| ConnectionClosed::new(format!("unknown cursor '{}'", cursor)))?;
            Bound::Excluded(last)
        };

        let now = Instant::now();
        let slots: Vec<(String, bool)> = state
            .data
            .range((lower, Bound::Unbounded))
            .take(count.max(1))
            .map(|(k, e)| (k.clone(), e.expires_at > now && matches_pattern(pattern, k)))
            .collect();

        let keys = slots
            .iter()
            .filter(|(_, hit)| *hit)
            .map(|(k, _)| k.clone())
            .collect();

        let exhausted = slots.len() < count.max(1);
        let next = match slots.last() {
            Some((last, _)) if !exhausted => {
                state.next_cursor += 1;
                let id = state.next_cursor;
                state.cursors.insert(id, last.clone());
                while state.cursors.len() > MAX_OPEN_CURSORS {
                    state.cursors.pop_first();
                }
                id.to_string()
            }
            _ => SCAN_CURSOR_START.to_string(),
        };

        Ok(ScanPage { cursor: next, keys })
    }

    async fn del(&self, keys: &[String]) -> Result<u64, ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.del += 1;
        state.check("del")?;
        let mut n = 0;
        for k in keys {
            if let Some(e) = state.data.remove(k) {
                if e.expires_at > Instant::now() {
                    n += 1;
                }
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    async fn connected() -> MemoryCache {
        let c = MemoryCache::new();
        c.connect().await.unwrap();
        c
    }

    async fn scan_all(c: &MemoryCache, pattern: &str, count: usize) -> (Vec<String>, u32) {
        let mut cursor = SCAN_CURSOR_START.to_string();
        let mut keys = vec![];
        let mut rounds = 0;
        loop {
            let page = c.scan(&cursor, pattern, count).await.unwrap();
            rounds += 1;
            keys.extend(page.keys);
            if page.cursor == SCAN_CURSOR_START {
                return (keys, rounds);
            }
            cursor = page.cursor;
        }
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let c = MemoryCache::new();
        assert!(c.get("a").await.is_err());

        c.connect().await.unwrap();
        assert_eq!(c.get("a").await.unwrap(), None);

        c.disconnect().await.unwrap();
        assert!(c.set("a", "1".to_string(), TTL).await.is_err());
    }

    #[tokio::test]
    async fn test_outage() {
        let c = connected().await;
        c.set_down(true).await;
        assert!(c.mget(&["a".to_string()]).await.is_err());
        assert!(c.connect().await.is_err());

        c.set_down(false).await;
        assert_eq!(c.mget(&["a".to_string()]).await.unwrap(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let c = connected().await;
        c.set("a", "1".to_string(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(c.get("a").await.unwrap(), Some("1".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(c.get("a").await.unwrap(), None);
        assert!(c.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_empty_keyspace() {
        let c = connected().await;
        let (keys, rounds) = scan_all(&c, "*", 10).await;
        assert!(keys.is_empty());
        assert_eq!(rounds, 1);
    }

    #[tokio::test]
    async fn test_scan_pages_and_matches() {
        let c = connected().await;
        for i in 0..25 {
            c.set(&format!("user-{:02}-details", i), "{}".to_string(), TTL)
                .await
                .unwrap();
            c.set(&format!("group-{:02}-details", i), "{}".to_string(), TTL)
                .await
                .unwrap();
        }

        let (keys, rounds) = scan_all(&c, "user-*", 7).await;
        assert_eq!(keys.len(), 25);
        assert!(rounds > 1);
        assert!(keys.iter().all(|k| k.starts_with("user-")));
    }

    #[tokio::test]
    async fn test_scan_survives_deletes_between_rounds() {
        let c = connected().await;
        for i in 0..20 {
            c.set(&format!("k{:02}", i), "{}".to_string(), TTL).await.unwrap();
        }

        let mut cursor = SCAN_CURSOR_START.to_string();
        let mut seen = 0;
        loop {
            let page = c.scan(&cursor, "k*", 3).await.unwrap();
            seen += page.keys.len();
            c.del(&page.keys).await.unwrap();
            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(seen, 20);
        assert!(c.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_scans_do_not_pile_up() {
        // 1. Many scans stopped after their first round
        let c = connected().await;
        for i in 0..5 {
            c.set(&format!("k{}", i), "{}".to_string(), TTL).await.unwrap();
        }
        for _ in 0..MAX_OPEN_CURSORS + 100 {
            let page = c.scan(SCAN_CURSOR_START, "*", 2).await.unwrap();
            assert!(!page.is_last());
        }
        assert_eq!(c.state.lock().await.cursors.len(), MAX_OPEN_CURSORS);

        // 2. The oldest cursor is gone, a fresh one still resumes
        assert!(c.scan("1", "*", 2).await.is_err());
        let first = c.scan(SCAN_CURSOR_START, "*", 2).await.unwrap();
        let next = c.scan(&first.cursor, "*", 2).await.unwrap();
        assert_eq!(next.keys, vec!["k2".to_string(), "k3".to_string()]);
    }
}
