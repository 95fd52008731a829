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

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use futures::TryStreamExt;
use log::debug;
use log::info;
use log::warn;
use serde_json::Map;
use serde_json::Value;

use crate::errors::CacheError;
use crate::CacheConfig;
use crate::CacheStore;
use crate::TypeConfig;
use crate::SCAN_CURSOR_START;

/// Counts of an [`InvalidationEngine::update_by_pattern`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys whose value was merged and re-stored.
    pub updated: u64,

    /// Matched keys left alone: gone before they could be read, not a JSON object, or a
    /// failed read or write of that single key.
    pub skipped: u64,
}

/// Evicts or patches every cache key matching a glob pattern.
///
/// Both operations walk the keyspace with `SCAN` and act on one batch at a time. Dropping
/// the returned future between batches is safe: keys not reached yet stay stale until
/// their TTL expires.
pub struct InvalidationEngine<C: TypeConfig> {
    store: Arc<C::CacheStore>,
    config: CacheConfig,
}

impl<C: TypeConfig> Clone for InvalidationEngine<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C> InvalidationEngine<C>
where
    C: TypeConfig,
{
    pub fn new(store: Arc<C::CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Stream the keys matching `pattern`, one `SCAN` round per item, until the cursor
    /// comes back to `"0"`.
    ///
    /// Items may be empty vectors: a round can match nothing and still not be the last.
    pub fn scan<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<Vec<String>, CacheError>> {
        futures::stream::try_unfold(Some(SCAN_CURSOR_START.to_string()), move |cursor| {
            self.scan_round(cursor, pattern)
        })
        .boxed()
    }

    async fn scan_round(
        &self,
        cursor: Option<String>,
        pattern: &str,
    ) -> Result<Option<(Vec<String>, Option<String>)>, CacheError> {
        let Some(cursor) = cursor else {
            return Ok(None);
        };

        let page = self
            .store
            .scan(&cursor, pattern, self.config.scan_batch_size)
            .await
            .map_err(|e| CacheError::from(e).context(format!("scan {} from cursor {}", pattern, cursor)))?;

        let next = if page.is_last() { None } else { Some(page.cursor) };
        Ok(Some((page.keys, next)))
    }

    /// Delete every key matching `pattern`; returns how many were deleted.
    pub async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut removed = 0;
        let mut rounds = self.scan(pattern);

        while let Some(keys) = rounds.try_next().await? {
            if keys.is_empty() {
                continue;
            }

            removed += self
                .store
                .del(&keys)
                .await
                .map_err(|e| CacheError::from(e).context(format!("del {} keys matching {}", keys.len(), pattern)))?;
        }

        info!("InvalidationEngine: removed {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    /// Shallow-merge `fields` into the JSON object at every key matching `pattern`, and
    /// re-store it with `ttl`.
    ///
    /// A key that fails on its own is skipped and counted; only a failing `SCAN` aborts.
    pub async fn update_by_pattern(
        &self,
        pattern: &str,
        fields: &Map<String, Value>,
        ttl: Duration,
    ) -> Result<MergeReport, CacheError> {
        let mut report = MergeReport::default();
        let mut rounds = self.scan(pattern);

        while let Some(keys) = rounds.try_next().await? {
            for key in keys {
                if self.merge_one(&key, fields, ttl).await {
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        info!(
            "InvalidationEngine: merged into {} keys matching {}, skipped {}",
            report.updated, pattern, report.skipped
        );
        Ok(report)
    }

    /// Delete a single key; returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let n = self
            .store
            .del(&[key.to_string()])
            .await
            .map_err(|e| CacheError::from(e).context(format!("del {}", key)))?;
        Ok(n > 0)
    }

    /// Returns whether `key` was updated.
    async fn merge_one(&self, key: &str, fields: &Map<String, Value>, ttl: Duration) -> bool {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("InvalidationEngine: {} vanished before merge", key);
                return false;
            }
            Err(e) => {
                warn!("InvalidationEngine: get {} failed: {}; skipped", key, e);
                return false;
            }
        };

        let mut obj = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(obj)) => obj,
            Ok(_) => {
                warn!("InvalidationEngine: {} does not hold a JSON object; skipped", key);
                return false;
            }
            Err(e) => {
                warn!("InvalidationEngine: {} holds invalid JSON: {}; skipped", key, e);
                return false;
            }
        };

        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }

        let merged = Value::Object(obj).to_string();
        if let Err(e) = self.store.set(key, merged, ttl).await {
            warn!("InvalidationEngine: set {} failed: {}; skipped", key, e);
            return false;
        }

        true
    }
}
