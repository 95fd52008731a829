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

//! Testing utilities: fixtures and ordering assertions.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::SequenceError;
use crate::testing::memory_cache::MemoryCache;
use crate::testing::memory_store::MemoryStore;
use crate::testing::types::TestConfig;
use crate::Cache;
use crate::CacheConfig;
use crate::Document;
use crate::OrderedScope;
use crate::Page;
use crate::PageMeta;
use crate::Sequencer;
use crate::SequencerConfig;

/// Turn a `json!` object into a [`Document`]; anything else becomes an empty one.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(m) => m,
        _ => Document::new(),
    }
}

/// A connected cache over a fresh [`MemoryCache`], which is returned for inspection.
pub async fn new_cache(config: CacheConfig) -> (Cache<TestConfig>, MemoryCache) {
    let mem = MemoryCache::new();
    let cache = Cache::<TestConfig>::new(mem.clone(), config, "test-cache")
        .await
        .unwrap_or_else(|e| panic!("memory cache must connect: {}", e));
    (cache, mem)
}

/// A sequencer over a fresh [`MemoryStore`] that retries quickly.
pub fn new_sequencer(scope: OrderedScope) -> (Sequencer<TestConfig>, MemoryStore) {
    let store = MemoryStore::new();
    let config = SequencerConfig::default().with_retry_backoff(
        std::time::Duration::from_millis(1),
        std::time::Duration::from_millis(5),
    );
    let seq = Sequencer::new(Arc::new(store.clone()), scope, config);
    (seq, store)
}

/// A page of `n` user records `{id, name}` with ids `u1..=un`.
pub fn user_page(n: u64) -> Page {
    let data = (1..=n)
        .map(|i| serde_json::json!({"id": format!("u{}", i), "name": format!("user {}", i)}))
        .collect();
    Page {
        data,
        meta: PageMeta::new(1, 10, n),
    }
}

/// The ids of the active items under `parent_id`, by index.
pub async fn active_ids(seq: &Sequencer<TestConfig>, parent_id: &str) -> Result<Vec<String>, SequenceError> {
    let items = seq.list_active(parent_id).await?;
    Ok(items.into_iter().map(|i| i.id).collect())
}

/// Check that the active items are dense and in the given order.
///
/// Returns `Ok(Ok(()))` on match, `Ok(Err(msg))` on mismatch, `Err` if the store failed.
pub async fn check_order(
    seq: &Sequencer<TestConfig>,
    parent_id: &str,
    expected_ids: &[&str],
) -> Result<Result<(), String>, SequenceError> {
    match seq.verify_dense(parent_id).await {
        Ok(_) => {}
        Err(SequenceError::NotDense { detail, .. }) => return Ok(Err(detail)),
        Err(e) => return Err(e),
    }

    let actual = active_ids(seq, parent_id).await?;
    if actual != expected_ids {
        return Ok(Err(format!(
            "order mismatch under '{}': expected {:?}, got {:?}",
            parent_id, expected_ids, actual
        )));
    }
    Ok(Ok(()))
}
