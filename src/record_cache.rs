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

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CacheError;
use crate::errors::LoadError;
use crate::errors::StoreError;
use crate::keys;
use crate::CacheConfig;
use crate::CacheStore;
use crate::Entity;
use crate::TypeConfig;

/// A cached value that knows its own id, so it can be filed under its detail key.
pub trait Record: Serialize + DeserializeOwned {
    fn record_id(&self) -> Option<&str>;
}

impl Record for Value {
    fn record_id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }
}

/// One position of a multi-get: the key asked for and what was found there.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T> {
    pub key: String,

    /// `None` if the key was absent, expired, or held a value that failed to decode.
    pub value: Option<T>,
}

impl<T> Slot<T> {
    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }

    /// The record id encoded in this slot's detail key.
    pub fn id(&self, entity: Entity) -> Option<&str> {
        keys::id_from_detail_key(entity.singular(), &self.key)
    }
}

/// Per-record cache-aside access over the cache store.
pub struct RecordCache<C: TypeConfig> {
    store: Arc<C::CacheStore>,
    config: CacheConfig,
}

impl<C: TypeConfig> Clone for RecordCache<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C> RecordCache<C>
where
    C: TypeConfig,
{
    pub fn new(store: Arc<C::CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        debug!("RecordCache::get({})", key);

        let raw = self
            .store
            .get(key)
            .await
            .map_err(|e| CacheError::from(e).context(format!("get {}", key)))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let value = serde_json::from_str(&raw).map_err(|e| CacheError::codec(key, e))?;
        Ok(Some(value))
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        debug!("RecordCache::set({}, ttl={:?})", key, ttl);

        let raw = serde_json::to_string(value).map_err(|e| CacheError::codec(key, e))?;
        self.store
            .set(key, raw, ttl)
            .await
            .map_err(|e| CacheError::from(e).context(format!("set {}", key)))
    }

    /// Delete one key; returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let n = self
            .store
            .del(&[key.to_string()])
            .await
            .map_err(|e| CacheError::from(e).context(format!("del {}", key)))?;
        Ok(n > 0)
    }

    /// Return the cached value at `key`, or run `loader`, cache its result and return it.
    ///
    /// The loader is not run on a hit. Two concurrent misses may both run it.
    /// A loader error, `NotFound` included, is returned as is and nothing is cached.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<T, LoadError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => {
                debug!("RecordCache: hit {}", key);
                return Ok(value);
            }
            Ok(None) => {
                debug!("RecordCache: miss {}", key);
            }
            Err(e) => self.tolerate(e)?,
        }

        self.load_and_set(key, ttl, loader).await
    }

    /// Run `loader` unconditionally and overwrite the cached value with its result.
    pub async fn refresh<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, LoadError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.load_and_set(key, ttl, loader).await
    }

    /// Multi-get `keys` in one round trip. The result is aligned with `keys`.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<Vec<Slot<T>>, CacheError> {
        debug!("RecordCache::get_many({} keys)", keys.len());

        if keys.is_empty() {
            return Ok(vec![]);
        }

        let raws = self
            .store
            .mget(keys)
            .await
            .map_err(|e| CacheError::from(e).context(format!("mget {} keys", keys.len())))?;

        let slots: Vec<Slot<T>> = keys
            .iter()
            .zip(raws.into_iter().chain(std::iter::repeat(None)))
            .map(|(key, raw)| {
                let value = raw.and_then(|raw| match serde_json::from_str::<T>(&raw) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!("RecordCache: undecodable value at {}: {}; treated as missing", key, e);
                        None
                    }
                });
                Slot {
                    key: key.clone(),
                    value,
                }
            })
            .collect();

        Ok(slots)
    }

    /// Fetch the records `ids` of `entity` from their detail keys, loading the missing ones
    /// with a single `loader` call and caching them.
    ///
    /// The result follows the order of `ids`; ids neither cached nor returned by the loader
    /// are left out.
    pub async fn get_many_or_load<T, F, Fut>(
        &self,
        entity: Entity,
        ids: &[String],
        ttl: Duration,
        loader: F,
    ) -> Result<Vec<T>, LoadError>
    where
        T: Record,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, StoreError>>,
    {
        let detail_keys: Vec<String> = ids.iter().map(|id| entity.detail_key(id)).collect();

        let slots = match self.get_many::<T>(&detail_keys).await {
            Ok(slots) => slots,
            Err(e) => {
                self.tolerate(e)?;
                detail_keys
                    .into_iter()
                    .map(|key| Slot { key, value: None })
                    .collect()
            }
        };

        let missing: Vec<String> = slots
            .iter()
            .filter(|s| s.is_missing())
            .filter_map(|s| s.id(entity))
            .map(|id| id.to_string())
            .collect();

        let mut loaded = HashMap::new();
        if !missing.is_empty() {
            debug!("RecordCache: {} of {} {} records missing", missing.len(), ids.len(), entity);

            for record in loader(missing).await? {
                let Some(id) = record.record_id().map(|id| id.to_string()) else {
                    warn!("RecordCache: loaded {} record has no id; not cached", entity);
                    continue;
                };
                self.populate(&entity.detail_key(&id), &record, ttl).await?;
                loaded.insert(id, record);
            }
        }

        let records = slots
            .into_iter()
            .zip(ids)
            .filter_map(|(slot, id)| slot.value.or_else(|| loaded.remove(id.as_str())))
            .collect();

        Ok(records)
    }

    async fn load_and_set<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, LoadError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let value = loader().await?;
        self.populate(key, &value, ttl).await?;
        Ok(value)
    }

    /// Store a freshly loaded value, tolerating cache failures if configured to degrade.
    pub(crate) async fn populate<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self.set(key, value, ttl).await {
            Ok(()) => Ok(()),
            Err(e) => self.tolerate(e),
        }
    }

    /// Swallow a cache failure with a warning if degradation is enabled, otherwise return it.
    pub(crate) fn tolerate(&self, e: CacheError) -> Result<(), CacheError> {
        if self.config.degrade_on_error {
            warn!("cache degraded, serving from primary store: {}", e);
            Ok(())
        } else {
            Err(e)
        }
    }
}
