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

use std::fmt;
use std::sync::atomic;
use std::sync::Arc;

use log::info;
use log::warn;
use serde_json::Map;
use serde_json::Value;

use crate::errors::CacheError;
use crate::errors::ConnectionClosed;
use crate::CacheConfig;
use crate::CacheStore;
use crate::CollectionCache;
use crate::Entity;
use crate::InvalidationEngine;
use crate::RecordCache;
use crate::TypeConfig;

/// What a committed primary-store write did to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEffect {
    /// A new record: every listing of its entity may now be incomplete.
    Created,

    /// Some fields changed: patch the cached copies that hold the record's own fields, and
    /// drop the relations that embed it under another record's fields.
    Patched(Map<String, Value>),

    /// The record is gone or soft-deleted: drop every cached copy and every listing.
    Deleted,
}

/// Totals of the invalidation work done for one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub removed: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// The cache-aside front end over an injected cache store.
///
/// It owns the connection lifecycle and hands out the components that share it:
/// [`RecordCache`], [`CollectionCache`] and [`InvalidationEngine`].
///
/// ## Write discipline
///
/// Call [`after_write`](Self::after_write) only after the primary-store write has
/// committed. Evicting first would let a concurrent reader re-populate the cache from the
/// state that is about to be replaced.
///
/// ## Error Handling
///
/// With [`CacheConfig::degrade_on_error`] set, cache-store failures are logged and
/// absorbed: reads fall through to the loader, invalidations report nothing done and the
/// stale keys expire with their TTL.
pub struct Cache<C: TypeConfig> {
    store: Arc<C::CacheStore>,

    config: CacheConfig,

    /// A process-wide unique identifier for the cache. Used for debugging purposes.
    uniq: u64,

    /// The name for this cache instance, for debugging.
    name: String,
}

impl<C> fmt::Display for Cache<C>
where
    C: TypeConfig,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Cache({})[uniq={}]", self.name, self.uniq)
    }
}

impl<C> Cache<C>
where
    C: TypeConfig,
{
    /// Connect `store` and build a cache over it.
    ///
    /// A failed connection is returned as is, even when degradation is enabled: a cache
    /// that never connected is a configuration problem, not an outage.
    pub async fn new(
        store: C::CacheStore,
        config: CacheConfig,
        name: impl ToString,
    ) -> Result<Self, ConnectionClosed> {
        static UNIQ: atomic::AtomicU64 = atomic::AtomicU64::new(0);
        let uniq = UNIQ.fetch_add(1, atomic::Ordering::SeqCst);

        let cache = Self {
            store: Arc::new(store),
            config,
            uniq,
            name: name.to_string(),
        };

        cache
            .store
            .connect()
            .await
            .map_err(|e| e.context(format!("connecting {}", cache)))?;

        info!("{}: connected", cache);
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<C::CacheStore> {
        &self.store
    }

    pub fn records(&self) -> RecordCache<C> {
        RecordCache::new(self.store.clone(), self.config.clone())
    }

    pub fn collections(&self) -> CollectionCache<C> {
        CollectionCache::new(self.records())
    }

    pub fn invalidation(&self) -> InvalidationEngine<C> {
        InvalidationEngine::new(self.store.clone(), self.config.clone())
    }

    /// Bring the cache in line with a committed write of record `id` of `entity`.
    pub async fn after_write(
        &self,
        entity: Entity,
        id: &str,
        effect: WriteEffect,
    ) -> Result<WriteReport, CacheError> {
        let res = self.apply_write(entity, id, &effect).await;
        self.absorb(res, format!("{:?} {} {}", effect, entity, id))
    }

    /// Drop every cached key of `entity` after a write touching an unknown set of records,
    /// such as a bulk status change. Relations embedding the entity go too.
    pub async fn after_bulk_write(&self, entity: Entity) -> Result<WriteReport, CacheError> {
        let res = self.remove_all(&entity.family_patterns()).await;
        self.absorb(res, format!("bulk write of {}", entity))
    }

    /// Disconnect the store. Components handed out earlier fail or degrade from now on.
    pub async fn shutdown(self) -> Result<(), ConnectionClosed> {
        self.store
            .disconnect()
            .await
            .map_err(|e| e.context(format!("disconnecting {}", self)))?;
        info!("{}: disconnected", self);
        Ok(())
    }

    async fn apply_write(
        &self,
        entity: Entity,
        id: &str,
        effect: &WriteEffect,
    ) -> Result<WriteReport, CacheError> {
        let engine = self.invalidation();
        let mut report = WriteReport::default();

        match effect {
            WriteEffect::Created => {
                report.removed += engine.remove_by_pattern(&entity.listing_pattern()).await?;
            }
            WriteEffect::Patched(fields) => {
                for pattern in entity.mergeable_patterns(id) {
                    let merged = engine
                        .update_by_pattern(&pattern, fields, self.config.detail_ttl)
                        .await?;
                    report.updated += merged.updated;
                    report.skipped += merged.skipped;
                }
                // Relations where the record is on the right hold the other side's fields.
                report.removed += self.remove_all(&entity.member_patterns(id)).await?.removed;
            }
            WriteEffect::Deleted => {
                let mut patterns = entity.dependent_patterns(id);
                patterns.push(entity.listing_pattern());
                report.removed += self.remove_all(&patterns).await?.removed;
            }
        }

        Ok(report)
    }

    async fn remove_all(&self, patterns: &[String]) -> Result<WriteReport, CacheError> {
        let engine = self.invalidation();
        let mut report = WriteReport::default();
        for pattern in patterns {
            report.removed += engine.remove_by_pattern(pattern).await?;
        }
        Ok(report)
    }

    fn absorb(
        &self,
        res: Result<WriteReport, CacheError>,
        what: String,
    ) -> Result<WriteReport, CacheError> {
        match res {
            Ok(report) => Ok(report),
            Err(e) if self.config.degrade_on_error => {
                warn!(
                    "{}: invalidation after {} failed, stale keys expire by TTL: {}",
                    self, what, e
                );
                Ok(WriteReport::default())
            }
            Err(e) => Err(e.context(what)),
        }
    }
}
