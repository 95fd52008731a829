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

use std::future::Future;
use std::time::Duration;

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CacheError;
use crate::errors::LoadError;
use crate::errors::StoreError;
use crate::keys;
use crate::Entity;
use crate::Record;
use crate::RecordCache;
use crate::TypeConfig;

/// Pagination metadata of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PageMeta {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// One page of a listing, as returned by the primary store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Value>,
    pub meta: PageMeta,
}

/// What is cached at a listing key: the member ids in result order, and the page metadata.
/// The members themselves live under their detail keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIndex {
    #[serde(rename = "ids")]
    pub member_ids: Vec<String>,
    pub meta: PageMeta,
}

/// Caches listing queries as an id-list plus metadata, materialized from detail keys.
///
/// A hit costs two round trips: one `get` for the index and one `mget` for the members.
/// Members that expired or were evicted since are left out of the page rather than
/// reloaded, so a page can be short until the index itself expires or is invalidated.
pub struct CollectionCache<C: TypeConfig> {
    records: RecordCache<C>,
}

impl<C: TypeConfig> Clone for CollectionCache<C> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

impl<C> CollectionCache<C>
where
    C: TypeConfig,
{
    pub fn new(records: RecordCache<C>) -> Self {
        Self { records }
    }

    /// Read the listing of `entity` for `serialized_query`, running `loader` on a miss.
    pub async fn read<F, Fut>(
        &self,
        entity: Entity,
        serialized_query: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Page, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Page, StoreError>>,
    {
        let key = keys::collection_key(entity.plural(), serialized_query);

        match self.read_cached(entity, &key).await {
            Ok(Some(page)) => return Ok(page),
            Ok(None) => {
                debug!("CollectionCache: miss {}", key);
            }
            Err(e) => self.records.tolerate(e)?,
        }

        self.load_and_populate(entity, &key, ttl, loader).await
    }

    /// Like [`read`](Self::read), serializing `query` as JSON to build the key and using the
    /// configured listing TTL.
    pub async fn read_query<Q, F, Fut>(&self, entity: Entity, query: &Q, loader: F) -> Result<Page, LoadError>
    where
        Q: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Page, StoreError>>,
    {
        let serialized =
            serde_json::to_string(query).map_err(|e| CacheError::codec(entity.plural(), e))?;
        let ttl = self.records.config().listing_ttl;
        self.read(entity, &serialized, ttl, loader).await
    }

    /// Run `loader` and re-populate the listing regardless of what is cached.
    pub async fn refresh<F, Fut>(
        &self,
        entity: Entity,
        serialized_query: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Page, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Page, StoreError>>,
    {
        let key = keys::collection_key(entity.plural(), serialized_query);
        self.load_and_populate(entity, &key, ttl, loader).await
    }

    async fn read_cached(&self, entity: Entity, key: &str) -> Result<Option<Page>, CacheError> {
        let Some(index) = self.records.get::<CollectionIndex>(key).await? else {
            return Ok(None);
        };

        let detail_keys: Vec<String> = index
            .member_ids
            .iter()
            .map(|id| entity.detail_key(id))
            .collect();

        let slots = self.records.get_many::<Value>(&detail_keys).await?;
        let expected = slots.len();
        let data: Vec<Value> = slots.into_iter().filter_map(|s| s.value).collect();

        if data.len() < expected {
            debug!(
                "CollectionCache: hit {} with {} of {} members missing",
                key,
                expected - data.len(),
                expected
            );
        } else {
            debug!("CollectionCache: hit {}", key);
        }

        Ok(Some(Page {
            data,
            meta: index.meta,
        }))
    }

    async fn load_and_populate<F, Fut>(
        &self,
        entity: Entity,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Page, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Page, StoreError>>,
    {
        let page = loader().await?;

        let ids: Option<Vec<String>> = page
            .data
            .iter()
            .map(|item| item.record_id().map(|id| id.to_string()))
            .collect();

        let Some(member_ids) = ids else {
            warn!(
                "CollectionCache: {} result has items without a string id; not cached",
                key
            );
            return Ok(page);
        };

        // Members first: an index must never be visible before the records it points to.
        for (id, item) in member_ids.iter().zip(&page.data) {
            self.records.populate(&entity.detail_key(id), item, ttl).await?;
        }

        let index = CollectionIndex {
            member_ids,
            meta: page.meta.clone(),
        };
        self.records.populate(key, &index, ttl).await?;

        Ok(page)
    }
}
