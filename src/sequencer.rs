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
use std::future::Future;
use std::ops::Bound;
use std::sync::Arc;

use log::debug;
use log::error;
use log::info;
use log::warn;
use serde_json::Value;

use crate::errors::SequenceError;
use crate::errors::StoreError;
use crate::store::ID_FIELD;
use crate::Document;
use crate::Filter;
use crate::PrimaryStore;
use crate::SequencerConfig;
use crate::Txn;
use crate::TxnReply;
use crate::TypeConfig;

pub const INDEX_FIELD: &str = "index";
pub const IS_DELETED_FIELD: &str = "isDeleted";

/// Where an ordering lives: the collection, and the field holding the parent id that
/// groups siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedScope {
    pub collection: &'static str,
    pub parent_field: &'static str,
}

impl OrderedScope {
    pub const COURSE_CONTENTS: OrderedScope = OrderedScope::new("course_contents", "courseId");
    pub const QUIZZES: OrderedScope = OrderedScope::new("quizzes", "courseContentId");
    pub const QUIZ_OPTIONS: OrderedScope = OrderedScope::new("quiz_options", "quizId");

    pub const fn new(collection: &'static str, parent_field: &'static str) -> Self {
        Self {
            collection,
            parent_field,
        }
    }

    /// The active siblings under `parent_id`.
    fn active(&self, parent_id: &str) -> Filter {
        Filter::new()
            .eq(self.parent_field, parent_id)
            .eq(IS_DELETED_FIELD, false)
    }

    /// The item `id`, as long as it is still active at `index`.
    fn active_at(&self, id: &str, index: u32) -> Filter {
        Filter::new()
            .eq(ID_FIELD, id)
            .eq(IS_DELETED_FIELD, false)
            .eq(INDEX_FIELD, index)
    }

    fn deleted(&self, id: &str) -> Filter {
        Filter::new().eq(ID_FIELD, id).eq(IS_DELETED_FIELD, true)
    }
}

impl fmt::Display for OrderedScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.parent_field)
    }
}

/// The ordering view of a stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedItem {
    pub id: String,
    pub parent_id: String,

    /// `Some(1..=N)` while active, `None` once soft-deleted.
    pub index: Option<u32>,

    pub is_deleted: bool,

    /// The full stored document.
    pub document: Document,
}

impl OrderedItem {
    pub fn from_document(scope: &OrderedScope, document: Document) -> Result<Self, StoreError> {
        let field = |name: &str| {
            document
                .get(name)
                .ok_or_else(|| StoreError::malformed(scope.collection, format!("missing field '{}'", name)))
        };

        let id = field(ID_FIELD)?
            .as_str()
            .ok_or_else(|| StoreError::malformed(scope.collection, "'id' is not a string"))?
            .to_string();

        let parent_id = field(scope.parent_field)?
            .as_str()
            .ok_or_else(|| {
                StoreError::malformed(scope.collection, format!("'{}' of {} is not a string", scope.parent_field, id))
            })?
            .to_string();

        let is_deleted = field(IS_DELETED_FIELD)?
            .as_bool()
            .ok_or_else(|| StoreError::malformed(scope.collection, format!("'isDeleted' of {} is not a bool", id)))?;

        let index = match field(INDEX_FIELD)? {
            Value::Null => None,
            v => {
                let i = v
                    .as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| StoreError::malformed(scope.collection, format!("'index' of {} is {}", id, v)))?;
                Some(i)
            }
        };

        if is_deleted != index.is_none() {
            return Err(StoreError::malformed(
                scope.collection,
                format!("{} has isDeleted={} but index={:?}", id, is_deleted, index),
            ));
        }

        Ok(Self {
            id,
            parent_id,
            index,
            is_deleted,
            document,
        })
    }

    fn active_index(&self, scope: &OrderedScope) -> Result<u32, StoreError> {
        self.index
            .ok_or_else(|| StoreError::malformed(scope.collection, format!("active item {} has no index", self.id)))
    }
}

/// Result of one optimistic attempt.
enum Attempt<T> {
    Done(T),
    /// A precondition no longer held when the transaction reached the store.
    Conflict,
}

/// Keeps the active siblings of every parent numbered exactly `1..=N`.
///
/// Every operation reads the current state, computes the shifts and submits them as a
/// single [`Txn`] whose preconditions pin the state it read: the number of active siblings
/// and the item's own position. A concurrent reorder of the same parent makes the store
/// reject the transaction as a whole; the operation then re-reads and retries with
/// backoff, up to [`SequencerConfig::max_txn_retries`] times.
///
/// Different parents never contend.
pub struct Sequencer<C: TypeConfig> {
    store: Arc<C::PrimaryStore>,
    scope: OrderedScope,
    config: SequencerConfig,
}

impl<C: TypeConfig> Clone for Sequencer<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scope: self.scope,
            config: self.config.clone(),
        }
    }
}

impl<C> fmt::Display for Sequencer<C>
where
    C: TypeConfig,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sequencer({})", self.scope)
    }
}

impl<C> Sequencer<C>
where
    C: TypeConfig,
{
    pub fn new(store: Arc<C::PrimaryStore>, scope: OrderedScope, config: SequencerConfig) -> Self {
        Self { store, scope, config }
    }

    pub fn scope(&self) -> &OrderedScope {
        &self.scope
    }

    /// Append a new item under `parent_id` at index `N + 1`.
    ///
    /// The parent, index and `isDeleted` fields of `doc` are overwritten.
    pub async fn insert_at_end(&self, parent_id: &str, doc: Document) -> Result<OrderedItem, SequenceError> {
        let mut items = self.insert_many_at_end(parent_id, vec![doc]).await?;
        items
            .pop()
            .ok_or_else(|| StoreError::malformed(self.scope.collection, "transaction created nothing").into())
    }

    /// Append several items under `parent_id`, numbered `N + 1, N + 2, ...` in the given
    /// order, in one transaction.
    pub async fn insert_many_at_end(
        &self,
        parent_id: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<OrderedItem>, SequenceError> {
        if docs.is_empty() {
            return Ok(vec![]);
        }

        let docs = docs.as_slice();
        let items = self
            .retrying("insert", parent_id, move || self.try_insert(parent_id, docs))
            .await?;

        info!("{}: appended {} items under {}", self, items.len(), parent_id);
        Ok(items)
    }

    /// Move the active item `item_id` to `new_index`, shifting the siblings in between.
    ///
    /// Fails with `IndexOutOfRange` unless `1 <= new_index <= N`, and with `NotFound` if the
    /// item does not exist or is deleted. Moving to the current index is a no-op.
    pub async fn move_to(&self, item_id: &str, new_index: u32) -> Result<OrderedItem, SequenceError> {
        self.retrying("move", item_id, || self.try_move(item_id, new_index))
            .await
    }

    /// Mark the item deleted, drop its index and close the gap it leaves.
    ///
    /// Deleting a deleted item returns it unchanged.
    pub async fn soft_delete(&self, item_id: &str) -> Result<OrderedItem, SequenceError> {
        self.retrying("delete", item_id, || self.try_soft_delete(item_id))
            .await
    }

    /// Bring a deleted item back, appended at `N + 1`; not at its former position.
    ///
    /// Restoring an active item returns it unchanged.
    pub async fn restore(&self, item_id: &str) -> Result<OrderedItem, SequenceError> {
        self.retrying("restore", item_id, || self.try_restore(item_id))
            .await
    }

    /// Soft-delete an active item, restore a deleted one.
    pub async fn toggle_delete(&self, item_id: &str) -> Result<OrderedItem, SequenceError> {
        let item = self.load(item_id).await?;
        if item.is_deleted {
            self.restore(item_id).await
        } else {
            self.soft_delete(item_id).await
        }
    }

    /// The active items under `parent_id`, by index.
    pub async fn list_active(&self, parent_id: &str) -> Result<Vec<OrderedItem>, SequenceError> {
        let docs = self
            .store
            .find_many(self.scope.collection, &self.scope.active(parent_id))
            .await?;

        let mut items = docs
            .into_iter()
            .map(|d| OrderedItem::from_document(&self.scope, d))
            .collect::<Result<Vec<_>, _>>()?;

        items.sort_by_key(|item| item.index);
        Ok(items)
    }

    /// Check that the active items under `parent_id` are numbered exactly `1..=N`.
    /// Returns `N`.
    pub async fn verify_dense(&self, parent_id: &str) -> Result<u32, SequenceError> {
        let items = self.list_active(parent_id).await?;

        for (expected, item) in (1u32..).zip(&items) {
            if item.index != Some(expected) {
                return Err(SequenceError::NotDense {
                    collection: self.scope.collection.to_string(),
                    parent_id: parent_id.to_string(),
                    detail: format!("expected index {} at {}, found {:?}", expected, item.id, item.index),
                });
            }
        }

        Ok(items.len() as u32)
    }

    async fn try_insert(&self, parent_id: &str, docs: &[Document]) -> Result<Attempt<Vec<OrderedItem>>, SequenceError> {
        let scope = &self.scope;
        let n = self.active_count(parent_id).await?;

        let mut txn = Txn::new().when_count(scope.collection, scope.active(parent_id), n as u64);

        for (index, doc) in (n + 1..).zip(docs) {
            let mut doc = doc.clone();
            doc.insert(scope.parent_field.to_string(), parent_id.into());
            doc.insert(INDEX_FIELD.to_string(), index.into());
            doc.insert(IS_DELETED_FIELD.to_string(), false.into());
            txn = txn.create(scope.collection, doc);
        }

        let Some(reply) = self.commit(txn).await? else {
            return Ok(Attempt::Conflict);
        };

        let items = reply
            .created
            .into_iter()
            .map(|d| OrderedItem::from_document(scope, d))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Attempt::Done(items))
    }

    async fn try_move(&self, item_id: &str, new_index: u32) -> Result<Attempt<OrderedItem>, SequenceError> {
        let scope = &self.scope;

        let item = self.load(item_id).await?;
        if item.is_deleted {
            return Err(StoreError::not_found(scope.collection, item_id).into());
        }

        let current = item.active_index(scope)?;
        let n = self.active_count(&item.parent_id).await?;

        if new_index < 1 || new_index > n {
            return Err(SequenceError::IndexOutOfRange {
                index: new_index,
                total: n,
            });
        }

        if new_index == current {
            debug!("{}: {} already at {}", self, item_id, current);
            return Ok(Attempt::Done(item));
        }

        let (cur, new) = (i64::from(current), i64::from(new_index));

        let (between, delta) = if current < new_index {
            // Forward: the siblings in (current, new] move up by one.
            (scope.active(&item.parent_id).range(INDEX_FIELD, Bound::Excluded(cur), Bound::Included(new)), -1)
        } else {
            // Backward: the siblings in [new, current) move down by one.
            (scope.active(&item.parent_id).range(INDEX_FIELD, Bound::Included(new), Bound::Excluded(cur)), 1)
        };

        let txn = Txn::new()
            .when_count(scope.collection, scope.active(&item.parent_id), n as u64)
            .when_count(scope.collection, scope.active_at(item_id, current), 1)
            .increment(scope.collection, between, INDEX_FIELD, delta)
            .update(scope.collection, item_id, patch(&[(INDEX_FIELD, new_index.into())]));

        if self.commit(txn).await?.is_none() {
            return Ok(Attempt::Conflict);
        }

        info!("{}: moved {} from {} to {}", self, item_id, current, new_index);
        Ok(Attempt::Done(self.load(item_id).await?))
    }

    async fn try_soft_delete(&self, item_id: &str) -> Result<Attempt<OrderedItem>, SequenceError> {
        let scope = &self.scope;

        let item = self.load(item_id).await?;
        if item.is_deleted {
            debug!("{}: {} already deleted", self, item_id);
            return Ok(Attempt::Done(item));
        }

        let current = item.active_index(scope)?;
        let n = self.active_count(&item.parent_id).await?;

        let after = scope
            .active(&item.parent_id)
            .range(INDEX_FIELD, Bound::Excluded(i64::from(current)), Bound::Unbounded);

        let txn = Txn::new()
            .when_count(scope.collection, scope.active(&item.parent_id), n as u64)
            .when_count(scope.collection, scope.active_at(item_id, current), 1)
            .update(
                scope.collection,
                item_id,
                patch(&[(IS_DELETED_FIELD, true.into()), (INDEX_FIELD, Value::Null)]),
            )
            .increment(scope.collection, after, INDEX_FIELD, -1);

        if self.commit(txn).await?.is_none() {
            return Ok(Attempt::Conflict);
        }

        info!("{}: deleted {} at {}", self, item_id, current);
        Ok(Attempt::Done(self.load(item_id).await?))
    }

    async fn try_restore(&self, item_id: &str) -> Result<Attempt<OrderedItem>, SequenceError> {
        let scope = &self.scope;

        let item = self.load(item_id).await?;
        if !item.is_deleted {
            debug!("{}: {} already active", self, item_id);
            return Ok(Attempt::Done(item));
        }

        let n = self.active_count(&item.parent_id).await?;

        let txn = Txn::new()
            .when_count(scope.collection, scope.active(&item.parent_id), n as u64)
            .when_count(scope.collection, scope.deleted(item_id), 1)
            .update(
                scope.collection,
                item_id,
                patch(&[(IS_DELETED_FIELD, false.into()), (INDEX_FIELD, (n + 1).into())]),
            );

        if self.commit(txn).await?.is_none() {
            return Ok(Attempt::Conflict);
        }

        info!("{}: restored {} at {}", self, item_id, n + 1);
        Ok(Attempt::Done(self.load(item_id).await?))
    }

    /// Run `attempt` until it is not a conflict, sleeping with growing backoff in between.
    async fn retrying<T, F, Fut>(&self, op: &str, item_id: &str, mut attempt: F) -> Result<T, SequenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, SequenceError>>,
    {
        let mut backoff = self.config.retry_backoff;
        let attempts = self.config.max_txn_retries + 1;

        for i in 1..=attempts {
            match attempt().await? {
                Attempt::Done(t) => return Ok(t),
                Attempt::Conflict => {
                    warn!(
                        "{}: {} {} conflicted with a concurrent change (attempt {}/{})",
                        self, op, item_id, i, attempts
                    );
                }
            }

            if i < attempts {
                tokio::time::sleep(backoff).await;
                backoff = self.config.next_backoff(backoff);
            }
        }

        Err(SequenceError::Conflict {
            collection: self.scope.collection.to_string(),
            item_id: item_id.to_string(),
            attempts,
        })
    }

    /// Submit `txn`; `None` if its preconditions failed.
    async fn commit(&self, txn: Txn) -> Result<Option<TxnReply>, SequenceError> {
        let reply = self.store.transaction(txn).await.map_err(|e| {
            error!("{}: transaction failed, nothing applied: {}", self, e);
            e
        })?;

        if reply.committed {
            Ok(Some(reply))
        } else {
            Ok(None)
        }
    }

    async fn load(&self, item_id: &str) -> Result<OrderedItem, SequenceError> {
        let doc = self
            .store
            .find_by_id(self.scope.collection, item_id)
            .await?
            .ok_or_else(|| StoreError::not_found(self.scope.collection, item_id))?;

        Ok(OrderedItem::from_document(&self.scope, doc)?)
    }

    async fn active_count(&self, parent_id: &str) -> Result<u32, SequenceError> {
        let n = self
            .store
            .count(self.scope.collection, &self.scope.active(parent_id))
            .await?;

        u32::try_from(n).map_err(|_| {
            StoreError::malformed(self.scope.collection, format!("{} active items under {}", n, parent_id)).into()
        })
    }
}

fn patch(fields: &[(&str, Value)]) -> Document {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
