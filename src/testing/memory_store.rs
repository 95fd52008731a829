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

//! MemoryStore: an in-process document store with atomic conditional transactions and
//! fault injection, standing in for the primary database in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::StoreError;
use crate::store::ID_FIELD;
use crate::Document;
use crate::Filter;
use crate::PrimaryStore;
use crate::Txn;
use crate::TxnCondition;
use crate::TxnOp;
use crate::TxnReply;

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

#[derive(Debug, Default)]
pub struct State {
    pub collections: Collections,

    id_counter: u64,

    /// Fail this many upcoming transactions as if the store were unreachable.
    fail_transactions: u32,

    /// Fail every call as if the store were unreachable.
    down: bool,

    pub committed: u64,
    pub rejected: u64,
}

impl State {
    fn check(&self) -> Result<(), StoreError> {
        if self.down {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn matching<'a>(&'a self, collection: &str, filter: &'a Filter) -> impl Iterator<Item = &'a Document> + 'a {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|c| c.values())
            .filter(move |d| filter.matches(d))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_down(&self, down: bool) {
        self.state.lock().await.down = down;
    }

    /// Make the next `n` transactions fail with `Unavailable` before applying anything.
    pub async fn fail_next_transactions(&self, n: u32) {
        self.state.lock().await.fail_transactions = n;
    }

    /// A copy of a whole collection, by id.
    pub async fn snapshot(&self, collection: &str) -> BTreeMap<String, Document> {
        let state = self.state.lock().await;
        state.collections.get(collection).cloned().unwrap_or_default()
    }
}

/// Apply `ops` in order. On error `collections` is left partially modified; callers apply
/// to a copy.
fn apply(
    id_counter: &mut u64,
    collections: &mut Collections,
    ops: Vec<TxnOp>,
) -> Result<Vec<Document>, StoreError> {
    let mut created = vec![];

    for op in ops {
        match op {
            TxnOp::Create { collection, mut doc } => {
                let id = match doc.get(ID_FIELD).and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        *id_counter += 1;
                        let id = format!("{:08x}", id_counter);
                        doc.insert(ID_FIELD.to_string(), Value::from(id.clone()));
                        id
                    }
                };
                if collections.get(&collection).is_some_and(|c| c.contains_key(&id)) {
                    return Err(StoreError::duplicate(&collection, &id));
                }
                collections.entry(collection).or_default().insert(id, doc.clone());
                created.push(doc);
            }
            TxnOp::Update { collection, id, patch } => {
                let doc = collections
                    .get_mut(&collection)
                    .and_then(|c| c.get_mut(&id))
                    .ok_or_else(|| StoreError::not_found(&collection, &id))?;
                for (k, v) in patch {
                    doc.insert(k, v);
                }
            }
            TxnOp::Increment {
                collection,
                filter,
                field,
                delta,
            } => {
                let Some(docs) = collections.get_mut(&collection) else {
                    continue;
                };
                for doc in docs.values_mut().filter(|d| filter.matches(d)) {
                    let current = doc.get(&field).and_then(Value::as_i64).ok_or_else(|| {
                        StoreError::malformed(&collection, format!("'{}' is not an integer", field))
                    })?;
                    doc.insert(field.clone(), Value::from(current + delta));
                }
            }
        }
    }

    Ok(created)
}

#[async_trait::async_trait]
impl PrimaryStore for MemoryStore {
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.matching(collection, filter).cloned().collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.matching(collection, filter).count() as u64)
    }

    async fn create(&self, collection: &str, doc: Document) -> Result<Document, StoreError> {
        let reply = self.transaction(Txn::new().create(collection, doc)).await?;
        reply
            .created
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::malformed(collection, "create returned nothing"))
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<Document, StoreError> {
        self.transaction(Txn::new().update(collection, id, patch)).await?;
        self.find_by_id(collection, id)
            .await?
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn transaction(&self, txn: Txn) -> Result<TxnReply, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.check()?;

        if state.fail_transactions > 0 {
            state.fail_transactions -= 1;
            return Err(StoreError::Unavailable("simulated transaction failure".to_string()));
        }

        for cond in &txn.conditions {
            let TxnCondition::Count {
                collection,
                filter,
                expected,
            } = cond;
            let actual = state.matching(collection, filter).count() as u64;
            if actual != *expected {
                state.rejected += 1;
                return Ok(TxnReply {
                    committed: false,
                    created: vec![],
                });
            }
        }

        let mut staged = state.collections.clone();
        let mut counter = state.id_counter;

        let created = apply(&mut counter, &mut staged, txn.ops)?;

        state.collections = staged;
        state.id_counter = counter;
        state.committed += 1;

        Ok(TxnReply {
            committed: true,
            created,
        })
    }
}
