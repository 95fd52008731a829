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

use std::ops::Bound;

use serde_json::Value;

use crate::errors::StoreError;

/// A JSON document as stored in the primary store. The `id` field identifies it.
pub type Document = serde_json::Map<String, Value>;

/// The field holding a document's id.
pub const ID_FIELD: &str = "id";

/// One predicate of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// The field equals the value.
    Eq(String, Value),

    /// The field is an integer within the bounds. `null` or a missing field never matches.
    Range {
        field: String,
        lower: Bound<i64>,
        upper: Bound<i64>,
    },
}

impl Clause {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Eq(field, value) => doc.get(field) == Some(value),
            Clause::Range {
                field,
                lower,
                upper,
            } => {
                let Some(v) = doc.get(field).and_then(Value::as_i64) else {
                    return false;
                };
                let above = match lower {
                    Bound::Included(l) => v >= *l,
                    Bound::Excluded(l) => v > *l,
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(u) => v <= *u,
                    Bound::Excluded(u) => v < *u,
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }
}

/// A conjunction of clauses. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl ToString, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn range(mut self, field: impl ToString, lower: Bound<i64>, upper: Bound<i64>) -> Self {
        self.clauses.push(Clause::Range {
            field: field.to_string(),
            lower,
            upper,
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }
}

/// A precondition checked atomically with the operations of a [`Txn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxnCondition {
    /// Exactly `expected` documents of `collection` match `filter`.
    Count {
        collection: String,
        filter: Filter,
        expected: u64,
    },
}

/// A write inside a [`Txn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOp {
    /// Insert a document; the store assigns an id if it has none. An id already present
    /// in the collection fails the whole transaction with `Duplicate`.
    Create { collection: String, doc: Document },

    /// Shallow-merge `patch` into the document `id`. A missing document fails the whole
    /// transaction with `NotFound`.
    Update {
        collection: String,
        id: String,
        patch: Document,
    },

    /// Add `delta` to the integer `field` of every document matching `filter`.
    Increment {
        collection: String,
        filter: Filter,
        field: String,
        delta: i64,
    },
}

/// An all-or-nothing batch: if every condition holds, every op is applied; otherwise none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Txn {
    pub conditions: Vec<TxnCondition>,
    pub ops: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when_count(mut self, collection: &str, filter: Filter, expected: u64) -> Self {
        self.conditions.push(TxnCondition::Count {
            collection: collection.to_string(),
            filter,
            expected,
        });
        self
    }

    pub fn create(mut self, collection: &str, doc: Document) -> Self {
        self.ops.push(TxnOp::Create {
            collection: collection.to_string(),
            doc,
        });
        self
    }

    pub fn update(mut self, collection: &str, id: &str, patch: Document) -> Self {
        self.ops.push(TxnOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        });
        self
    }

    pub fn increment(mut self, collection: &str, filter: Filter, field: &str, delta: i64) -> Self {
        self.ops.push(TxnOp::Increment {
            collection: collection.to_string(),
            filter,
            field: field.to_string(),
            delta,
        });
        self
    }
}

/// The outcome of a transaction that reached the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnReply {
    /// `false` if a condition did not hold; nothing was written.
    pub committed: bool,

    /// The documents inserted by `Create` ops, in op order, ids assigned.
    pub created: Vec<Document>,
}

/// The authoritative document store.
///
/// Failures to reach the store are [`StoreError::Unavailable`]; a failed transaction has
/// applied nothing.
#[async_trait::async_trait]
pub trait PrimaryStore: Send + Sync + 'static {
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Insert a document and return it with its id.
    async fn create(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    /// Shallow-merge `patch` into document `id` and return the result.
    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<Document, StoreError>;

    async fn transaction(&self, txn: Txn) -> Result<TxnReply, StoreError>;
}
