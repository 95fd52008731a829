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

#![allow(clippy::uninlined_format_args)]

//! A cache-aside layer over an authoritative document store, plus an engine that keeps
//! user-visible orderings dense.
//!
//! Features:
//! - Read-through caching of single records ([`RecordCache`])
//! - Read-through caching of paginated listings as id-lists ([`CollectionCache`])
//! - Pattern-based eviction and merge-update after writes ([`InvalidationEngine`])
//! - Graceful degradation when the cache store is down
//! - Dense `1..N` ordering of sibling items, each change applied as one transaction ([`Sequencer`])
//!
//! # Cache Key Structure
//!
//! ```text
//! {entity}-{id}-details                 user-abc123-details
//! {entityPlural}-{serializedQueryJSON}  groups-{"page":1}
//! {entityA}-{entityB}-{idA}-{idB}       user-group-u1-g2
//! ```
//!
//! The detail key is load-bearing: a listing stores only member ids and rebuilds its page
//! from the detail keys, and missing-slot recovery derives the id back from the key.
//!
//! # Read Path
//!
//! 1. Look the key up in the cache store.
//! 2. On hit, decode and return.
//! 3. On miss, run the loader against the primary store, populate the cache, return.
//!
//! # Write Path
//!
//! 1. Commit the mutation to the primary store, through the [`Sequencer`] if it affects
//!    an ordering.
//! 2. Only then evict or patch every cache key family that may hold a stale copy
//!    ([`Cache::after_write`]).
//!
//! ```text
//!          read                                          write
//!           |                                              |
//!           v                                              v
//! +-------------------+   miss: loader()   +-----------+  txn   +--------------+
//! | RecordCache       | -----------------> | Sequencer | -----> | PrimaryStore |
//! | CollectionCache   |                    +-----------+        +--------------+
//! +---------+---------+                                                |
//!           | get/mget/set                                   committed |
//!           v                                                          v
//! +-------------------+        scan + del / merge        +--------------------+
//! |    CacheStore     | <------------------------------- | InvalidationEngine |
//! +-------------------+                                  +--------------------+
//! ```

mod cache;
mod cache_store;
mod collection_cache;
mod config;
mod invalidation;
mod record_cache;
mod sequencer;
mod store;
mod type_config;

pub mod keys;

pub use cache::Cache;
pub use cache::WriteEffect;
pub use cache::WriteReport;
pub use cache_store::CacheStore;
pub use cache_store::ScanPage;
pub use cache_store::SCAN_CURSOR_START;
pub use collection_cache::CollectionCache;
pub use collection_cache::CollectionIndex;
pub use collection_cache::Page;
pub use collection_cache::PageMeta;
pub use config::CacheConfig;
pub use config::SequencerConfig;
pub use invalidation::InvalidationEngine;
pub use invalidation::MergeReport;
pub use keys::Entity;
pub use record_cache::Record;
pub use record_cache::RecordCache;
pub use record_cache::Slot;
pub use sequencer::OrderedItem;
pub use sequencer::OrderedScope;
pub use sequencer::Sequencer;
pub use store::Clause;
pub use store::Document;
pub use store::Filter;
pub use store::PrimaryStore;
pub use store::Txn;
pub use store::TxnCondition;
pub use store::TxnOp;
pub use store::TxnReply;
pub use type_config::TypeConfig;

pub mod errors;

pub mod testing {
    pub mod memory_cache;
    pub mod memory_store;
    pub mod types;
    pub mod util;
}
