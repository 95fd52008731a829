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

use std::time::Duration;

use crate::errors::ConnectionClosed;

/// The cursor value that starts a scan, and that the store returns when the scan is complete.
pub const SCAN_CURSOR_START: &str = "0";

/// One round of a cursor-driven scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// The cursor to resume from; [`SCAN_CURSOR_START`] when the scan is complete.
    pub cursor: String,

    /// The matched keys of this round. May be empty even if the scan is not complete.
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == SCAN_CURSOR_START
    }
}

/// A shared key-value store with per-key expiration, such as Redis.
///
/// Values are opaque strings; the cache components always store UTF-8 JSON.
/// The store is shared by many callers and is last-write-wins per key.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Establish the connection. Calls made before this, or after [`disconnect`](Self::disconnect),
    /// fail with [`ConnectionClosed`].
    async fn connect(&self) -> Result<(), ConnectionClosed>;

    async fn disconnect(&self) -> Result<(), ConnectionClosed>;

    async fn get(&self, key: &str) -> Result<Option<String>, ConnectionClosed>;

    /// Store `value` at `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), ConnectionClosed>;

    /// Get several keys at once; the result is aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, ConnectionClosed>;

    /// Iterate the keyspace: return the keys matching the glob `pattern` found in the next
    /// `count`-ish slots after `cursor`.
    async fn scan(
        &self,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, ConnectionClosed>;

    /// Delete keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, ConnectionClosed>;
}
