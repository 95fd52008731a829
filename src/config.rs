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

use std::cmp;
use std::time::Duration;

/// Settings shared by the cache components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL of per-entity detail keys and of merged values.
    pub detail_ttl: Duration,

    /// TTL of paginated listings and the detail keys they populate.
    pub listing_ttl: Duration,

    /// `COUNT` hint passed to every `SCAN` round.
    pub scan_batch_size: usize,

    /// When the cache store fails, serve from the primary store instead of failing the call.
    pub degrade_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detail_ttl: Duration::from_secs(24 * 60 * 60),
            listing_ttl: Duration::from_secs(60 * 60),
            scan_batch_size: 100,
            degrade_on_error: true,
        }
    }
}

impl CacheConfig {
    pub fn with_detail_ttl(mut self, ttl: Duration) -> Self {
        self.detail_ttl = ttl;
        self
    }

    pub fn with_listing_ttl(mut self, ttl: Duration) -> Self {
        self.listing_ttl = ttl;
        self
    }

    /// Set the `SCAN` batch size; `0` is raised to `1`.
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = cmp::max(size, 1);
        self
    }

    pub fn with_degrade_on_error(mut self, degrade: bool) -> Self {
        self.degrade_on_error = degrade;
        self
    }
}

/// Retry policy of [`Sequencer`](crate::Sequencer) transactions whose preconditions were
/// invalidated by a concurrent reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerConfig {
    /// Attempts after the first one.
    pub max_txn_retries: u32,

    pub retry_backoff: Duration,

    pub max_backoff: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_txn_retries: 3,
            retry_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl SequencerConfig {
    pub fn with_max_txn_retries(mut self, retries: u32) -> Self {
        self.max_txn_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration, max: Duration) -> Self {
        self.retry_backoff = backoff;
        self.max_backoff = cmp::max(backoff, max);
        self
    }

    /// The sleep before the next attempt: grows by 3/2 each time, capped by `max_backoff`.
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        cmp::min(current * 3 / 2, self.max_backoff)
    }
}
