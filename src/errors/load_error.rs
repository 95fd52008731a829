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

use crate::errors::CacheError;
use crate::errors::StoreError;

/// Errors of a read-through call: either the loader failed, or the cache failed and
/// degradation is disabled.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Load from primary store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Load through cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::Store(e) if e.is_not_found())
    }
}
