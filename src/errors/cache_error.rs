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

use crate::errors::ConnectionClosed;

/// Errors raised by the cache layer itself.
///
/// None of these mean "not found": a missing key is `Ok(None)`.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(#[from] ConnectionClosed),

    #[error("Cache value codec error for key '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn codec(key: impl ToString, source: serde_json::Error) -> Self {
        CacheError::Codec {
            key: key.to_string(),
            source,
        }
    }

    pub fn context(self, context: impl ToString) -> Self {
        match self {
            Self::Unavailable(e) => Self::Unavailable(e.context(context)),
            Self::Codec { .. } => self,
        }
    }
}
