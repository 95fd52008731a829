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

/// Errors reported by a [`PrimaryStore`](crate::PrimaryStore).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{collection} not found: {id}")]
    NotFound { collection: String, id: String },

    /// A create reused the id of an existing document.
    #[error("{collection} already has a document with id {id}")]
    Duplicate { collection: String, id: String },

    #[error("Primary store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed document in '{collection}': {reason}")]
    Malformed { collection: String, reason: String },
}

impl StoreError {
    pub fn not_found(collection: impl ToString, id: impl ToString) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn duplicate(collection: impl ToString, id: impl ToString) -> Self {
        StoreError::Duplicate {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn malformed(collection: impl ToString, reason: impl ToString) -> Self {
        StoreError::Malformed {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
