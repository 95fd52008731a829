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

use crate::errors::StoreError;

/// Errors of a [`Sequencer`](crate::Sequencer) operation.
///
/// Whatever the variant, no index change has been persisted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// The requested position is outside `1..=total`. A bad request.
    #[error("Index must be between 1 and {total}, got {index}")]
    IndexOutOfRange { index: u32, total: u32 },

    /// Concurrent reorders kept invalidating the preconditions.
    #[error("Reorder of '{item_id}' in {collection} conflicted {attempts} times; giving up")]
    Conflict {
        collection: String,
        item_id: String,
        attempts: u32,
    },

    #[error("Ordering of {collection} under '{parent_id}' is not dense: {detail}")]
    NotDense {
        collection: String,
        parent_id: String,
        detail: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SequenceError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, SequenceError::IndexOutOfRange { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SequenceError::Store(e) if e.is_not_found())
    }
}
