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

use crate::CacheStore;
use crate::PrimaryStore;

/// Binds the concrete collaborators so every component is generic over a single parameter.
pub trait TypeConfig
where
    Self: fmt::Debug,
    Self: Default,
    Self: Send + Sync + 'static,
{
    /// The key-value store holding cached JSON documents, e.g. a Redis client.
    type CacheStore: CacheStore;

    /// The authoritative document store.
    type PrimaryStore: PrimaryStore;
}
