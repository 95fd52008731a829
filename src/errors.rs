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

//! Error types, one per concern.

mod cache_error;
mod connection_closed;
mod load_error;
mod sequence_error;
mod store_error;

pub use cache_error::CacheError;
pub use connection_closed::ConnectionClosed;
pub use load_error::LoadError;
pub use sequence_error::SequenceError;
pub use store_error::StoreError;
