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
use std::io;

/// The connection to the cache store is closed or was never established.
///
/// Every [`CacheStore`](crate::CacheStore) call reports its transport failures with this
/// type: refused connections, a store that has been disconnected, timeouts.
///
/// The error carries the reason and a chain of contexts describing what was being done.
///
/// # Usage
///
/// ```rust
/// # use cache_aside::errors::ConnectionClosed;
/// let err = ConnectionClosed::new("connection reset")
///     .context("mget 3 keys")
///     .context("reading users listing");
/// ```
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClosed {
    reason: String,

    /// Appended with [`ConnectionClosed::context`], innermost first.
    when: Vec<String>,
}

impl ConnectionClosed {
    pub fn new(reason: impl ToString) -> Self {
        ConnectionClosed {
            reason: reason.to_string(),
            when: vec![],
        }
    }

    /// Append a context describing when the error occurred.
    pub fn context(mut self, context: impl ToString) -> Self {
        self.when.push(context.to_string());
        self
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cache-store connection closed: {}", self.reason)?;

        if self.when.is_empty() {
            return Ok(());
        }

        write!(f, "; when: (")?;

        for (i, when) in self.when.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", when)?;
        }

        write!(f, ")")
    }
}

impl From<io::Error> for ConnectionClosed {
    fn from(err: io::Error) -> Self {
        ConnectionClosed::new(err)
    }
}
