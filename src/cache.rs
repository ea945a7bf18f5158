// Copyright 2021 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Authentication cache shared between clients.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use static_assertions::assert_impl_all;

/// A token with the management URL it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAuth {
    /// Authentication token.
    pub token: String,
    /// Compute endpoint.
    pub management_url: String,
}

/// Tokens and management URLs keyed by identity and endpoint selection.
///
/// Clients sharing one cache through `Arc` skip the login when an entry for the same user,
/// project and endpoint filters is present.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedAuth>>,
}

assert_impl_all!(TokenCache: Send, Sync);

/// Build a cache key from its parts, absent parts included.
pub fn cache_key(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .map(|part| part.unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\u{0}")
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> TokenCache {
        TokenCache::default()
    }

    /// Cached entry for the key.
    pub fn get(&self, key: &str) -> Option<CachedAuth> {
        self.lock().get(key).cloned()
    }

    /// Store an entry, replacing any previous one.
    pub fn store<S: Into<String>>(&self, key: S, auth: CachedAuth) {
        debug!("Caching a token for {}", auth.management_url);
        let _ = self.lock().insert(key.into(), auth);
    }

    /// Drop the entry for the key.
    pub fn remove(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!("Dropped a cached token");
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedAuth>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
