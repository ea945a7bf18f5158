// Copyright 2019 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Transports and the connection pool.

use std::collections::HashMap;
#[cfg(any(feature = "native-tls", feature = "rustls"))]
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
#[cfg(any(feature = "native-tls", feature = "rustls"))]
use reqwest::Certificate;
use reqwest::{Client, ClientBuilder};
use static_assertions::assert_impl_all;
use url::Url;

use super::url::pool_key;
use super::{Error, ErrorKind};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// TLS settings shared by all transports of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Do not verify server certificates.
    pub insecure: bool,
    /// Path to an additional PEM root certificate.
    pub cacert: Option<String>,
}

/// A transport that keeps its connections open between requests.
#[derive(Debug, Clone)]
pub struct KeepAliveAdapter {
    client: Client,
}

/// Keep-alive transports, one per remote server.
///
/// Entries are created on first use and live as long as the pool.
#[derive(Debug)]
pub struct ConnectionPool {
    options: TransportOptions,
    adapters: Mutex<HashMap<String, Arc<KeepAliveAdapter>>>,
}

assert_impl_all!(ConnectionPool: Send, Sync);
assert_impl_all!(KeepAliveAdapter: Send, Sync);

impl TransportOptions {
    fn builder(&self) -> Result<ClientBuilder, Error> {
        #[allow(unused_mut)]
        let mut builder = Client::builder();

        #[cfg(any(feature = "native-tls", feature = "rustls"))]
        {
            if let Some(ref cert_path) = self.cacert {
                let cert_content = fs::read(cert_path).map_err(|e| {
                    Error::new(
                        ErrorKind::InvalidConfig,
                        format!("Cannot open cacert file {}: {}", cert_path, e),
                    )
                })?;

                let cert = Certificate::from_pem(&cert_content).map_err(|e| {
                    Error::new(
                        ErrorKind::InvalidConfig,
                        format!("Cannot parse {} as PEM: {}", cert_path, e),
                    )
                })?;

                builder = builder.add_root_certificate(cert);
            }

            if self.insecure {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        #[cfg(not(any(feature = "native-tls", feature = "rustls")))]
        if self.cacert.is_some() || self.insecure {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "TLS support is disabled",
            ));
        }

        Ok(builder)
    }

    /// Build a transport that does not reuse connections.
    pub(crate) fn one_shot(&self) -> Result<Client, Error> {
        Ok(self.builder()?.pool_max_idle_per_host(0).build()?)
    }
}

impl KeepAliveAdapter {
    /// Create a new keep-alive transport.
    pub fn new(options: &TransportOptions) -> Result<KeepAliveAdapter, Error> {
        let client = options
            .builder()?
            .tcp_keepalive(KEEP_ALIVE_INTERVAL)
            .pool_idle_timeout(None)
            .build()?;
        Ok(KeepAliveAdapter { client })
    }

    /// The underlying HTTP client.
    #[inline]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ConnectionPool {
    /// Create an empty pool.
    pub fn new(options: TransportOptions) -> ConnectionPool {
        ConnectionPool {
            options,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Get the transport for the server of the URL, creating it if needed.
    ///
    /// URLs with the same scheme, host and port always get the same transport.
    pub fn get(&self, url: &Url) -> Result<Arc<KeepAliveAdapter>, Error> {
        let key = pool_key(url);
        if let Some(adapter) = self.lock().get(&key) {
            return Ok(Arc::clone(adapter));
        }

        // Constructing a transport can be slow, so it happens without the lock held.
        let candidate = Arc::new(KeepAliveAdapter::new(&self.options)?);
        let mut adapters = self.lock();
        let adapter = adapters.entry(key).or_insert_with(|| {
            debug!("Created a keep-alive transport for {}", url);
            candidate
        });
        Ok(Arc::clone(adapter))
    }

    /// Number of cached transports.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no transports have been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<KeepAliveAdapter>>> {
        // The map is always consistent, even if another thread panicked.
        self.adapters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
