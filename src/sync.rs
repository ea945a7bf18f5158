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

//! Synchronous wrapper for a compute client.
//!
//! Every call blocks the current thread until the request (including any authentication it
//! triggers) is finished. Must not be used from inside an asynchronous runtime.

use reqwest::Method;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use super::client::{HttpResponse, RequestTiming};
use super::config::ClientConfig;
use super::factory::Client;
use super::protocol::Version;
use super::{Error, ErrorKind};

/// A synchronous compute client.
#[derive(Debug)]
pub struct SyncClient {
    inner: Client,
    runtime: Runtime,
}

impl From<SyncClient> for Client {
    fn from(value: SyncClient) -> Client {
        value.inner
    }
}

impl SyncClient {
    /// Wrap an asynchronous client.
    pub fn new(client: Client) -> Result<SyncClient, Error> {
        let runtime = Builder::new_current_thread().enable_all().build().map_err(|e| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("Cannot create a runtime: {}", e),
            )
        })?;
        Ok(SyncClient {
            inner: client,
            runtime,
        })
    }

    /// Build a client from a configuration.
    pub fn from_config(config: ClientConfig) -> Result<SyncClient, Error> {
        SyncClient::new(config.into_client()?)
    }

    /// Asynchronous client.
    #[inline]
    pub fn client(&self) -> &Client {
        &self.inner
    }

    /// Asynchronous client for modifications.
    #[inline]
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.inner
    }

    /// Authenticate explicitly.
    pub fn authenticate(&mut self) -> Result<(), Error> {
        self.runtime.block_on(self.inner.authenticate())
    }

    /// Issue a request.
    pub fn request(
        &mut self,
        method: Method,
        path: Option<&str>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, Error> {
        self.runtime.block_on(self.inner.request(method, path, body))
    }

    /// Issue a GET request.
    #[inline]
    pub fn get(&mut self, path: &str) -> Result<HttpResponse, Error> {
        self.request(Method::GET, Some(path), None)
    }

    /// Issue a POST request with a JSON body.
    #[inline]
    pub fn post(&mut self, path: &str, body: &Value) -> Result<HttpResponse, Error> {
        self.request(Method::POST, Some(path), Some(body))
    }

    /// Issue a DELETE request.
    #[inline]
    pub fn delete(&mut self, path: &str) -> Result<HttpResponse, Error> {
        self.request(Method::DELETE, Some(path), None)
    }

    /// Fetch the versions advertised by the version discovery document.
    pub fn get_versions(&mut self) -> Result<Vec<Version>, Error> {
        self.runtime.block_on(self.inner.get_versions())
    }

    /// Recorded request timings.
    #[inline]
    pub fn get_timings(&self) -> &[RequestTiming] {
        self.inner.get_timings()
    }

    /// Forget recorded request timings.
    #[inline]
    pub fn reset_timings(&mut self) {
        self.inner.reset_timings()
    }
}
