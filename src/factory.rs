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

//! Versioned client construction.

use std::fmt;
use std::ops::{Deref, DerefMut};

use log::debug;
use static_assertions::assert_impl_all;

use super::client::{HttpClient, RequestTiming, SessionGuard};
use super::config::ClientOptions;
use super::identity::Credentials;
use super::{ApiVersion, Error, ErrorKind, VersionRequest};

/// Known client implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ClientVariant {
    /// Compute API v2 (also serves the legacy 1.1 API).
    V2,
}

/// A compute client bound to an API version.
#[derive(Debug)]
pub struct Client {
    variant: ClientVariant,
    http: HttpClient,
}

assert_impl_all!(Client: Send, Sync);

impl fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientVariant::V2 => f.write_str("v2"),
        }
    }
}

/// Find the client implementation for a requested version.
pub fn variant_for(version: &VersionRequest) -> Result<ClientVariant, Error> {
    match version {
        VersionRequest::Exact(ApiVersion(1, 1)) => Ok(ClientVariant::V2),
        VersionRequest::Exact(ApiVersion(2, _)) => Ok(ClientVariant::V2),
        VersionRequest::Latest(_) => Err(Error::new(
            ErrorKind::UnsupportedVersion,
            format!(
                "Version {} is not supported here, request an explicit version",
                version
            ),
        )),
        VersionRequest::Exact(other) => Err(Error::new(
            ErrorKind::UnsupportedVersion,
            format!(
                "Invalid client version '{}'. Must be one of: 1.1, 2.x",
                other
            ),
        )),
    }
}

/// Build a client for the requested API version.
///
/// Versions `1.1` and `2.x` map to the same implementation. A minor version is sent to the
/// server as a microversion.
pub fn build<V: Into<VersionRequest>>(
    version: V,
    credentials: Credentials,
    options: ClientOptions,
) -> Result<Client, Error> {
    let version = version.into();
    let variant = variant_for(&version)?;
    let mut http = HttpClient::new(credentials, options);
    if let VersionRequest::Exact(api_version) = version {
        if api_version.0 == 2 {
            http.set_api_version(api_version);
        }
    }
    debug!("Created {} compute client for version {}", variant, version);
    Ok(Client { variant, http })
}

impl Client {
    /// Client implementation in use.
    #[inline]
    pub fn variant(&self) -> ClientVariant {
        self.variant
    }

    /// API version sent to the server.
    #[inline]
    pub fn api_version(&self) -> ApiVersion {
        self.http.api_version()
    }

    /// Underlying HTTP client.
    #[inline]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Underlying HTTP client for issuing requests.
    #[inline]
    pub fn http_mut(&mut self) -> &mut HttpClient {
        &mut self.http
    }

    /// Take the HTTP client out.
    #[inline]
    pub fn into_http(self) -> HttpClient {
        self.http
    }

    /// Override the management URL.
    pub fn set_management_url<S: Into<String>>(&mut self, url: S) {
        self.http.set_management_url(url);
    }

    /// Recorded request timings.
    #[inline]
    pub fn get_timings(&self) -> &[RequestTiming] {
        self.http.timings()
    }

    /// Forget recorded request timings.
    #[inline]
    pub fn reset_timings(&mut self) {
        self.http.reset_timings();
    }

    /// Authenticate explicitly.
    pub async fn authenticate(&mut self) -> Result<(), Error> {
        self.http.authenticate().await
    }

    /// Open a scoped session, see [HttpClient::open_session].
    pub fn open_session(&mut self) -> Result<SessionGuard<'_>, Error> {
        self.http.open_session()
    }
}

impl Deref for Client {
    type Target = HttpClient;

    fn deref(&self) -> &HttpClient {
        &self.http
    }
}

impl DerefMut for Client {
    fn deref_mut(&mut self) -> &mut HttpClient {
        &mut self.http
    }
}
