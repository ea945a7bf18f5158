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

//! Low-level compute HTTP client.
//!
//! The client owns its session state: the token, the management URL and the service catalog.
//! They are populated by the first request (or an explicit [authenticate](HttpClient::authenticate)
//! call) and refreshed when the server rejects the token.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use log::{debug, trace};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use static_assertions::assert_impl_all;
use url::Url;

use super::cache::{cache_key, CachedAuth, TokenCache};
use super::catalog::ServiceCatalog;
use super::config::ClientOptions;
use super::endpointfilters::EndpointFilters;
use super::identity::{auth_version, parse_v1_response, Credentials, IDENTITY_V2};
use super::pool::{ConnectionPool, KeepAliveAdapter, TransportOptions};
use super::protocol::{AccessRoot, Version, VersionsRoot};
use super::redact::{format_request, format_response, LoggedHeaders};
use super::url::{discovery_root, join, normalize, service_url};
use super::{ApiVersion, Error, ErrorKind};

/// A properly typed constant for use with root paths.
///
/// The problem with just using `None` is that the exact type of `Option` is not known.
pub const NO_PATH: Option<&'static str> = None;

const USER_AGENT: &str = concat!("rust-oscompute/", env!("CARGO_PKG_VERSION"));
const JSON: &str = "application/json";
const API_VERSION_HEADER: &str = "X-OpenStack-Nova-API-Version";
const REQUEST_ID_HEADERS: &[&str] = &["x-openstack-request-id", "x-compute-request-id"];
const MAX_REDIRECTS: usize = 5;

/// Duration of one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTiming {
    /// Request method and URL, e.g. `GET http://compute/v2.1/servers`.
    pub label: String,
    /// Wall-clock time of the request.
    pub elapsed: Duration,
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Value>,
}

/// Compute HTTP client with authentication and re-authentication.
///
/// Requests on one client must be issued sequentially, since they may update the session state.
#[derive(Debug)]
pub struct HttpClient {
    credentials: Credentials,
    options: ClientOptions,
    filters: EndpointFilters,
    transport: TransportOptions,
    api_version: ApiVersion,
    pool: Option<Arc<ConnectionPool>>,
    cache: Option<Arc<TokenCache>>,
    session: Option<Arc<KeepAliveAdapter>>,
    current_url: Option<String>,
    auth_token: Option<String>,
    management_url: Option<String>,
    catalog: Option<ServiceCatalog>,
    services_url: HashMap<String, String>,
    tenant_id: Option<String>,
    token_expires: Option<DateTime<FixedOffset>>,
    last_request_id: Option<String>,
    timings: Vec<RequestTiming>,
}

/// A scoped session: keeps one transport for all requests until dropped.
///
/// Dereferences to the client, so requests are issued through the guard.
#[derive(Debug)]
pub struct SessionGuard<'c> {
    client: &'c mut HttpClient,
}

assert_impl_all!(HttpClient: Send, Sync);

#[derive(Debug, Deserialize)]
struct Message {
    message: Option<String>,
    faultstring: Option<String>,
    title: Option<String>,
}

impl From<Message> for Option<String> {
    fn from(value: Message) -> Option<String> {
        value.message.or(value.faultstring).or(value.title)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorResponse {
    Map(HashMap<String, Message>),
    Message(Message),
}

fn extract_message(text: &str) -> String {
    serde_json::from_str::<ErrorResponse>(text)
        .ok()
        .and_then(|body| match body {
            ErrorResponse::Map(map) => map.into_iter().next().and_then(|(_k, v)| v.into()),
            ErrorResponse::Message(msg) => msg.into(),
        })
        .unwrap_or_else(|| text.to_string())
}

/// Convert an error status into an error, otherwise parse the body.
fn check(
    method: &Method,
    url: &str,
    status: StatusCode,
    headers: HeaderMap,
    text: String,
) -> Result<HttpResponse, Error> {
    if status.is_client_error() || status.is_server_error() {
        let message = extract_message(&text);
        trace!("HTTP request returned {}; error: {}", status, message);
        Err(Error::new(status.into(), message)
            .with_status(status)
            .with_body(text)
            .with_request(method.clone(), url))
    } else {
        trace!("HTTP request to {} returned {}", url, status);
        let body = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn login_failure(method: Method, url: &str, status: StatusCode, text: String) -> Error {
    Error::new(ErrorKind::AuthorizationFailure, extract_message(&text))
        .with_status(status)
        .with_body(text)
        .with_request(method, url)
}

fn redirect_location(headers: &HeaderMap) -> Result<String, Error> {
    headers
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(normalize)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::AuthorizationFailure,
                "Identity service asked to use a proxy without providing its location",
            )
        })
}

fn follow_redirect(redirects: usize) -> Result<usize, Error> {
    if redirects >= MAX_REDIRECTS {
        Err(Error::new(
            ErrorKind::AuthorizationFailure,
            "Too many redirects from the identity service",
        ))
    } else {
        Ok(redirects + 1)
    }
}

fn v2_identity_url(auth_url: String) -> String {
    if auth_url.contains(IDENTITY_V2) {
        auth_url
    } else {
        join(&auth_url, IDENTITY_V2)
    }
}

fn auth_headers() -> LoggedHeaders {
    let mut headers = LoggedHeaders::new();
    let _ = headers.insert("Content-Type".into(), Some(JSON.into()));
    let _ = headers.insert("Accept".into(), Some(JSON.into()));
    let _ = headers.insert("User-Agent".into(), Some(USER_AGENT.into()));
    headers
}

impl HttpResponse {
    /// Response status.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body if it was valid JSON.
    #[inline]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Take the body out of the response.
    #[inline]
    pub fn into_body(self) -> Option<Value> {
        self.body
    }

    /// Deserialize the body into a structure.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let body = self.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(Error::from)
    }
}

impl HttpClient {
    /// Create a client.
    ///
    /// A management URL that bypasses the catalog becomes the initial management URL.
    pub fn new(credentials: Credentials, options: ClientOptions) -> HttpClient {
        let transport = options.transport_options();
        let pool = if options.connection_pool {
            Some(Arc::new(ConnectionPool::new(transport.clone())))
        } else {
            None
        };
        let cache = if options.os_cache {
            Some(Arc::new(TokenCache::new()))
        } else {
            None
        };
        HttpClient {
            filters: options.endpoint_filters(),
            transport,
            api_version: ApiVersion(2, 0),
            pool,
            cache,
            session: None,
            current_url: None,
            auth_token: credentials.auth_token().map(From::from),
            management_url: credentials.bypass_url().map(From::from),
            catalog: None,
            services_url: HashMap::new(),
            tenant_id: credentials.tenant_id().map(From::from),
            token_expires: None,
            last_request_id: None,
            timings: Vec::new(),
            credentials,
            options,
        }
    }

    /// Use a connection pool shared with other clients.
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self.session = None;
        self.current_url = None;
        self
    }

    /// Use a token cache shared with other clients.
    ///
    /// Enables caching even if it is disabled in the options.
    pub fn with_token_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = Some(cache);
        self.options.os_cache = true;
        self
    }

    /// Whether tokens are cached.
    #[inline]
    pub fn os_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Token cache in use, if any.
    #[inline]
    pub fn token_cache(&self) -> Option<&Arc<TokenCache>> {
        self.cache.as_ref()
    }

    /// Set the API version sent with every request.
    #[inline]
    pub fn set_api_version<V: Into<ApiVersion>>(&mut self, version: V) {
        self.api_version = version.into();
    }

    /// API version sent with every request.
    #[inline]
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// Credentials in use.
    #[inline]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Client options.
    #[inline]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Current authentication token.
    #[inline]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Current management URL.
    #[inline]
    pub fn management_url(&self) -> Option<&str> {
        self.management_url.as_deref()
    }

    /// Override the management URL.
    pub fn set_management_url<S: Into<String>>(&mut self, url: S) {
        self.management_url = Some(url.into());
    }

    /// Service catalog from the last authentication.
    #[inline]
    pub fn service_catalog(&self) -> Option<&ServiceCatalog> {
        self.catalog.as_ref()
    }

    /// Tenant ID reported by the identity service.
    #[inline]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Expiration time of the current token (if known).
    #[inline]
    pub fn token_expires(&self) -> Option<DateTime<FixedOffset>> {
        self.token_expires
    }

    /// Request ID of the last response that had one.
    #[inline]
    pub fn last_request_id(&self) -> Option<&str> {
        self.last_request_id.as_deref()
    }

    /// `scheme://host` the pooled transport is currently bound to.
    #[inline]
    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    /// Recorded request timings.
    #[inline]
    pub fn timings(&self) -> &[RequestTiming] {
        &self.timings
    }

    /// Forget recorded request timings.
    #[inline]
    pub fn reset_timings(&mut self) {
        self.timings.clear();
    }

    /// Open a session that keeps one transport until the guard is dropped.
    ///
    /// Does nothing with a connection pool: the pool already keeps transports.
    pub fn open_session(&mut self) -> Result<SessionGuard<'_>, Error> {
        if self.pool.is_none() {
            self.session = Some(Arc::new(KeepAliveAdapter::new(&self.transport)?));
        }
        Ok(SessionGuard { client: self })
    }

    /// Close the session opened by [open_session](HttpClient::open_session).
    ///
    /// Safe to call several times.
    pub fn close_session(&mut self) {
        if self.pool.is_none() {
            self.session = None;
        }
    }

    /// Forget the token and the management URL.
    ///
    /// Also drops the cached token, if any.
    pub fn unauthenticate(&mut self) {
        if let Some(ref cache) = self.cache {
            cache.remove(&self.cache_key());
        }
        self.auth_token = None;
        self.management_url = None;
    }

    fn cache_key(&self) -> String {
        let interface = self.options.interface.to_string();
        cache_key(&[
            self.credentials.auth_url(),
            self.credentials.user(),
            self.credentials.user_id(),
            self.credentials.project_id(),
            self.credentials.tenant_id(),
            self.credentials.bypass_url(),
            self.options.region.as_deref(),
            Some(self.options.service_type.as_str()),
            self.options.service_name.as_deref(),
            Some(interface.as_str()),
        ])
    }

    fn load_cached(&mut self) -> bool {
        let cached = match self.cache {
            Some(ref cache) => cache.get(&self.cache_key()),
            None => None,
        };
        match cached {
            Some(auth) => {
                debug!("Using a cached token for {}", auth.management_url);
                self.auth_token = Some(auth.token);
                self.management_url = Some(auth.management_url);
                true
            }
            None => false,
        }
    }

    fn store_cached(&self) {
        if let (Some(cache), Some(token), Some(management_url)) =
            (&self.cache, &self.auth_token, &self.management_url)
        {
            cache.store(
                self.cache_key(),
                CachedAuth {
                    token: token.clone(),
                    management_url: management_url.clone(),
                },
            );
        }
    }

    /// URL of a service from the catalog.
    ///
    /// Results are cached until the next authentication.
    pub fn get_service_url(&mut self, service_type: &str) -> Result<String, Error> {
        if let Some(url) = self.services_url.get(service_type) {
            return Ok(url.clone());
        }

        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| Error::new_endpoint_not_found(service_type))?;
        let url = normalize(catalog.url_for(&self.filters, service_type)?);
        let _ = self
            .services_url
            .insert(service_type.to_string(), url.clone());
        Ok(url)
    }

    /// Authenticate against the identity service.
    ///
    /// Overwrites the token and the service catalog. Identity URLs with a `v2.0` path segment
    /// use the V2 protocol; anything else tries the legacy protocol first. The new token is
    /// stored in the token cache, if enabled.
    pub async fn authenticate(&mut self) -> Result<(), Error> {
        self.services_url.clear();

        let auth_url = match self.credentials.auth_url() {
            Some(url) => url.to_string(),
            None if self.auth_token.is_some() && self.management_url.is_some() => return Ok(()),
            None => {
                return Err(Error::new(
                    ErrorKind::AuthSystemNotFound,
                    "Authentication requires an auth_url or a token with a management URL",
                ))
            }
        };

        if auth_version(&auth_url).as_deref() == Some(IDENTITY_V2) {
            self.v2_login(auth_url).await?;
        } else if self.auth_token.is_some() && !self.credentials.has_password() {
            self.v2_login(v2_identity_url(auth_url)).await?;
        } else {
            match self.v1_login(auth_url.clone()).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AuthorizationFailure => {
                    debug!("Legacy authentication failed ({}), trying V2", err);
                    self.v2_login(v2_identity_url(auth_url)).await?;
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(bypass_url) = self.credentials.bypass_url() {
            self.management_url = Some(bypass_url.to_string());
        } else if self.management_url.is_none() {
            return Err(Error::new(
                ErrorKind::Unauthorized,
                "Identity service did not provide a compute endpoint",
            ));
        }

        self.store_cached();
        Ok(())
    }

    async fn v2_login(&mut self, auth_url: String) -> Result<(), Error> {
        let mut url = auth_url;
        let mut redirects = 0;
        loop {
            let token = self.auth_token.clone();
            let body = serde_json::to_value(self.credentials.v2_auth_body(token.as_deref())?)?;
            let tokens_url = join(&url, "tokens");
            let (status, headers, text) = self
                .send(Method::POST, &tokens_url, &auth_headers(), Some(&body))
                .await?;

            if status == StatusCode::USE_PROXY {
                redirects = follow_redirect(redirects)?;
                url = redirect_location(&headers)?;
                debug!("Identity service redirected authentication to {}", url);
                continue;
            }

            if !status.is_success() {
                return Err(login_failure(Method::POST, &tokens_url, status, text));
            }

            let root: AccessRoot = serde_json::from_str(&text).map_err(|e| {
                Error::new(
                    ErrorKind::AuthorizationFailure,
                    format!("Invalid response from the identity service: {}", e),
                )
            })?;
            return self.apply_access(root);
        }
    }

    fn apply_access(&mut self, root: AccessRoot) -> Result<(), Error> {
        let access = root.access;
        self.auth_token = Some(access.token.id);
        self.token_expires = access.token.expires;
        if let Some(tenant) = access.token.tenant {
            self.tenant_id = Some(tenant.id);
        }
        self.catalog = Some(ServiceCatalog::new(access.service_catalog));

        if self.credentials.bypass_url().is_none() {
            let service_type = self.options.service_type.clone();
            let url = self.get_service_url(&service_type)?;
            debug!("Using management URL {} from the catalog", url);
            self.management_url = Some(url);
        }
        Ok(())
    }

    async fn v1_login(&mut self, auth_url: String) -> Result<(), Error> {
        let mut url = auth_url;
        let mut redirects = 0;
        loop {
            let mut headers = self.credentials.v1_auth_headers()?;
            let _ = headers.insert("User-Agent".into(), Some(USER_AGENT.into()));
            let _ = headers.insert("Accept".into(), Some(JSON.into()));
            let (status, response_headers, text) =
                self.send(Method::GET, &url, &headers, None).await?;

            match status {
                StatusCode::OK | StatusCode::NO_CONTENT => {
                    let (management_url, token) = parse_v1_response(&response_headers)?;
                    self.management_url = Some(management_url);
                    self.auth_token = Some(token);
                    return Ok(());
                }
                StatusCode::USE_PROXY => {
                    redirects = follow_redirect(redirects)?;
                    url = redirect_location(&response_headers)?;
                    debug!("Identity service redirected authentication to {}", url);
                }
                _ => return Err(login_failure(Method::GET, &url, status, text)),
            }
        }
    }

    fn resolve_url(&mut self, path: Option<&str>) -> Result<String, Error> {
        let management_url = self.management_url.clone().ok_or_else(|| {
            Error::new(ErrorKind::Unauthorized, "No management URL is available")
        })?;

        match path.filter(|p| !p.is_empty()) {
            None => discovery_root(&management_url),
            Some(path) => {
                let base = if self.catalog.is_some() && self.credentials.bypass_url().is_none() {
                    let service_type = self.options.service_type.clone();
                    self.get_service_url(&service_type)?
                } else {
                    management_url
                };
                Ok(join(&base, path))
            }
        }
    }

    fn request_headers(&self, has_body: bool, extra: &LoggedHeaders) -> LoggedHeaders {
        let mut headers = LoggedHeaders::new();
        let _ = headers.insert("X-Auth-Token".into(), self.auth_token.clone());
        if let Some(project_id) = self.credentials.project_id() {
            let _ = headers.insert("X-Auth-Project-Id".into(), Some(project_id.into()));
        }
        let _ = headers.insert("User-Agent".into(), Some(USER_AGENT.into()));
        let _ = headers.insert("Accept".into(), Some(JSON.into()));
        if has_body {
            let _ = headers.insert("Content-Type".into(), Some(JSON.into()));
        }
        if self.api_version.is_microversion() {
            let _ = headers.insert(
                API_VERSION_HEADER.into(),
                Some(self.api_version.to_string()),
            );
        }
        headers.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }

    fn transport_for(&mut self, url: &Url) -> Result<Client, Error> {
        if let Some(ref pool) = self.pool {
            let target = service_url(url);
            if self.session.is_none() || self.current_url.as_deref() != Some(target.as_str()) {
                debug!("New session created for: ({})", target);
                self.session = Some(pool.get(url)?);
                self.current_url = Some(target);
            }
        }

        match self.session {
            Some(ref adapter) => Ok(adapter.client().clone()),
            None => self.transport.one_shot(),
        }
    }

    /// Issue one HTTP request without checking the status.
    async fn send(
        &mut self,
        method: Method,
        url: &str,
        headers: &LoggedHeaders,
        body: Option<&Value>,
    ) -> Result<(StatusCode, HeaderMap, String), Error> {
        let parsed = Url::parse(url)?;
        let client = self.transport_for(&parsed)?;

        if self.options.http_log_debug {
            debug!(
                "{}",
                format_request(&method, url, headers, body, self.options.insecure)
            );
        }

        let mut builder = client.request(method.clone(), parsed);
        for (name, value) in headers {
            if let Some(value) = value {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(body)?);
        }
        if let Some(timeout) = self.options.timeout {
            builder = builder.timeout(timeout);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| Error::from(e).with_request(method.clone(), url))?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| Error::from(e).with_request(method.clone(), url))?;
        let elapsed = start.elapsed();

        if self.options.timings {
            self.timings.push(RequestTiming {
                label: format!("{} {}", method, url),
                elapsed,
            });
        }

        if let Some(request_id) = REQUEST_ID_HEADERS
            .iter()
            .find_map(|name| response_headers.get(*name))
            .and_then(|value| value.to_str().ok())
        {
            debug!("{} call to {} used request id {}", method, url, request_id);
            self.last_request_id = Some(request_id.to_string());
        }

        if self.options.http_log_debug {
            let (resp, resp_body) = format_response(status, &response_headers, &text);
            debug!("{}", resp);
            debug!("{}", resp_body);
        }

        Ok((status, response_headers, text))
    }

    async fn attempt(
        &mut self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        extra: &LoggedHeaders,
    ) -> Result<HttpResponse, Error> {
        let headers = self.request_headers(body.is_some(), extra);
        let (status, response_headers, text) =
            self.send(method.clone(), url, &headers, body).await?;
        check(method, url, status, response_headers, text)
    }

    /// Issue a request with extra headers.
    ///
    /// Authenticates first if needed. If the token is rejected, re-authenticates and repeats
    /// the request exactly once.
    pub async fn request_with_headers(
        &mut self,
        method: Method,
        path: Option<&str>,
        body: Option<&Value>,
        extra: LoggedHeaders,
    ) -> Result<HttpResponse, Error> {
        if self.management_url.is_none() && !self.load_cached() {
            self.authenticate().await?;
        }

        let url = self.resolve_url(path)?;
        match self.attempt(&method, &url, body, &extra).await {
            Err(err) if err.is_token_rejected() => {
                debug!(
                    "{} {} was rejected with {:?}, re-authenticating",
                    method,
                    url,
                    err.status()
                );
                self.unauthenticate();
                match self.authenticate().await {
                    Ok(()) => {}
                    Err(auth_err)
                        if matches!(
                            auth_err.kind(),
                            ErrorKind::AuthorizationFailure
                                | ErrorKind::Unauthorized
                                | ErrorKind::AuthSystemNotFound
                        ) =>
                    {
                        debug!("Re-authentication failed: {}", auth_err);
                        return Err(err);
                    }
                    Err(auth_err) => return Err(auth_err),
                }
                self.attempt(&method, &url, body, &extra).await
            }
            other => other,
        }
    }

    /// Issue a request.
    #[inline]
    pub async fn request(
        &mut self,
        method: Method,
        path: Option<&str>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, Error> {
        self.request_with_headers(method, path, body, LoggedHeaders::new())
            .await
    }

    /// Issue a GET request.
    ///
    /// Use [NO_PATH] to query the version discovery document.
    pub async fn get<'p, P: Into<Option<&'p str>>>(
        &mut self,
        path: P,
    ) -> Result<HttpResponse, Error> {
        self.request(Method::GET, path.into(), None).await
    }

    /// Issue a POST request with a JSON body.
    pub async fn post(&mut self, path: &str, body: &Value) -> Result<HttpResponse, Error> {
        self.request(Method::POST, Some(path), Some(body)).await
    }

    /// Issue a PUT request with a JSON body.
    pub async fn put(&mut self, path: &str, body: &Value) -> Result<HttpResponse, Error> {
        self.request(Method::PUT, Some(path), Some(body)).await
    }

    /// Issue a PATCH request with a JSON body.
    pub async fn patch(&mut self, path: &str, body: &Value) -> Result<HttpResponse, Error> {
        self.request(Method::PATCH, Some(path), Some(body)).await
    }

    /// Issue a DELETE request.
    pub async fn delete(&mut self, path: &str) -> Result<HttpResponse, Error> {
        self.request(Method::DELETE, Some(path), None).await
    }

    /// Issue a HEAD request.
    pub async fn head(&mut self, path: &str) -> Result<HttpResponse, Error> {
        self.request(Method::HEAD, Some(path), None).await
    }

    /// Fetch the versions advertised by the version discovery document.
    ///
    /// Returns an empty list if the document has no recognizable versions.
    pub async fn get_versions(&mut self) -> Result<Vec<Version>, Error> {
        let response = self.get(NO_PATH).await?;
        Ok(match response.into_body() {
            Some(body) => serde_json::from_value::<VersionsRoot>(body)
                .map(VersionsRoot::into_versions)
                .unwrap_or_default(),
            None => Vec::new(),
        })
    }
}

impl<'c> Deref for SessionGuard<'c> {
    type Target = HttpClient;

    fn deref(&self) -> &HttpClient {
        self.client
    }
}

impl<'c> DerefMut for SessionGuard<'c> {
    fn deref_mut(&mut self) -> &mut HttpClient {
        self.client
    }
}

impl<'c> Drop for SessionGuard<'c> {
    fn drop(&mut self) {
        self.client.close_session();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use maplit::btreemap;
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::super::cache::TokenCache;
    use super::super::identity::Credentials;
    use super::super::{ApiVersion, ClientOptions, ErrorKind};
    use super::{extract_message, HttpClient, NO_PATH, USER_AGENT};

    fn password_credentials(auth_url: &str) -> Credentials {
        Credentials::new()
            .with_user("user")
            .with_password("password")
            .with_project_id("project")
            .with_auth_url(auth_url)
    }

    fn access_body(compute_url: &str) -> serde_json::Value {
        json!({
            "access": {
                "token": {"id": "new-token", "expires": "2026-10-20T12:00:00Z",
                          "tenant": {"id": "tenant-id", "name": "project"}},
                "serviceCatalog": [{
                    "type": "compute",
                    "name": "nova",
                    "endpoints": [{"region": "RegionOne", "publicURL": compute_url}]
                }]
            }
        })
    }

    #[test]
    fn test_extract_message() {
        assert_eq!(extract_message("<html>I failed</html>"), "<html>I failed</html>");
        assert_eq!(extract_message(r#"{"message": "I failed"}"#), "I failed");
        assert_eq!(
            extract_message(r#"{"itemNotFound": {"message": "No server", "code": 404}}"#),
            "No server"
        );
        assert_eq!(extract_message(r#"{"title": "Conflict"}"#), "Conflict");
    }

    #[test]
    fn test_token_and_bypass_url() {
        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url("compute/v100/");
        let client = HttpClient::new(creds, ClientOptions::default());
        assert_eq!(client.credentials().auth_url(), None);
        assert_eq!(client.auth_token(), Some("12345"));
        assert_eq!(client.credentials().bypass_url(), Some("compute/v100"));
        assert_eq!(client.management_url(), Some("compute/v100"));
    }

    #[test]
    fn test_set_management_url() {
        let mut client = HttpClient::new(
            password_credentials("foo/v2"),
            ClientOptions::default(),
        );
        client.set_management_url("blabla");
        assert_eq!(client.management_url(), Some("blabla"));
        client.unauthenticate();
        assert_eq!(client.management_url(), None);
        assert_eq!(client.auth_token(), None);
    }

    #[tokio::test]
    async fn test_no_means_to_authenticate() {
        let mut client = HttpClient::new(Credentials::new(), ClientOptions::default());
        let err = client.get("/servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthSystemNotFound);
        assert!(client.authenticate().await.is_err());
    }

    #[tokio::test]
    async fn test_reauth_rejected_by_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(header("Content-Type", "application/json"))
            .and(header("Accept", "application/json"))
            .and(header("User-Agent", USER_AGENT))
            .and(body_json(json!({
                "auth": {
                    "tenantName": "project",
                    "passwordCredentials": {"username": "user", "password": "password"}
                }
            })))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mgmt/servers/detail"))
            .and(header("X-Auth-Project-Id", "project"))
            .and(header("X-Auth-Token", "foobar"))
            .and(header("User-Agent", USER_AGENT))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(
            password_credentials(&auth_url),
            ClientOptions::default().with_timeout(Duration::from_secs(2)),
        );
        client.auth_token = Some("foobar".into());
        client.set_management_url(format!("{}/mgmt", server.uri()));

        let err = client.get("/servers/detail").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reauth_replay_rejected() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        client.auth_token = Some("expired".into());
        client.set_management_url(compute_url.clone());

        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(client.auth_token(), Some("new-token"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].headers.get("X-Auth-Token").unwrap(),
            "expired"
        );
        assert_eq!(
            requests[2].headers.get("X-Auth-Token").unwrap(),
            "new-token"
        );
    }

    #[tokio::test]
    async fn test_reauth_success() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/compute/v2.1/servers/1"))
            .and(header("X-Auth-Token", "new-token"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/compute/v2.1/servers/1"))
            .and(header("X-Auth-Token", "expired"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        client.auth_token = Some("expired".into());
        client.set_management_url(compute_url);

        let resp = client.delete("servers/1").await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.body().is_none());
    }

    #[tokio::test]
    async fn test_first_login_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"unauthorized": {"message": "Invalid user"}})),
            )
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        let err = client.get("/servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationFailure);
        assert_eq!(err.message(), Some("Invalid user"));
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_v1_login_with_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("X-Auth-User", "user"))
            .and(header("X-Auth-Key", "password"))
            .and(header("X-Auth-Project-Id", "project"))
            .respond_with(
                ResponseTemplate::new(204)
                    .insert_header("X-Server-Management-Url", "http://compute.example.com/")
                    .insert_header("X-Auth-Token", "blah"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut client = HttpClient::new(
            password_credentials(&server.uri()),
            ClientOptions::default().with_timeout(Duration::from_secs(2)),
        );
        client.authenticate().await.unwrap();
        assert_eq!(client.auth_token(), Some("blah"));
        assert_eq!(client.management_url(), Some("http://compute.example.com"));
    }

    #[tokio::test]
    async fn test_v1_falls_back_to_v2() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("GET"))
            .and(path("/identity"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/identity/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;

        let auth_url = format!("{}/identity", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        client.authenticate().await.unwrap();
        assert_eq!(client.auth_token(), Some("new-token"));
        assert_eq!(client.tenant_id(), Some("tenant-id"));
        assert!(client.token_expires().is_some());
        assert_eq!(client.management_url(), Some(compute_url.as_str()));
    }

    #[tokio::test]
    async fn test_v2_login_redirect() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(305)
                    .insert_header("Location", format!("{}/other/v2.0/", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/other/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        client.authenticate().await.unwrap();
        assert_eq!(client.management_url(), Some(compute_url.as_str()));
    }

    #[tokio::test]
    async fn test_token_exchange() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(body_json(json!({"auth": {"tenantName": "project", "token": {"id": "abcd"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("abcd")
            .with_project_id("project")
            .with_auth_url(format!("{}/v2.0", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        client.authenticate().await.unwrap();
        assert_eq!(client.auth_token(), Some("new-token"));
    }

    #[tokio::test]
    async fn test_token_exchange_unversioned_auth_url() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/identity/v2.0/tokens"))
            .and(body_json(json!({"auth": {"token": {"id": "abcd"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("abcd")
            .with_auth_url(format!("{}/identity", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        client.authenticate().await.unwrap();
        assert_eq!(client.management_url(), Some(compute_url.as_str()));
    }

    async fn check_version_url(management_url: &str, version_path: &str) {
        let server = MockServer::start().await;
        let project_id = "25e469aa1848471b875e68cde6531bc5";
        let management_path = format!("{}/{}", management_url, project_id);
        Mock::given(method("GET"))
            .and(path(version_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/servers", management_path)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"servers": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = HttpClient::new(
            password_credentials(&format!("{}/v2.0", server.uri())),
            ClientOptions::default(),
        );
        client.auth_token = Some("foobar".into());
        client.set_management_url(format!("{}{}", server.uri(), management_path));

        let versions = client.get_versions().await.unwrap();
        assert!(versions.is_empty());
        let resp = client.get("servers").await.unwrap();
        assert_eq!(resp.body().unwrap(), &json!({"servers": []}));
    }

    #[tokio::test]
    async fn test_version_url() {
        for version in &["v2", "v2.1", "v3.785"] {
            check_version_url(&format!("/{}", version), "/").await;
        }
    }

    #[tokio::test]
    async fn test_version_url_with_project_name() {
        for version in &["v2", "v2.1", "v3.785"] {
            check_version_url(&format!("/nova/{}", version), "/nova/").await;
        }
    }

    #[tokio::test]
    async fn test_get_versions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "versions": [{"id": "v2.1", "status": "CURRENT", "version": "2.90",
                              "min_version": "2.1", "links": []}]
            })))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2.1/", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let versions = client.get_versions().await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, Some(ApiVersion(2, 90)));
    }

    #[tokio::test]
    async fn test_service_url_lookup() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v5/", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v5/servers"))
            .and(header("X-Auth-Token", "new-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = HttpClient::new(
            password_credentials(&format!("{}/v2.0", server.uri())),
            ClientOptions::default(),
        );
        let _ = client.get("/servers").await.unwrap();
        let _ = client.get("/servers").await.unwrap();
        assert!(client.service_catalog().is_some());
        assert_eq!(
            client.management_url(),
            Some(compute_url.trim_end_matches('/'))
        );
    }

    #[tokio::test]
    async fn test_bypass_url_skips_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v100/servers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let creds =
            password_credentials("http://identity.invalid/v2.0").with_bypass_url(format!(
                "{}/v100",
                server.uri()
            ));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let _ = client.get("/servers").await.unwrap();
        assert!(client.service_catalog().is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bypass_url_after_login() {
        let server = MockServer::start().await;
        let bypass_url = format!("{}/bypass/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(access_body("http://catalog.invalid/v2.1")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bypass/v2.1/servers"))
            .and(header("X-Auth-Token", "new-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let creds = password_credentials(&format!("{}/v2.0", server.uri()))
            .with_bypass_url(bypass_url.clone());
        let mut client = HttpClient::new(creds, ClientOptions::default());
        client.unauthenticate();
        let _ = client.get("servers").await.unwrap();
        assert_eq!(client.management_url(), Some(bypass_url.as_str()));
    }

    #[tokio::test]
    async fn test_request_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.1/servers"))
            .and(header("Content-Type", "application/json"))
            .and(header("X-OpenStack-Nova-API-Version", "2.53"))
            .and(header("X-Custom", "yes"))
            .and(body_json(json!({"server": {"name": "test"}})))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("X-OpenStack-Request-Id", "req-1234")
                    .set_body_json(json!({"server": {"id": "1"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2.1", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        client.set_api_version(ApiVersion(2, 53));
        let resp = client
            .request_with_headers(
                reqwest::Method::POST,
                Some("servers"),
                Some(&json!({"server": {"name": "test"}})),
                btreemap! {"X-Custom".to_string() => Some("yes".to_string())},
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        #[derive(serde::Deserialize)]
        struct Root {
            server: serde_json::Value,
        }
        let root: Root = resp.json().unwrap();
        assert_eq!(root.server["id"], "1");
        assert_eq!(client.last_request_id(), Some("req-1234"));
    }

    #[tokio::test]
    async fn test_no_project_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/servers"))
            .and(header_exists("X-Auth-Token"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let _ = client.get("servers").await.unwrap();
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("X-Auth-Project-Id").is_none());
        assert!(requests[0].headers.get("X-OpenStack-Nova-API-Version").is_none());
        assert!(requests[0].headers.get("Content-Type").is_none());
    }

    #[tokio::test]
    async fn test_client_exception() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/servers/42"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"itemNotFound": {"message": "No such server"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let err = client.get("servers/42").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientException);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.message(), Some("No such server"));
        assert!(err.body().unwrap().contains("itemNotFound"));
        assert_eq!(err.method(), Some(&reqwest::Method::GET));
        assert_eq!(
            err.url(),
            Some(format!("{}/v2/servers/42", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_token_only_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/servers"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_timings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));

        let mut client = HttpClient::new(creds.clone(), ClientOptions::default());
        let _ = client.get("servers").await.unwrap();
        let _ = client.get("flavors").await.unwrap();
        assert!(client.timings().is_empty());

        let mut client = HttpClient::new(creds, ClientOptions::default().with_timings(true));
        let _ = client.get("servers").await.unwrap();
        assert_eq!(client.timings().len(), 1);
        assert_eq!(
            client.timings()[0].label,
            format!("GET {}/v2/servers", server.uri())
        );
        client.reset_timings();
        assert!(client.timings().is_empty());
    }

    #[tokio::test]
    async fn test_http_log_debug() {
        let _ = env_logger::builder().is_test(true).try_init();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"servers": []})))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client =
            HttpClient::new(creds, ClientOptions::default().with_http_log_debug(true));
        let resp = client.get(NO_PATH).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_session() {
        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url("http://compute.example.com/v2");
        let mut client = HttpClient::new(creds, ClientOptions::default());
        assert!(client.session.is_none());
        {
            let guard = client.open_session().unwrap();
            assert!(guard.session.is_some());
        }
        assert!(client.session.is_none());
        client.close_session();
        assert!(client.session.is_none());
    }

    #[tokio::test]
    async fn test_session_closed_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let result = {
            let mut guard = client.open_session().unwrap();
            guard.get("servers").await
        };
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ClientException);
        assert!(client.session.is_none());
    }

    #[tokio::test]
    async fn test_session_connection_pool() {
        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url("http://compute.example.com/v2");
        let mut client = HttpClient::new(
            creds,
            ClientOptions::default().with_connection_pool(true),
        );
        assert!(client.session.is_none());
        {
            let guard = client.open_session().unwrap();
            assert!(guard.session.is_none());
        }
        assert!(client.session.is_none());
    }

    #[tokio::test]
    async fn test_get_session() {
        let creds = Credentials::new().with_auth_token("12345");
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let url = url::Url::parse("http://example.com/v2").unwrap();
        let _ = client.transport_for(&url).unwrap();
        assert!(client.session.is_none());
        assert!(client.current_url().is_none());
    }

    #[tokio::test]
    async fn test_get_session_connection_pool() {
        let creds = Credentials::new().with_auth_token("12345");
        let pool = Arc::new(super::ConnectionPool::new(Default::default()));
        let mut client =
            HttpClient::new(creds, ClientOptions::default()).with_pool(Arc::clone(&pool));

        let url = url::Url::parse("http://service.example.com:8774/v2/servers").unwrap();
        let _ = client.transport_for(&url).unwrap();
        assert_eq!(client.current_url(), Some("http://service.example.com:8774"));
        let first = Arc::clone(client.session.as_ref().unwrap());

        let same = url::Url::parse("http://service.example.com:8774/v2.1/flavors").unwrap();
        let _ = client.transport_for(&same).unwrap();
        assert!(Arc::ptr_eq(&first, client.session.as_ref().unwrap()));

        let other = url::Url::parse("http://image.example.com/v2/images").unwrap();
        let _ = client.transport_for(&other).unwrap();
        assert_eq!(client.current_url(), Some("http://image.example.com"));
        assert!(!Arc::ptr_eq(&first, client.session.as_ref().unwrap()));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_password_provider_used_on_login() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(body_json(json!({"auth": {
                "tenantName": "project",
                "passwordCredentials": {"username": "user", "password": "from-provider"}
            }})))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(2)
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let creds = Credentials::new()
            .with_user("user")
            .with_project_id("project")
            .with_auth_url(format!("{}/v2.0", server.uri()))
            .with_password_provider(move || {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Some("from-provider".to_string())
            });
        let mut client = HttpClient::new(creds, ClientOptions::default());
        client.authenticate().await.unwrap();
        client.unauthenticate();
        client.authenticate().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_with_http_log_debug() {
        let _ = env_logger::builder().is_test(true).try_init();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(|request: &Request| {
                serde_json::from_slice::<serde_json::Value>(&request.body)
                    .map(|body| body["auth"]["passwordCredentials"]["password"] == "password")
                    .unwrap_or(false)
            })
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = HttpClient::new(
            password_credentials(&format!("{}/v2.0", server.uri())),
            ClientOptions::default().with_http_log_debug(true),
        );
        let err = client.authenticate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationFailure);
    }

    #[tokio::test]
    async fn test_token_only_reauth_with_auth_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/servers"))
            .and(header("X-Auth-Token", "12345"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(401))
            .expect(0)
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_auth_url(format!("{}/v2.0", server.uri()))
            .with_bypass_url(format!("{}/v2", server.uri()));
        let mut client = HttpClient::new(creds, ClientOptions::default());
        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_v2_login_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(305)
                    .insert_header("Location", format!("{}/v2.0", server.uri()).as_str()),
            )
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        let err = client.authenticate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationFailure);
        assert_eq!(server.received_requests().await.unwrap().len(), 6);
        assert_eq!(client.auth_token(), None);
    }

    #[tokio::test]
    async fn test_token_cache_shared() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .and(header("X-Auth-Token", "new-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"servers": []})))
            .expect(2)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let cache = Arc::new(TokenCache::new());
        let mut first = HttpClient::new(password_credentials(&auth_url), ClientOptions::default())
            .with_token_cache(Arc::clone(&cache));
        assert!(first.os_cache());
        let _ = first.get("servers").await.unwrap();
        assert_eq!(cache.len(), 1);

        let mut second = HttpClient::new(password_credentials(&auth_url), ClientOptions::default())
            .with_token_cache(Arc::clone(&cache));
        let _ = second.get("servers").await.unwrap();
        assert_eq!(second.auth_token(), Some("new-token"));
        assert_eq!(second.management_url(), Some(compute_url.as_str()));

        second.unauthenticate();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_token_cache_dropped_on_rejection() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(
            password_credentials(&auth_url),
            ClientOptions::default().with_os_cache(true),
        );
        let cache = Arc::clone(client.token_cache().unwrap());
        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2.1/servers"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .with_auth_token("12345")
            .with_bypass_url(format!("{}/v2.1", server.uri()));
        let mut client = HttpClient::new(
            creds,
            ClientOptions::default().with_timeout(Duration::from_millis(200)),
        );
        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = HttpClient::new(
            password_credentials(&format!("{}/v2.0", server.uri())),
            ClientOptions::default().with_timeout(Duration::from_millis(200)),
        );
        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert_eq!(client.auth_token(), None);
    }

    #[tokio::test]
    async fn test_replay_timeout() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .and(header("X-Auth-Token", "expired"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .and(header("X-Auth-Token", "new-token"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .expect(1)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(
            password_credentials(&auth_url),
            ClientOptions::default().with_timeout(Duration::from_millis(500)),
        );
        client.auth_token = Some("expired".into());
        client.set_management_url(compute_url);

        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert_eq!(client.auth_token(), Some("new-token"));
    }

    #[tokio::test]
    async fn test_forbidden_replay() {
        let server = MockServer::start().await;
        let compute_url = format!("{}/compute/v2.1", server.uri());
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(access_body(&compute_url)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"forbidden": {"message": "Policy", "code": 403}})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let auth_url = format!("{}/v2.0", server.uri());
        let mut client = HttpClient::new(password_credentials(&auth_url), ClientOptions::default());
        client.auth_token = Some("expired".into());
        client.set_management_url(compute_url);

        let err = client.get("servers").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientException);
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.message(), Some("Policy"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].method.as_str(), "POST");
    }
}
