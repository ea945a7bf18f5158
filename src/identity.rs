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

//! Credentials and the bits of the identity protocols needed to log in.
//!
//! Two login flavours exist:
//!
//! * Identity V2: `POST <auth_url>/tokens` with a JSON envelope, returning a token and a
//!   service catalog.
//! * Legacy (V1): `GET <auth_url>` with `X-Auth-User` and `X-Auth-Key` headers, returning the
//!   token and the management URL in response headers.

use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use url::Url;

use super::protocol::{Auth, AuthRoot, PasswordCredentials, TokenCredentials};
use super::redact::LoggedHeaders;
use super::url::normalize;
use super::{Error, ErrorKind};

/// Version segment of identity URLs that speak the V2 protocol.
pub const IDENTITY_V2: &str = "v2.0";

/// A function returning a password on demand.
pub type PasswordProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// A password: either known upfront or fetched when first needed.
#[derive(Clone)]
pub enum Password {
    /// A static password.
    Static(String),
    /// A function called when the password is needed for the first time.
    Provider(PasswordProvider),
}

/// Credentials used to authenticate against the identity service.
///
/// URLs are stored without trailing slashes.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    user: Option<String>,
    user_id: Option<String>,
    password: Option<Password>,
    project_id: Option<String>,
    tenant_id: Option<String>,
    domain: Option<String>,
    auth_url: Option<String>,
    auth_token: Option<String>,
    bypass_url: Option<String>,
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Password::Static(_) => f.write_str("Static(<hidden>)"),
            Password::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

impl From<String> for Password {
    fn from(value: String) -> Password {
        Password::Static(value)
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Password {
        Password::Static(value.to_string())
    }
}

impl Credentials {
    /// Empty credentials.
    pub fn new() -> Credentials {
        Credentials::default()
    }

    /// User name.
    #[inline]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// User ID.
    #[inline]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Project (tenant) name, also sent as `X-Auth-Project-Id`.
    #[inline]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Tenant ID.
    #[inline]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// User domain name.
    ///
    /// Identity V2 and the legacy protocol have no domains, so no login request carries it.
    #[inline]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Identity service URL.
    #[inline]
    pub fn auth_url(&self) -> Option<&str> {
        self.auth_url.as_deref()
    }

    /// Pre-existing authentication token.
    #[inline]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Management URL that bypasses the service catalog.
    #[inline]
    pub fn bypass_url(&self) -> Option<&str> {
        self.bypass_url.as_deref()
    }

    /// Whether a password or a password provider is configured.
    #[inline]
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Set the user name.
    pub fn with_user<S: Into<String>>(mut self, value: S) -> Self {
        self.user = Some(value.into());
        self
    }

    /// Set the user ID.
    pub fn with_user_id<S: Into<String>>(mut self, value: S) -> Self {
        self.user_id = Some(value.into());
        self
    }

    /// Set a static password.
    ///
    /// A static password always takes precedence over a provider.
    pub fn with_password<S: Into<String>>(mut self, value: S) -> Self {
        self.password = Some(Password::Static(value.into()));
        self
    }

    /// Set a function to fetch the password when it is first needed.
    ///
    /// Ignored if a static password is already set.
    pub fn with_password_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        if !matches!(self.password, Some(Password::Static(_))) {
            self.password = Some(Password::Provider(Arc::new(provider)));
        }
        self
    }

    /// Set the project (tenant) name.
    pub fn with_project_id<S: Into<String>>(mut self, value: S) -> Self {
        self.project_id = Some(value.into());
        self
    }

    /// Set the tenant ID.
    pub fn with_tenant_id<S: Into<String>>(mut self, value: S) -> Self {
        self.tenant_id = Some(value.into());
        self
    }

    /// Set the user domain name.
    ///
    /// Only stored, see [domain](Credentials::domain).
    pub fn with_domain<S: Into<String>>(mut self, value: S) -> Self {
        self.domain = Some(value.into());
        self
    }

    /// Set the identity service URL.
    pub fn with_auth_url<S: AsRef<str>>(mut self, value: S) -> Self {
        self.auth_url = Some(normalize(value));
        self
    }

    /// Set an existing authentication token.
    pub fn with_auth_token<S: Into<String>>(mut self, value: S) -> Self {
        self.auth_token = Some(value.into());
        self
    }

    /// Set a management URL that bypasses the service catalog.
    pub fn with_bypass_url<S: AsRef<str>>(mut self, value: S) -> Self {
        self.bypass_url = Some(normalize(value));
        self
    }

    /// Get the password, calling the provider if needed.
    ///
    /// A password returned by the provider is remembered, so the provider is called again only
    /// if it did not return anything.
    pub fn resolve_password(&mut self) -> Option<String> {
        let resolved = match self.password {
            Some(Password::Static(ref value)) => return Some(value.clone()),
            Some(Password::Provider(ref provider)) => provider(),
            None => None,
        };
        if let Some(ref value) = resolved {
            self.password = Some(Password::Static(value.clone()));
        }
        resolved
    }

    /// A missing password fails the login with `AuthorizationFailure`.
    fn require_password(&mut self) -> Result<String, Error> {
        self.resolve_password().ok_or_else(|| {
            Error::new(
                ErrorKind::AuthorizationFailure,
                "A password is required to authenticate",
            )
        })
    }

    /// Build the body of an Identity V2 login request.
    ///
    /// An existing token is exchanged instead of a password when present.
    pub(crate) fn v2_auth_body(&mut self, token: Option<&str>) -> Result<AuthRoot, Error> {
        let mut auth = Auth::default();
        if let Some(token) = token {
            auth.token = Some(TokenCredentials {
                id: token.to_string(),
            });
        } else {
            let password = self.require_password()?;
            auth.password_credentials = Some(match self.user_id {
                Some(ref user_id) => PasswordCredentials {
                    username: None,
                    user_id: Some(user_id.clone()),
                    password,
                },
                None => PasswordCredentials {
                    username: self.user.clone(),
                    user_id: None,
                    password,
                },
            });
        }

        if let Some(ref tenant_id) = self.tenant_id {
            auth.tenant_id = Some(tenant_id.clone());
        } else if let Some(ref project_id) = self.project_id {
            auth.tenant_name = Some(project_id.clone());
        }

        Ok(AuthRoot { auth })
    }

    /// Build headers of a legacy login request.
    pub(crate) fn v1_auth_headers(&mut self) -> Result<LoggedHeaders, Error> {
        let password = self.require_password()?;
        let mut headers = LoggedHeaders::new();
        let _ = headers.insert("X-Auth-User".into(), self.user.clone());
        let _ = headers.insert("X-Auth-Key".into(), Some(password));
        if let Some(ref project_id) = self.project_id {
            let _ = headers.insert("X-Auth-Project-Id".into(), Some(project_id.clone()));
        }
        Ok(headers)
    }
}

/// The identity protocol version named by the first `v*` segment of the URL path.
pub fn auth_version(auth_url: &str) -> Option<String> {
    let url = Url::parse(auth_url).ok()?;
    let mut segments = url.path_segments()?;
    segments
        .find(|part| part.starts_with('v'))
        .map(ToString::to_string)
}

/// Extract the management URL and the token from a legacy login response.
pub(crate) fn parse_v1_response(headers: &HeaderMap) -> Result<(String, String), Error> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };
    match (get("x-server-management-url"), get("x-auth-token")) {
        (Some(management_url), Some(token)) => Ok((normalize(management_url), token)),
        _ => Err(Error::new(
            ErrorKind::AuthorizationFailure,
            "Identity service did not return a token and a management URL",
        )),
    }
}
