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

//! Error and Result implementations.

use std::fmt;

use reqwest::{Method, StatusCode};

/// Kind of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No means to authenticate: neither an auth URL nor a token with a management URL.
    AuthSystemNotFound,

    /// The identity service rejected the login or returned an unusable response.
    AuthorizationFailure,

    /// The token was rejected even after re-authentication.
    Unauthorized,

    /// The requested endpoint was not found in the service catalog.
    EndpointNotFound,

    /// More than one endpoint matches the catalog filters.
    AmbiguousEndpoints,

    /// The requested API version is not supported by this client.
    UnsupportedVersion,

    /// Any other HTTP error returned by the service.
    ClientException,

    /// Input parameters are not valid.
    InvalidInput,

    /// Configuration is not valid or cannot be loaded.
    InvalidConfig,

    /// Response from the server is not valid.
    InvalidResponse,

    /// Generic transport error (connection failure, timeout, etc).
    ProtocolError,
}

/// Error from an OpenStack call.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    status: Option<StatusCode>,
    body: Option<String>,
    request: Option<(Method, String)>,
}

impl ErrorKind {
    /// Short description of the error kind.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::AuthSystemNotFound => "No authentication method is configured",
            ErrorKind::AuthorizationFailure => "Authentication failed",
            ErrorKind::Unauthorized => "Access is not authorized",
            ErrorKind::EndpointNotFound => "Requested endpoint was not found",
            ErrorKind::AmbiguousEndpoints => "Several endpoints match the request",
            ErrorKind::UnsupportedVersion => "API version is not supported",
            ErrorKind::ClientException => "Request failed",
            ErrorKind::InvalidInput => "Input value(s) are invalid or missing",
            ErrorKind::InvalidConfig => "Configuration file cannot be found or is invalid",
            ErrorKind::InvalidResponse => "Received invalid response",
            ErrorKind::ProtocolError => "Error when accessing the server",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<StatusCode> for ErrorKind {
    fn from(value: StatusCode) -> ErrorKind {
        if value == StatusCode::UNAUTHORIZED {
            ErrorKind::Unauthorized
        } else {
            ErrorKind::ClientException
        }
    }
}

impl Error {
    /// Create a new error of the provided kind.
    #[inline]
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Error {
        Error {
            kind,
            message: Some(message.into()),
            status: None,
            body: None,
            request: None,
        }
    }

    /// Create an error for a missing catalog entry.
    #[inline]
    pub(crate) fn new_endpoint_not_found<D: fmt::Display>(service_type: D) -> Error {
        Error::new(
            ErrorKind::EndpointNotFound,
            format!("Endpoint for service {} was not found", service_type),
        )
    }

    /// Add an HTTP status code to the error.
    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Add the raw response body to the error.
    #[inline]
    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add the request method and URL to the error.
    #[inline]
    pub fn with_request<S: Into<String>>(mut self, method: Method, url: S) -> Self {
        self.request = Some((method, url.into()));
        self
    }

    /// Error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Error message (if any).
    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// HTTP status code (if any).
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Raw response body (if any).
    #[inline]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// HTTP method of the failed request (if any).
    #[inline]
    pub fn method(&self) -> Option<&Method> {
        self.request.as_ref().map(|(method, _)| method)
    }

    /// URL of the failed request (if any).
    #[inline]
    pub fn url(&self) -> Option<&str> {
        self.request.as_ref().map(|(_, url)| url.as_str())
    }

    /// Whether the error means that the current token was rejected.
    #[inline]
    pub(crate) fn is_token_rejected(&self) -> bool {
        matches!(
            self.status,
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status.as_u16())?;
        }
        if let Some(ref msg) = self.message {
            write!(f, ": {}", msg)?;
        }
        if let Some((ref method, ref url)) = self.request {
            write!(f, " [{} {}]", method, url)?;
        }
        Ok(())
    }
}

impl ::std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Error {
        let err = Error::new(ErrorKind::ProtocolError, value.to_string());
        match value.status() {
            Some(status) => err.with_status(status),
            None => err,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Error {
        Error::new(ErrorKind::InvalidInput, value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Error {
        Error::new(ErrorKind::InvalidResponse, value.to_string())
    }
}
