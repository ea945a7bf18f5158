// Copyright 2018 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! ApiVersion implementation.

use std::fmt;
use std::str::FromStr;

use reqwest::header::HeaderValue;
use serde::de::{Error as DeserError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Error, ErrorKind};

const LATEST: &str = "latest";

/// API version (major, minor).
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct ApiVersion(pub u16, pub u16);

/// A version requested by the caller: either a concrete one or the "latest" sentinel.
///
/// The sentinel may be qualified with a major version, e.g. `2.latest`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VersionRequest {
    /// A concrete API version.
    Exact(ApiVersion),
    /// The latest version available, optionally within a major version.
    Latest(Option<u16>),
}

impl ApiVersion {
    /// Whether this version selects a microversion rather than a bare major version.
    #[inline]
    pub fn is_microversion(&self) -> bool {
        self.1 != 0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

fn parse_component(component: &str, message: &str) -> Result<u16, Error> {
    component
        .parse()
        .map_err(|_| Error::new(ErrorKind::InvalidInput, message))
}

impl From<ApiVersion> for HeaderValue {
    fn from(value: ApiVersion) -> HeaderValue {
        value
            .to_string()
            .parse()
            .expect("X.Y is always a valid header value")
    }
}

impl From<(u16, u16)> for ApiVersion {
    fn from(value: (u16, u16)) -> ApiVersion {
        ApiVersion(value.0, value.1)
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<ApiVersion, Error> {
        let version_part = s.strip_prefix('v').unwrap_or(s);
        let parts: Vec<&str> = version_part.split('.').collect();

        if parts.is_empty() || parts.len() > 2 {
            let msg = format!("Invalid API version: expected X.Y or X, got {}", s);
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let major = parse_component(parts[0], "First version component is not a number")?;

        let minor = if parts.len() == 2 {
            parse_component(parts[1], "Second version component is not a number")?
        } else {
            0
        };

        Ok(ApiVersion(major, minor))
    }
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VersionRequest::Exact(version) => version.fmt(f),
            VersionRequest::Latest(Some(major)) => write!(f, "{}.{}", major, LATEST),
            VersionRequest::Latest(None) => f.write_str(LATEST),
        }
    }
}

impl From<ApiVersion> for VersionRequest {
    fn from(value: ApiVersion) -> VersionRequest {
        VersionRequest::Exact(value)
    }
}

impl From<u16> for VersionRequest {
    fn from(value: u16) -> VersionRequest {
        VersionRequest::Exact(ApiVersion(value, 0))
    }
}

impl FromStr for VersionRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<VersionRequest, Error> {
        let value = s.trim();
        if value.eq_ignore_ascii_case(LATEST) {
            return Ok(VersionRequest::Latest(None));
        }

        if let Some((major, minor)) = value.split_once('.') {
            if minor.eq_ignore_ascii_case(LATEST) {
                let major = parse_component(
                    major.strip_prefix('v').unwrap_or(major),
                    "First version component is not a number",
                )?;
                return Ok(VersionRequest::Latest(Some(major)));
            }
        }

        ApiVersion::from_str(value).map(VersionRequest::Exact)
    }
}

impl Serialize for ApiVersion {
    fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct ApiVersionVisitor;

impl<'de> Visitor<'de> for ApiVersionVisitor {
    type Value = ApiVersion;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string in format X.Y or X")
    }

    fn visit_str<E>(self, value: &str) -> ::std::result::Result<ApiVersion, E>
    where
        E: DeserError,
    {
        ApiVersion::from_str(value).map_err(DeserError::custom)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D>(deserializer: D) -> ::std::result::Result<ApiVersion, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(ApiVersionVisitor)
    }
}

struct VersionRequestVisitor;

impl<'de> Visitor<'de> for VersionRequestVisitor {
    type Value = VersionRequest;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a version number, a string in format X.Y or X, or \"latest\"")
    }

    fn visit_str<E>(self, value: &str) -> ::std::result::Result<VersionRequest, E>
    where
        E: DeserError,
    {
        VersionRequest::from_str(value).map_err(DeserError::custom)
    }

    fn visit_u64<E>(self, value: u64) -> ::std::result::Result<VersionRequest, E>
    where
        E: DeserError,
    {
        u16::try_from(value)
            .map(VersionRequest::from)
            .map_err(DeserError::custom)
    }

    fn visit_f64<E>(self, value: f64) -> ::std::result::Result<VersionRequest, E>
    where
        E: DeserError,
    {
        // YAML happily turns 2.1 into a float.
        VersionRequest::from_str(&value.to_string()).map_err(DeserError::custom)
    }
}

impl<'de> Deserialize<'de> for VersionRequest {
    fn deserialize<D>(deserializer: D) -> ::std::result::Result<VersionRequest, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(VersionRequestVisitor)
    }
}
