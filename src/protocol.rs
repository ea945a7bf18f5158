// Copyright 2018 Dmitry Tantsur <divius.inside@gmail.com>
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

//! JSON structures for the Identity V2 API and compute version discovery.

#![allow(missing_docs)]

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use super::endpointfilters::InterfaceType;
use super::ApiVersion;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCredentials {
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    #[serde(rename = "tenantName", skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(
        rename = "passwordCredentials",
        skip_serializing_if = "Option::is_none"
    )]
    pub password_credentials: Option<PasswordCredentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenCredentials>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRoot {
    pub auth: Auth,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "publicURL", default)]
    pub public_url: Option<String>,
    #[serde(rename = "internalURL", default)]
    pub internal_url: Option<String>,
    #[serde(rename = "adminURL", default)]
    pub admin_url: Option<String>,
    #[serde(rename = "versionId", default)]
    pub version_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogRecord {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tenant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(default)]
    pub expires: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub tenant: Option<Tenant>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Access {
    pub token: Token,
    #[serde(rename = "serviceCatalog", default)]
    pub service_catalog: Vec<CatalogRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccessRoot {
    pub access: Access,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Link {
    pub href: Url,
    pub rel: String,
}

/// One API version advertised by the version discovery document.
#[derive(Clone, Debug, Deserialize)]
pub struct Version {
    pub id: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(deserialize_with = "empty_as_none", default)]
    pub status: Option<String>,
    #[serde(deserialize_with = "empty_as_none", default)]
    pub version: Option<ApiVersion>,
    #[serde(deserialize_with = "empty_as_none", default)]
    pub min_version: Option<ApiVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VersionsRoot {
    MultipleVersions { versions: Vec<Version> },
    OneVersion { version: Version },
}

impl Endpoint {
    /// URL for the given interface, if the endpoint has one.
    pub fn url(&self, interface: InterfaceType) -> Option<&str> {
        match interface {
            InterfaceType::Public => self.public_url.as_deref(),
            InterfaceType::Internal => self.internal_url.as_deref(),
            InterfaceType::Admin => self.admin_url.as_deref(),
        }
    }
}

impl Version {
    pub fn is_stable(&self) -> bool {
        if let Some(ref status) = self.status {
            let upper = status.to_uppercase();
            upper == "STABLE" || upper == "CURRENT" || upper == "SUPPORTED"
        } else {
            true
        }
    }

    /// The `self` link of this version, if present.
    pub fn self_link(&self) -> Option<&Url> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .map(|link| &link.href)
    }
}

impl VersionsRoot {
    pub fn into_versions(self) -> Vec<Version> {
        match self {
            VersionsRoot::MultipleVersions { versions } => versions,
            VersionsRoot::OneVersion { version } => vec![version],
        }
    }
}

/// Deserialize a value where empty string means `None`.
pub fn empty_as_none<'de, D, T>(des: D) -> ::std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(des)?;
    match value {
        serde_json::Value::String(ref s) if s.is_empty() => Ok(None),
        serde_json::Value::Null => Ok(None),
        other => T::deserialize(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
