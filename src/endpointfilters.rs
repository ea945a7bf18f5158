// Copyright 2020 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Endpoint filters for looking up endpoints.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeserError;
use serde::{Deserialize, Deserializer};

use super::{Error, ErrorKind};

/// Interface type: public, internal or admin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    /// Public interface (used by default).
    #[default]
    Public,
    /// Internal interface.
    Internal,
    /// Administrator interface.
    Admin,
}

/// Endpoint filters for looking up endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct EndpointFilters {
    /// Endpoint interface.
    pub interface: InterfaceType,
    /// Cloud region.
    pub region: Option<String>,
    /// Service name (only taken into account for the compute service).
    pub service_name: Option<String>,
}

impl InterfaceType {
    /// Name of the catalog field holding the URL for this interface.
    pub fn url_field(self) -> &'static str {
        match self {
            InterfaceType::Public => "publicURL",
            InterfaceType::Internal => "internalURL",
            InterfaceType::Admin => "adminURL",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.write_str(match self {
            InterfaceType::Public => "public",
            InterfaceType::Internal => "internal",
            InterfaceType::Admin => "admin",
        })
    }
}

impl FromStr for InterfaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" | "publicURL" => Ok(InterfaceType::Public),
            "internal" | "internalURL" => Ok(InterfaceType::Internal),
            "admin" | "adminURL" => Ok(InterfaceType::Admin),
            other => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Unknown interface type: {}", other),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for InterfaceType {
    fn deserialize<D>(deserializer: D) -> Result<InterfaceType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        InterfaceType::from_str(&value).map_err(DeserError::custom)
    }
}

impl EndpointFilters {
    /// Create filters with an interface and a region.
    ///
    /// Hint: use `default` to create empty filters (and `with_*` methods to populate it).
    pub fn new<S: Into<String>>(interface: InterfaceType, region: S) -> EndpointFilters {
        EndpointFilters {
            interface,
            region: Some(region.into()),
            service_name: None,
        }
    }

    /// Whether the region filter accepts the endpoint region (case-insensitive).
    pub fn check_region(&self, region: Option<&str>) -> bool {
        match self.region {
            Some(ref expected) => region.map_or(false, |r| r.eq_ignore_ascii_case(expected)),
            None => true,
        }
    }

    /// Set the interface.
    #[inline]
    pub fn set_interface(&mut self, value: InterfaceType) {
        self.interface = value;
    }

    /// Set region.
    #[inline]
    pub fn set_region<T: Into<String>>(&mut self, value: T) {
        self.region = Some(value.into());
    }

    /// Set service name.
    #[inline]
    pub fn set_service_name<T: Into<String>>(&mut self, value: T) {
        self.service_name = Some(value.into());
    }

    /// Change the interface.
    #[inline]
    pub fn with_interface(mut self, value: InterfaceType) -> Self {
        self.set_interface(value);
        self
    }

    /// Add a region.
    #[inline]
    pub fn with_region<T: Into<String>>(mut self, value: T) -> Self {
        self.set_region(value);
        self
    }

    /// Add a service name.
    #[inline]
    pub fn with_service_name<T: Into<String>>(mut self, value: T) -> Self {
        self.set_service_name(value);
        self
    }
}
