// Copyright 2017 Dmitry Tantsur <divius.inside@gmail.com>
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

//! Low-level code to work with the service catalog.

use log::{debug, error};

use super::endpointfilters::EndpointFilters;
use super::protocol::{CatalogRecord, Endpoint};
use super::{Error, ErrorKind};

const COMPUTE: &str = "compute";
const COMPUTE_VERSIONS: &[&str] = &["1.1", "2"];
const DEFAULT_VERSION_ID: &str = "2";

/// Service catalog received from the identity service.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    records: Vec<CatalogRecord>,
}

impl ServiceCatalog {
    /// Wrap catalog records.
    pub fn new(records: Vec<CatalogRecord>) -> ServiceCatalog {
        ServiceCatalog { records }
    }

    /// Catalog records.
    #[inline]
    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    /// Whether the catalog has no services at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find_endpoints<'c>(
        &'c self,
        filters: &EndpointFilters,
        service_type: &str,
    ) -> Vec<(&'c CatalogRecord, &'c Endpoint)> {
        let mut result = Vec::new();
        for svc in self.records.iter().filter(|x| x.service_type == service_type) {
            if service_type == COMPUTE {
                if let Some(ref name) = filters.service_name {
                    if svc.name.as_ref() != Some(name) {
                        continue;
                    }
                }
            }

            for endp in &svc.endpoints {
                if service_type == COMPUTE {
                    let version = endp.version_id.as_deref().unwrap_or(DEFAULT_VERSION_ID);
                    if !COMPUTE_VERSIONS.contains(&version) {
                        debug!("Ignoring {} endpoint of version {}", service_type, version);
                        continue;
                    }
                }

                if filters.check_region(endp.region.as_deref()) {
                    result.push((svc, endp));
                }
            }
        }
        result
    }

    /// Find the URL of a service.
    ///
    /// Exactly one endpoint must match the filters.
    pub fn url_for(&self, filters: &EndpointFilters, service_type: &str) -> Result<String, Error> {
        let mut found = self.find_endpoints(filters, service_type);
        if found.len() > 1 {
            let regions: Vec<_> = found
                .iter()
                .map(|(svc, endp)| {
                    format!(
                        "{} in region {}",
                        svc.name.as_deref().unwrap_or(service_type),
                        endp.region.as_deref().unwrap_or("<none>")
                    )
                })
                .collect();
            return Err(Error::new(
                ErrorKind::AmbiguousEndpoints,
                format!(
                    "Found more than one endpoint for service {}: {}",
                    service_type,
                    regions.join(", ")
                ),
            ));
        }

        let (svc, endp) = found
            .pop()
            .ok_or_else(|| Error::new_endpoint_not_found(service_type))?;
        match endp.url(filters.interface) {
            Some(url) => {
                debug!(
                    "Using {} endpoint {} of service {:?}",
                    filters.interface, url, svc.name
                );
                Ok(url.to_string())
            }
            None => {
                error!(
                    "Endpoint for service {} in region {:?} has no {}",
                    service_type,
                    endp.region,
                    filters.interface.url_field()
                );
                Err(Error::new_endpoint_not_found(service_type))
            }
        }
    }
}

impl From<Vec<CatalogRecord>> for ServiceCatalog {
    fn from(value: Vec<CatalogRecord>) -> ServiceCatalog {
        ServiceCatalog::new(value)
    }
}
