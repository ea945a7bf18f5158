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

//! Client configuration: options, `OS_*` environment variables and `clouds.yaml`.

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use serde::de::Error as DeserError;
use serde::{Deserialize, Deserializer};

use super::endpointfilters::{EndpointFilters, InterfaceType};
use super::factory::{self, Client};
use super::identity::Credentials;
use super::pool::TransportOptions;
use super::{Error, ErrorKind, VersionRequest};

const DEFAULT_SERVICE_TYPE: &str = "compute";
const DEFAULT_API_VERSION: &str = "2";

/// Options of the compute client that are not credentials.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Service type to look up in the catalog.
    pub service_type: String,
    /// Service name to look up in the catalog.
    pub service_name: Option<String>,
    /// Region to look up in the catalog.
    pub region: Option<String>,
    /// Endpoint interface to use.
    pub interface: InterfaceType,
    /// Timeout of every HTTP request (in seconds when deserialized).
    #[serde(deserialize_with = "deser_timeout")]
    pub timeout: Option<Duration>,
    /// Reuse keep-alive connections per remote server.
    pub connection_pool: bool,
    /// Record the duration of every request.
    pub timings: bool,
    /// Share tokens between clients through a token cache.
    pub os_cache: bool,
    /// Log requests and responses at the debug level.
    pub http_log_debug: bool,
    /// Do not verify TLS certificates.
    pub insecure: bool,
    /// Path to an additional CA certificate.
    pub cacert: Option<String>,
}

/// Full configuration required to build a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credentials for the identity service.
    pub credentials: Credentials,
    /// Client options.
    pub options: ClientOptions,
    /// Requested compute API version.
    pub version: VersionRequest,
}

fn deser_timeout<'de, D>(des: D) -> ::std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(des)?
        .map(|secs| parse_timeout(secs).map_err(D::Error::custom))
        .transpose()
}

fn parse_timeout(secs: f64) -> Result<Duration, Error> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::new(
            ErrorKind::InvalidConfig,
            format!("Timeout must be a positive number of seconds, got {}", secs),
        ))
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            service_name: None,
            region: None,
            interface: InterfaceType::default(),
            timeout: None,
            connection_pool: false,
            timings: false,
            os_cache: false,
            http_log_debug: false,
            insecure: false,
            cacert: None,
        }
    }
}

impl ClientOptions {
    /// Set the catalog service type.
    pub fn with_service_type<S: Into<String>>(mut self, value: S) -> Self {
        self.service_type = value.into();
        self
    }

    /// Set the catalog service name.
    pub fn with_service_name<S: Into<String>>(mut self, value: S) -> Self {
        self.service_name = Some(value.into());
        self
    }

    /// Set the region.
    pub fn with_region<S: Into<String>>(mut self, value: S) -> Self {
        self.region = Some(value.into());
        self
    }

    /// Set the endpoint interface.
    pub fn with_interface(mut self, value: InterfaceType) -> Self {
        self.interface = value;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    /// Enable or disable the connection pool.
    pub fn with_connection_pool(mut self, value: bool) -> Self {
        self.connection_pool = value;
        self
    }

    /// Enable or disable request timings.
    pub fn with_timings(mut self, value: bool) -> Self {
        self.timings = value;
        self
    }

    /// Enable or disable the token cache.
    pub fn with_os_cache(mut self, value: bool) -> Self {
        self.os_cache = value;
        self
    }

    /// Disable or enable the token cache, the inverse of [with_os_cache](Self::with_os_cache).
    pub fn with_no_cache(self, value: bool) -> Self {
        self.with_os_cache(!value)
    }

    /// Enable or disable request and response logging.
    pub fn with_http_log_debug(mut self, value: bool) -> Self {
        self.http_log_debug = value;
        self
    }

    /// Disable TLS verification.
    pub fn with_insecure(mut self, value: bool) -> Self {
        self.insecure = value;
        self
    }

    /// Add a CA certificate.
    pub fn with_cacert<S: Into<String>>(mut self, value: S) -> Self {
        self.cacert = Some(value.into());
        self
    }

    /// Catalog filters built from these options.
    pub fn endpoint_filters(&self) -> EndpointFilters {
        let mut filters = EndpointFilters::default().with_interface(self.interface);
        if let Some(ref region) = self.region {
            filters.set_region(region.clone());
        }
        if let Some(ref service_name) = self.service_name {
            filters.set_service_name(service_name.clone());
        }
        filters
    }

    /// Transport settings built from these options.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            insecure: self.insecure,
            cacert: self.cacert.clone(),
        }
    }
}

// This is only used for unit testing.
trait Environment {
    fn get(&self, name: &'static str) -> Option<String>;

    fn require(&self, name: &'static str) -> Result<String, Error> {
        self.get(name).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("Required environment variable {} is not provided", name),
            )
        })
    }

    fn first_of(&self, names: &[&'static str]) -> Option<String> {
        names.iter().find_map(|&name| self.get(name))
    }
}

#[derive(Debug, Clone, Copy)]
struct RealEnvironment;

impl Environment for RealEnvironment {
    fn get(&self, name: &'static str) -> Option<String> {
        env::var(name).ok().filter(|value| !value.is_empty())
    }
}

fn config_from_env<E: Environment>(env: &E) -> Result<ClientConfig, Error> {
    if let Some(cloud_name) = env.get("OS_CLOUD") {
        return ClientConfig::from_config(cloud_name);
    }

    let mut credentials = Credentials::new();
    if let Some(value) = env.get("OS_USERNAME") {
        credentials = credentials.with_user(value);
    }
    if let Some(value) = env.get("OS_USER_ID") {
        credentials = credentials.with_user_id(value);
    }
    if let Some(value) = env.get("OS_PASSWORD") {
        credentials = credentials.with_password(value);
    }
    if let Some(value) = env.first_of(&["OS_PROJECT_NAME", "OS_TENANT_NAME"]) {
        credentials = credentials.with_project_id(value);
    }
    if let Some(value) = env.first_of(&["OS_PROJECT_ID", "OS_TENANT_ID"]) {
        credentials = credentials.with_tenant_id(value);
    }
    if let Some(value) = env.get("OS_USER_DOMAIN_NAME") {
        credentials = credentials.with_domain(value);
    }
    if let Some(value) = env.get("OS_AUTH_TOKEN") {
        credentials = credentials.with_auth_token(value);
    }
    if let Some(value) = env.first_of(&["OS_COMPUTE_URL", "NOVACLIENT_BYPASS_URL"]) {
        credentials = credentials.with_bypass_url(value);
    }

    if credentials.auth_token().is_some() && credentials.bypass_url().is_some() {
        if let Some(value) = env.get("OS_AUTH_URL") {
            credentials = credentials.with_auth_url(value);
        }
    } else {
        credentials = credentials.with_auth_url(env.require("OS_AUTH_URL")?);
        if credentials.auth_token().is_none() {
            if credentials.user().is_none() && credentials.user_id().is_none() {
                let _ = env.require("OS_USERNAME")?;
            }
            let _ = env.require("OS_PASSWORD")?;
        }
    }

    let mut options = ClientOptions::default();
    if let Some(value) = env.get("OS_REGION_NAME") {
        options.region = Some(value);
    }
    if let Some(value) = env.first_of(&["OS_INTERFACE", "NOVA_ENDPOINT_TYPE"]) {
        options.interface = InterfaceType::from_str(&value)?;
    }
    if let Some(value) = env.get("NOVA_SERVICE_NAME") {
        options.service_name = Some(value);
    }
    if let Some(value) = env.get("OS_CACERT") {
        options.cacert = Some(value);
    }
    options.insecure = env.get("NOVACLIENT_INSECURE").map_or(false, |v| parse_bool(&v));
    options.http_log_debug = env.get("NOVACLIENT_DEBUG").map_or(false, |v| parse_bool(&v));
    options.os_cache = env.get("OS_CACHE").map_or(false, |v| parse_bool(&v));

    let version = env
        .get("OS_COMPUTE_API_VERSION")
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

    Ok(ClientConfig {
        credentials,
        options,
        version: VersionRequest::from_str(&version)?,
    })
}

#[derive(Debug, Default, Deserialize)]
struct CloudAuth {
    #[serde(default)]
    auth_url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "tenant_name")]
    project_name: Option<String>,
    #[serde(default, alias = "tenant_id")]
    project_id: Option<String>,
    #[serde(default)]
    user_domain_name: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cloud {
    #[serde(default)]
    auth: Option<CloudAuth>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    interface: Option<InterfaceType>,
    #[serde(default)]
    cacert: Option<String>,
    #[serde(default)]
    verify: Option<bool>,
    #[serde(default)]
    api_timeout: Option<f64>,
    #[serde(default)]
    compute_api_version: Option<VersionRequest>,
    #[serde(default)]
    compute_endpoint_override: Option<String>,
    #[serde(default)]
    compute_service_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Root {
    clouds: HashMap<String, Cloud>,
}

fn find_config<S: AsRef<str>>(filename: S) -> Option<PathBuf> {
    let filename = filename.as_ref();
    let current = Path::new(filename);
    if current.is_file() {
        match current.canonicalize() {
            Ok(val) => return Some(val),
            Err(e) => warn!("Cannot canonicalize {:?}: {}", current, e),
        }
    }

    if let Some(mut home) = dirs::home_dir() {
        home.push(format!(".config/openstack/{}", filename));
        if home.is_file() {
            return Some(home);
        }
    } else {
        warn!("Cannot find home directory");
    }

    let abs = PathBuf::from(format!("/etc/openstack/{}", filename));
    if abs.is_file() {
        Some(abs)
    } else {
        None
    }
}

fn load_yaml(path: &Path) -> Result<serde_yaml::Mapping, Error> {
    let content = File::open(path).map_err(|e| {
        Error::new(
            ErrorKind::InvalidConfig,
            format!("Cannot read {}: {}", path.display(), e),
        )
    })?;

    match serde_yaml::from_reader(content).map_err(|e| {
        Error::new(
            ErrorKind::InvalidConfig,
            format!("Cannot parse {}: {}", path.display(), e),
        )
    })? {
        serde_yaml::Value::Mapping(mapping) => Ok(mapping),
        other => Err(Error::new(
            ErrorKind::InvalidConfig,
            format!("Root of {} is {:?}, not a mapping", path.display(), other),
        )),
    }
}

/// Recursively copy values from `src` into `dest`, overriding existing scalars.
fn merge_yaml(src: serde_yaml::Mapping, dest: &mut serde_yaml::Mapping) {
    for (key, value) in src {
        match (dest.get_mut(&key), value) {
            (Some(serde_yaml::Value::Mapping(existing)), serde_yaml::Value::Mapping(nested)) => {
                merge_yaml(nested, existing)
            }
            (_, value) => {
                let _ = dest.insert(key, value);
            }
        }
    }
}

fn config_from_cloud(name: &str, cloud: Cloud) -> Result<ClientConfig, Error> {
    let auth = cloud.auth.unwrap_or_default();
    let mut credentials = Credentials::new();
    if let Some(value) = auth.username {
        credentials = credentials.with_user(value);
    }
    if let Some(value) = auth.user_id {
        credentials = credentials.with_user_id(value);
    }
    if let Some(value) = auth.password {
        credentials = credentials.with_password(value);
    }
    if let Some(value) = auth.project_name {
        credentials = credentials.with_project_id(value);
    }
    if let Some(value) = auth.project_id {
        credentials = credentials.with_tenant_id(value);
    }
    if let Some(value) = auth.user_domain_name {
        credentials = credentials.with_domain(value);
    }
    if let Some(value) = auth.token {
        credentials = credentials.with_auth_token(value);
    }
    if let Some(value) = cloud.compute_endpoint_override {
        credentials = credentials.with_bypass_url(value);
    }
    if let Some(value) = auth.auth_url {
        credentials = credentials.with_auth_url(value);
    } else if credentials.auth_token().is_none() || credentials.bypass_url().is_none() {
        return Err(Error::new(
            ErrorKind::InvalidConfig,
            format!("Cloud {} requires an auth_url", name),
        ));
    }

    let mut options = ClientOptions {
        region: cloud.region_name,
        service_name: cloud.compute_service_name,
        cacert: cloud.cacert,
        insecure: cloud.verify.map_or(false, |verify| !verify),
        ..ClientOptions::default()
    };
    if let Some(interface) = cloud.interface {
        options.interface = interface;
    }
    if let Some(secs) = cloud.api_timeout {
        options.timeout = Some(parse_timeout(secs)?);
    }

    Ok(ClientConfig {
        credentials,
        options,
        version: cloud
            .compute_api_version
            .unwrap_or(VersionRequest::Exact(super::ApiVersion(2, 0))),
    })
}

fn config_from_files(
    name: &str,
    mut clouds: serde_yaml::Mapping,
    secure: Option<serde_yaml::Mapping>,
) -> Result<ClientConfig, Error> {
    if let Some(secure) = secure {
        merge_yaml(secure, &mut clouds);
    }

    let mut root: Root =
        serde_yaml::from_value(serde_yaml::Value::Mapping(clouds)).map_err(|e| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("Cannot parse the cloud configuration: {}", e),
            )
        })?;

    let cloud = root
        .clouds
        .remove(name)
        .ok_or_else(|| Error::new(ErrorKind::InvalidConfig, format!("No such cloud: {}", name)))?;
    config_from_cloud(name, cloud)
}

impl ClientConfig {
    /// Create a configuration with default options and API version 2.
    pub fn new(credentials: Credentials) -> ClientConfig {
        ClientConfig {
            credentials,
            options: ClientOptions::default(),
            version: VersionRequest::Exact(super::ApiVersion(2, 0)),
        }
    }

    /// Load the configuration from `OS_*` environment variables.
    ///
    /// If `OS_CLOUD` is set, the named cloud is loaded from `clouds.yaml` instead.
    pub fn from_env() -> Result<ClientConfig, Error> {
        config_from_env(&RealEnvironment)
    }

    /// Load the configuration of a cloud from `clouds.yaml`.
    ///
    /// The file is searched in the current directory, `~/.config/openstack` and
    /// `/etc/openstack`. Values from `secure.yaml` in the same locations override it.
    pub fn from_config<S: AsRef<str>>(cloud_name: S) -> Result<ClientConfig, Error> {
        let path = find_config("clouds.yaml").ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidConfig,
                "clouds.yaml was not found in any location",
            )
        })?;
        debug!("Loading cloud {} from {:?}", cloud_name.as_ref(), path);
        let clouds = load_yaml(&path)?;
        let secure = match find_config("secure.yaml") {
            Some(path) => Some(load_yaml(&path)?),
            None => None,
        };
        config_from_files(cloud_name.as_ref(), clouds, secure)
    }

    /// Load the configuration of a cloud from the given `clouds.yaml` file.
    pub fn from_file<P: AsRef<Path>, S: AsRef<str>>(
        path: P,
        cloud_name: S,
    ) -> Result<ClientConfig, Error> {
        let clouds = load_yaml(path.as_ref())?;
        config_from_files(cloud_name.as_ref(), clouds, None)
    }

    /// Change the options.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Change the requested API version.
    pub fn with_version<V: Into<VersionRequest>>(mut self, version: V) -> Self {
        self.version = version.into();
        self
    }

    /// Build a client from this configuration.
    pub fn into_client(self) -> Result<Client, Error> {
        factory::build(self.version, self.credentials, self.options)
    }
}
