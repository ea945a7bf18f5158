// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
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

//! Asynchronous OpenStack Compute HTTP session.
//!
//! The session authenticates against the Identity service, resolves the compute endpoint from
//! the service catalog and re-authenticates once when the token is rejected.
//!
//! # Usage
//!
//! ```rust,no_run
//! async fn example() -> Result<(), oscompute::Error> {
//!     let mut client = oscompute::ClientConfig::from_env()?.into_client()?;
//!     let servers = client.get("servers").await?;
//!     println!("{:?}", servers.body());
//!     Ok(())
//! }
//! ```

#![crate_name = "oscompute"]
#![crate_type = "lib"]
// NOTE: we do not use generic deny(warnings) to avoid breakages with new
// versions of the compiler. Add more warnings here as you discover them.
// Taken from https://github.com/rust-unofficial/patterns/
#![deny(
    dead_code,
    improper_ctypes,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    trivial_casts,
    trivial_numeric_casts,
    unconditional_recursion,
    unsafe_code,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_doc_comments,
    unused_import_braces,
    unused_parens,
    unused_qualifications,
    unused_results,
    while_true
)]
#![allow(
    clippy::new_ret_no_self,
    clippy::should_implement_trait,
    clippy::wrong_self_convention
)]

mod apiversion;
pub mod cache;
pub mod catalog;
mod client;
mod config;
mod endpointfilters;
mod error;
mod factory;
pub mod identity;
pub mod pool;
pub mod protocol;
pub mod redact;
pub mod sync;
pub mod url;

pub use crate::apiversion::{ApiVersion, VersionRequest};
pub use crate::cache::TokenCache;
pub use crate::catalog::ServiceCatalog;
pub use crate::client::{HttpClient, HttpResponse, RequestTiming, SessionGuard, NO_PATH};
pub use crate::config::{ClientConfig, ClientOptions};
pub use crate::endpointfilters::{EndpointFilters, InterfaceType};
pub use crate::error::{Error, ErrorKind};
pub use crate::factory::{build, variant_for, Client, ClientVariant};
pub use crate::identity::{Credentials, Password};
pub use crate::pool::ConnectionPool;
pub use crate::sync::SyncClient;
