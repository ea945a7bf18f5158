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

//! Handy primitives for working with URLs.

use url::Url;

use super::Error;

/// Whether a path segment is a version marker: `v<major>` or `v<major>.<minor>`.
///
/// The major version must not start with zero, the minor version may have any number of digits.
pub fn is_version_segment(segment: &str) -> bool {
    let rest = match segment.strip_prefix('v') {
        Some(rest) => rest,
        None => return false,
    };
    let (major, minor) = match rest.split_once('.') {
        Some((major, minor)) => (major, Some(minor)),
        None => (rest, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(major) && !major.starts_with('0') && minor.map_or(true, all_digits)
}

/// Whether the URL path contains a version segment.
pub fn has_version_segment(url: &Url) -> bool {
    url.path_segments()
        .map_or(false, |mut segments| segments.any(is_version_segment))
}

/// Find the URL of the version discovery document for a base URL.
///
/// If the path has a version segment, the document lives next to it, so the version segment and
/// everything after it are removed. Otherwise the root of the host is used.
pub fn discovery_root(base: &str) -> Result<String, Error> {
    let mut url = Url::parse(base)?;
    url.set_query(None);
    url.set_fragment(None);

    let kept: Vec<String> = match url.path_segments() {
        Some(segments) => {
            let segments: Vec<&str> = segments.collect();
            match segments.iter().rposition(|s| is_version_segment(s)) {
                Some(pos) => segments[..pos]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect(),
                None => Vec::new(),
            }
        }
        None => Vec::new(),
    };

    if kept.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&format!("/{}/", kept.join("/")));
    }
    Ok(url.to_string())
}

/// Join a base URL and a relative path without duplicating slashes.
pub fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// The `scheme://host` prefix of a URL, as used for binding transports.
pub fn service_url(url: &Url) -> String {
    match url.host_str() {
        Some(host) => match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        },
        None => format!("{}://", url.scheme()),
    }
}

/// Normalized `scheme://host:port` key identifying a remote server.
pub fn pool_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Strip trailing slashes from a configured URL.
#[inline]
pub fn normalize<S: AsRef<str>>(value: S) -> String {
    value.as_ref().trim_end_matches('/').to_string()
}
