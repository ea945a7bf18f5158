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

//! Credential redaction and HTTP debug log formatting.
//!
//! The log lines produced here are consumed by existing log scrapers, so their layout (including
//! the JSON separators) is fixed:
//!
//! ```text
//! REQ: curl -g -i '<url>' -X <METHOD> -H "<Header>: <value>" -d '<body>'
//! RESP: [<status>] <headers>
//! RESP BODY: <body>
//! ```

use std::collections::BTreeMap;
use std::io;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Headers whose values are never logged verbatim.
pub const SENSITIVE_HEADERS: &[&str] = &["X-Auth-Token", "X-Auth-Key"];

/// JSON fields that are redacted wherever they appear in a body.
const SENSITIVE_FIELDS: &[&str] = &["password"];

/// Path to the token ID in an identity response.
const TOKEN_ID_PATH: &[&str] = &["access", "token", "id"];

/// Request headers as they are logged: sorted by name, `None` for absent values.
pub type LoggedHeaders = BTreeMap<String, Option<String>>;

/// A one-way fingerprint of a secret value.
///
/// The result looks like `{SHA1}<hex digest>`, which is stable across runs and thus usable to
/// correlate requests made with the same credentials.
pub fn fingerprint(value: &str) -> String {
    format!("{{SHA1}}{}", hex::encode(Sha1::digest(value.as_bytes())))
}

/// Render a header value for logging, hashing sensitive ones.
///
/// Absent values are rendered as `None` and are never hashed.
pub fn safe_header(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) if SENSITIVE_HEADERS.contains(&name) => fingerprint(value),
        Some(value) => value.to_string(),
        None => "None".to_string(),
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = fingerprint(s),
        Value::Null => (),
        other => *other = Value::String(fingerprint(&other.to_string())),
    }
}

/// Replace all sensitive fields in a JSON document with their fingerprints.
pub fn redact_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if SENSITIVE_FIELDS.contains(&key.as_str()) {
                    redact_value(item);
                } else {
                    redact_fields(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_fields),
        _ => (),
    }
}

/// Replace the value at the given path (if present).
fn redact_path(value: &mut Value, path: &[&str]) {
    let mut target = value;
    for key in path {
        match target.get_mut(*key) {
            Some(next) => target = next,
            None => return,
        }
    }
    redact_value(target);
}

/// JSON formatter producing the `", "` and `": "` separators and ASCII-only output.
#[derive(Debug, Clone, Copy, Default)]
struct LogFormatter;

impl Formatter for LogFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize JSON in the log layout.
pub fn to_log_json(value: &Value) -> String {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, LogFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(_) => "null".to_string(),
    }
}

/// Format the `REQ:` debug line for a request.
pub fn format_request(
    method: &Method,
    url: &str,
    headers: &LoggedHeaders,
    body: Option<&Value>,
    insecure: bool,
) -> String {
    let mut parts = vec!["curl -g -i".to_string()];
    if insecure {
        parts.push(" --insecure".to_string());
    }
    parts.push(format!(" '{}'", url));
    parts.push(format!(" -X {}", method));

    for (name, value) in headers {
        parts.push(format!(
            " -H \"{}: {}\"",
            name,
            safe_header(name, value.as_deref())
        ));
    }

    if let Some(body) = body {
        let mut data = body.clone();
        redact_fields(&mut data);
        parts.push(format!(" -d '{}'", to_log_json(&data)));
    }

    format!("REQ: {}", parts.concat())
}

/// Format response headers as a `{'name': 'value', ...}` mapping.
fn format_headers(headers: &HeaderMap) -> String {
    let items: Vec<String> = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes());
            let value = if SENSITIVE_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name.as_str()))
            {
                fingerprint(&value)
            } else {
                value.into_owned()
            };
            format!("'{}': '{}'", name, value)
        })
        .collect();
    format!("{{{}}}", items.join(", "))
}

/// Format the `RESP:` and `RESP BODY:` debug lines for a response.
///
/// The body is only shown when it is valid JSON and the status is not 400 (bad request bodies
/// may echo the submitted credentials back).
pub fn format_response(status: StatusCode, headers: &HeaderMap, text: &str) -> (String, String) {
    let body = if text.is_empty() || status == StatusCode::BAD_REQUEST {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(text) {
            Ok(mut value) => {
                redact_path(&mut value, TOKEN_ID_PATH);
                redact_fields(&mut value);
                value
            }
            Err(_) => Value::Null,
        }
    };

    (
        format!("RESP: [{}] {}", status.as_u16(), format_headers(headers)),
        format!("RESP BODY: {}", to_log_json(&body)),
    )
}
