//! Header names and header conversion helpers.
//!
//! Inbound headers are flattened into a `name -> value` map (last value
//! wins) for the engine; the map is expanded back into a `HeaderMap` when
//! the request goes out to the router.

use std::collections::HashMap;

use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};

use super::ProxyError;

// NDM authentication headers sent by the router with a 401 probe answer
pub static X_NDM_REALM: HeaderName = HeaderName::from_static("x-ndm-realm");
pub static X_NDM_CHALLENGE: HeaderName = HeaderName::from_static("x-ndm-challenge");

/// Decode inbound headers into UTF-8 name/value pairs.
pub fn headers_to_map(headers: &HeaderMap) -> Result<HashMap<String, String>, ProxyError> {
    let mut map = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers.iter() {
        let value = std::str::from_utf8(value.as_bytes())
            .map_err(|_| ProxyError::InvalidHeader(name.as_str().to_string()))?;
        map.insert(name.as_str().to_string(), value.to_string());
    }
    Ok(map)
}

/// Build outbound router headers.
///
/// Every client header goes out unchanged except `host`, which is skipped:
/// the client addressed the proxy, so the transport sets the router's own
/// host from the router URL.
pub fn map_to_headers(map: &HashMap<String, String>) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::with_capacity(map.len());
    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::InvalidHeader(name.clone()))?;
        if header_name == HOST {
            continue;
        }
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| ProxyError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
