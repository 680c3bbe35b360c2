//! URL construction helpers.

use crate::{Result, UpstreamError};
use serde::Serialize;

/// Build `scheme://host/path`.
pub fn construct_url(scheme: &str, host: &str, path: &str) -> String {
    format!("{}://{}{}", scheme, host, path)
}

/// Build `scheme://host/path?query`, encoding `params` as a query string.
///
/// `params` must serialize to a flat map or sequence of pairs.
pub fn construct_query_url<T>(scheme: &str, host: &str, path: &str, params: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let query = serde_urlencoded::to_string(params)
        .map_err(|e| UpstreamError::RequestBuild(format!("query string: {}", e)))?;
    if query.is_empty() {
        return Ok(construct_url(scheme, host, path));
    }
    Ok(format!("{}?{}", construct_url(scheme, host, path), query))
}
