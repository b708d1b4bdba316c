//! URI rewriting helpers shared by the routing step and filters.

use http::uri::{PathAndQuery, Uri};

/// Returns `uri` with its path replaced, keeping scheme, authority and query.
pub(crate) fn replace_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    with_path_and_query(uri, &path_and_query)
}

/// Returns `uri` with `key=value` appended to its query string.
pub(crate) fn append_query(uri: &Uri, key: &str, value: &str) -> Option<Uri> {
    let pair: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish();
    let path_and_query = match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}&{pair}", uri.path()),
        _ => format!("{}?{pair}", uri.path()),
    };
    with_path_and_query(uri, &path_and_query)
}

/// Joins a base path and a request path with exactly one `/` between them.
pub(crate) fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let base = if base.starts_with('/') || base.is_empty() {
        base.to_string()
    } else {
        format!("/{base}")
    };
    format!("{base}/{path}")
}

/// Returns `true` if `path` is `prefix` or lies under it at a segment boundary.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

fn with_path_and_query(uri: &Uri, path_and_query: &str) -> Option<Uri> {
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>().ok()?);
    Uri::from_parts(parts).ok()
}
