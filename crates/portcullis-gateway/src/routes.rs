//! Prefix route table.

use portcullis_config::RouteConfig;
use portcullis_core::{Request, RouteMatcher, RouteTarget};
use portcullis_filters::matches_prefix;

/// Matches requests against configured path prefixes, first match wins.
#[derive(Debug, Clone, Default)]
pub struct PrefixRouteTable {
    routes: Vec<RouteConfig>,
}

impl PrefixRouteTable {
    /// Creates a table from routes in priority order.
    #[must_use]
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the route for `path`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<RouteTarget> {
        let route = self
            .routes
            .iter()
            .find(|route| matches_prefix(path, &route.path_prefix))?;

        let target = RouteTarget::new(&route.id, &route.service_id);
        Some(if route.strip_prefix {
            target.with_strip_prefix(route.path_prefix.trim_end_matches('/'))
        } else {
            target
        })
    }
}

impl RouteMatcher for PrefixRouteTable {
    fn match_route(&self, request: &Request) -> Option<RouteTarget> {
        self.lookup(request.uri().path())
    }
}
