//! C3 — Route Table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::method::MethodMask;
use crate::middleware::{MiddlewareEntry, MiddlewareId};
use crate::pattern::Pattern;
use crate::request::CoreRequest;
use crate::response::CoreResponse;

type HandlerFuture = Pin<Box<dyn Future<Output = CoreResponse> + Send>>;

/// `{handle(request, context) -> response}` for a matched route.
pub type Handler = Arc<dyn Fn(CoreRequest) -> HandlerFuture + Send + Sync>;

/// Immutable-after-registration route (spec.md §3).
pub struct Route {
    pub method_mask: MethodMask,
    pub pattern: Pattern,
    pub name: Option<String>,
    pub handler: Handler,
    pub middlewares: Vec<Arc<MiddlewareEntry>>,
    pub bypass: Vec<MiddlewareId>,
    pub log_output: bool,
    pub cors_enabled: bool,
}

impl Route {
    pub fn new(method_mask: MethodMask, pattern: Pattern, handler: Handler) -> Self {
        Route {
            method_mask,
            pattern,
            name: None,
            handler,
            middlewares: Vec::new(),
            bypass: Vec::new(),
            log_output: true,
            cors_enabled: false,
        }
    }
}

/// The result of [`RouteTable::lookup`] (spec.md §4.3).
pub enum LookupOutcome<'a> {
    /// No route matched the path at all.
    NotMatched,
    /// Some route matched the path, but none accepted the method.
    PathMatched,
    /// A route matched the path and has a non-`ANY` mask; the request is
    /// `OPTIONS`, so matching halts here (spec.md §4.3).
    OptionsMatched(&'a Arc<Route>),
    /// Full match: path and method both accepted.
    Matched(&'a Arc<Route>, HashMap<String, String>),
}

/// Ordered set of routes plus a name index (spec.md §4.3).
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    names: HashMap<String, usize>,
    case_sensitive: bool,
    treat_head_as_get: bool,
}

impl RouteTable {
    pub fn new(case_sensitive: bool, treat_head_as_get: bool) -> Self {
        RouteTable {
            routes: Vec::new(),
            names: HashMap::new(),
            case_sensitive,
            treat_head_as_get,
        }
    }

    /// Registers `route`, rejecting non-absolute paths and, for
    /// template-mode routes, colliding patterns under overlapping method
    /// masks (spec.md §4.3; the stronger, symmetric check per
    /// SPEC_FULL.md §9 open question 4).
    pub fn register(&mut self, route: Route) -> Result<Arc<Route>, ConfigError> {
        if !route.pattern.source().starts_with('/') {
            return Err(ConfigError::PathMustBeAbsolute(route.pattern.source().to_string()));
        }

        if let crate::pattern::Pattern::Template(new_template) = &route.pattern {
            for existing in &self.routes {
                if let crate::pattern::Pattern::Template(existing_template) = &existing.pattern {
                    if existing.method_mask.overlaps(route.method_mask)
                        && existing_template.structurally_overlaps(new_template)
                    {
                        return Err(ConfigError::RouteCollision {
                            existing: existing.pattern.source().to_string(),
                            new: route.pattern.source().to_string(),
                        });
                    }
                }
            }
        }

        let arc = Arc::new(route);
        if let Some(name) = &arc.name {
            self.names.insert(name.clone(), self.routes.len());
        }
        self.routes.push(arc.clone());
        Ok(arc)
    }

    /// Finds the first route matching `(method, path)` (spec.md §4.3).
    pub fn lookup(&self, method: &axum::http::Method, path: &str) -> LookupOutcome<'_> {
        let request_mask = MethodMask::from_http_method(method);
        let mut path_matched_any = false;

        for route in &self.routes {
            let (path_ok, params) = route.pattern.matches(path);
            if !path_ok {
                continue;
            }
            path_matched_any = true;

            if route.method_mask.contains(MethodMask::ANY) {
                return LookupOutcome::Matched(route, params);
            }

            if method == axum::http::Method::OPTIONS {
                return LookupOutcome::OptionsMatched(route);
            }

            if method == axum::http::Method::HEAD
                && route.method_mask.contains(MethodMask::GET)
                && self.treat_head_as_get
            {
                return LookupOutcome::Matched(route, params);
            }

            if let Some(mask) = request_mask {
                if route.method_mask.contains(mask) {
                    return LookupOutcome::Matched(route, params);
                }
            }
        }

        if path_matched_any {
            LookupOutcome::PathMatched
        } else {
            LookupOutcome::NotMatched
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        self.names.get(name).and_then(|idx| self.routes.get(*idx))
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Finalizes the HEAD-as-GET flag after all routes have been
    /// registered (the builder only knows the host-wide setting once
    /// `build()` runs).
    pub fn set_treat_head_as_get(&mut self, enabled: bool) {
        self.treat_head_as_get = enabled;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::CoreResponse;

    fn handler() -> Handler {
        Arc::new(|_req| Box::pin(async { CoreResponse::ok("ok") }))
    }

    fn route(mask: MethodMask, pattern: &str) -> Route {
        Route::new(mask, Pattern::compile_template(pattern, true).unwrap(), handler())
    }

    #[test]
    fn register_rejects_relative_paths() {
        let mut table = RouteTable::new(true, false);
        let err = table.register(route(MethodMask::GET, "users")).unwrap_err();
        assert!(matches!(err, ConfigError::PathMustBeAbsolute(_)));
    }

    #[test]
    fn register_detects_overlapping_template_collision() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/users/<id>")).unwrap();
        let err = table.register(route(MethodMask::GET, "/users/42")).unwrap_err();
        assert!(matches!(err, ConfigError::RouteCollision { .. }));
    }

    #[test]
    fn register_allows_disjoint_methods_on_same_path() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/users/<id>")).unwrap();
        assert!(table.register(route(MethodMask::POST, "/users/<id>")).is_ok());
    }

    #[test]
    fn register_detects_any_registered_after_typed_route() {
        // Open question #4: the stronger check must catch this, unlike the source.
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/users/<id>")).unwrap();
        let err = table.register(route(MethodMask::ANY, "/users/<id>")).unwrap_err();
        assert!(matches!(err, ConfigError::RouteCollision { .. }));
    }

    #[test]
    fn lookup_distinguishes_not_matched_from_path_matched() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::POST, "/api/items")).unwrap();
        assert!(matches!(table.lookup(&axum::http::Method::GET, "/other"), LookupOutcome::NotMatched));
        assert!(matches!(table.lookup(&axum::http::Method::GET, "/api/items"), LookupOutcome::PathMatched));
    }

    #[test]
    fn lookup_options_short_circuits_before_method_check() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/anything")).unwrap();
        assert!(matches!(
            table.lookup(&axum::http::Method::OPTIONS, "/anything"),
            LookupOutcome::OptionsMatched(_)
        ));
    }

    #[test]
    fn lookup_any_mask_matches_options_too() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::ANY, "/anything")).unwrap();
        assert!(matches!(
            table.lookup(&axum::http::Method::OPTIONS, "/anything"),
            LookupOutcome::Matched(_, _)
        ));
    }

    #[test]
    fn lookup_head_as_get_flag() {
        let mut table = RouteTable::new(true, true);
        table.register(route(MethodMask::GET, "/x")).unwrap();
        assert!(matches!(table.lookup(&axum::http::Method::HEAD, "/x"), LookupOutcome::Matched(_, _)));

        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/x")).unwrap();
        assert!(matches!(table.lookup(&axum::http::Method::HEAD, "/x"), LookupOutcome::PathMatched));
    }

    #[test]
    fn lookup_extracts_params_on_match() {
        let mut table = RouteTable::new(true, false);
        table.register(route(MethodMask::GET, "/users/<id>/profile")).unwrap();
        match table.lookup(&axum::http::Method::GET, "/users/42/profile") {
            LookupOutcome::Matched(_, params) => assert_eq!(params.get("id").unwrap(), "42"),
            _ => panic!("expected a match"),
        }
    }
}
