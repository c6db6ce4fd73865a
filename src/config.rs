//! C0 — Configuration layer (ambient, SPEC_FULL.md §4.9): process-wide
//! knobs and per-host builders, grounded on `cobalto::settings::Settings`.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::dispatcher::ExecutionResult;
use crate::error::ConfigError;
use crate::host::{CorsPolicy, ListeningHost, ListeningPort};
use crate::method::MethodMask;
use crate::middleware::{ErrorHook, MiddlewareEntry, MiddlewareFn, Phase};
use crate::pattern::Pattern;
use crate::route::{Handler, Route, RouteTable};

/// Process-wide knobs spec.md §6/§7/§9 calls out as ambient state, kept as
/// plain fields on a value rather than process singletons.
pub struct ServerConfig {
    pub hosts: Vec<ListeningHost>,
    pub powered_by: Option<String>,
    pub send_request_id_header: bool,
    pub throw_exceptions: bool,
    pub error_hook: ErrorHook,
    events: broadcast::Sender<ExecutionResult>,
}

impl ServerConfig {
    pub fn new(hosts: Vec<ListeningHost>) -> Self {
        let (events, _) = broadcast::channel(128);
        ServerConfig {
            hosts,
            powered_by: None,
            send_request_id_header: false,
            throw_exceptions: false,
            error_hook: Arc::new(|_, _| None),
            events,
        }
    }

    /// Subscribes to per-request [`ExecutionResult`]s (spec.md §4.5 step 18).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionResult> {
        self.events.subscribe()
    }

    pub(crate) fn emit_event(&self, result: ExecutionResult) {
        let _ = self.events.send(result);
    }

    pub fn powered_by(mut self, banner: impl Into<String>) -> Self {
        self.powered_by = Some(banner.into());
        self
    }

    pub fn send_request_id_header(mut self, enabled: bool) -> Self {
        self.send_request_id_header = enabled;
        self
    }

    pub fn throw_exceptions(mut self, enabled: bool) -> Self {
        self.throw_exceptions = enabled;
        self
    }

    pub fn error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = hook;
        self
    }
}

/// Builder for a single [`ListeningHost`]: ports, routes, middleware, and
/// the per-host behavior flags spec.md §3 describes.
pub struct HostConfig {
    label: String,
    ports: Vec<ListeningPort>,
    routes: RouteTable,
    global_middlewares: Vec<Arc<MiddlewareEntry>>,
    cors: Option<CorsPolicy>,
    case_sensitive: bool,
    treat_head_as_get: bool,
    force_trailing_slash: bool,
    trust_x_forwarded_for: bool,
    trust_x_forwarded_host: bool,
    re_decode_headers_as_body_encoding: bool,
    reject_body_on_semantic_free_methods: bool,
    max_content_length: Option<u64>,
    culture: Option<String>,
}

impl HostConfig {
    pub fn new(label: impl Into<String>) -> Self {
        HostConfig {
            label: label.into(),
            ports: Vec::new(),
            routes: RouteTable::new(true, false),
            global_middlewares: Vec::new(),
            cors: None,
            case_sensitive: true,
            treat_head_as_get: false,
            force_trailing_slash: false,
            trust_x_forwarded_for: false,
            trust_x_forwarded_host: false,
            re_decode_headers_as_body_encoding: false,
            reject_body_on_semantic_free_methods: false,
            max_content_length: None,
            culture: None,
        }
    }

    pub fn listen(mut self, port_url: &str) -> Result<Self, ConfigError> {
        self.ports.push(ListeningPort::parse(port_url)?);
        Ok(self)
    }

    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    pub fn treat_head_as_get(mut self, enabled: bool) -> Self {
        self.treat_head_as_get = enabled;
        self
    }

    pub fn force_trailing_slash(mut self, enabled: bool) -> Self {
        self.force_trailing_slash = enabled;
        self
    }

    pub fn trust_x_forwarded_for(mut self, enabled: bool) -> Self {
        self.trust_x_forwarded_for = enabled;
        self
    }

    pub fn trust_x_forwarded_host(mut self, enabled: bool) -> Self {
        self.trust_x_forwarded_host = enabled;
        self
    }

    pub fn re_decode_headers_as_body_encoding(mut self, enabled: bool) -> Self {
        self.re_decode_headers_as_body_encoding = enabled;
        self
    }

    pub fn reject_body_on_semantic_free_methods(mut self, enabled: bool) -> Self {
        self.reject_body_on_semantic_free_methods = enabled;
        self
    }

    pub fn max_content_length(mut self, bytes: u64) -> Self {
        self.max_content_length = Some(bytes);
        self
    }

    pub fn culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Registers a template- or regex-mode route depending on `pattern`.
    pub fn add_route(
        mut self,
        method_mask: MethodMask,
        pattern: &str,
        handler: Handler,
    ) -> Result<Self, ConfigError> {
        let compiled = Pattern::compile_template(pattern, self.case_sensitive)?;
        self.routes.register(Route::new(method_mask, compiled, handler))?;
        Ok(self)
    }

    pub fn add_regex_route(
        mut self,
        method_mask: MethodMask,
        pattern: &str,
        handler: Handler,
    ) -> Result<Self, ConfigError> {
        let compiled = Pattern::compile_regex(pattern, self.case_sensitive)?;
        self.routes.register(Route::new(method_mask, compiled, handler))?;
        Ok(self)
    }

    /// Registers a host-wide middleware (phase-tagged, run before any
    /// route-local middleware of the same phase).
    pub fn add_middleware(mut self, phase: Phase, func: MiddlewareFn) -> Self {
        self.global_middlewares.push(MiddlewareEntry::new(phase, func));
        self
    }

    pub fn add_named_middleware(mut self, phase: Phase, name: impl Into<String>, func: MiddlewareFn) -> Self {
        self.global_middlewares.push(MiddlewareEntry::named(phase, name, func));
        self
    }

    pub fn build(self) -> ListeningHost {
        let mut routes = self.routes;
        routes.set_treat_head_as_get(self.treat_head_as_get);
        ListeningHost {
            label: self.label,
            ports: self.ports,
            cors: self.cors,
            routes,
            global_middlewares: self.global_middlewares,
            case_sensitive: self.case_sensitive,
            treat_head_as_get: self.treat_head_as_get,
            force_trailing_slash: self.force_trailing_slash,
            trust_x_forwarded_for: self.trust_x_forwarded_for,
            trust_x_forwarded_host: self.trust_x_forwarded_host,
            re_decode_headers_as_body_encoding: self.re_decode_headers_as_body_encoding,
            reject_body_on_semantic_free_methods: self.reject_body_on_semantic_free_methods,
            max_content_length: self.max_content_length,
            culture: self.culture,
        }
    }
}
