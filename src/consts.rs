/// Current annotation namespace. Every operator setting is read from here
/// first.
pub const ANNOTATION_PREFIX: &'static str = "annogate.io";

/// Annotation namespace used by pre-rename releases of the operator. Still
/// honored on every setting, but `annogate.io` wins when both are set.
pub const LEGACY_ANNOTATION_PREFIX: &'static str = "annogate-gateway";

/// Standard Kubernetes annotation that disables plain HTTP routing for an
/// Ingress. Single fixed namespace, never resolved against our prefixes.
pub const ALLOW_HTTP: &'static str = "kubernetes.io/ingress.allow-http";

/// Opt an Ingress in (or out) of translation. Anything other than "true"
/// leaves the decision to the --skip-by-default flag.
pub const TRANSLATE: &'static str = "translate";

/// Name of the Gateway the generated routes attach to.
pub const GATEWAY_NAME: &'static str = "gateway_name";

/// Namespace of the Gateway the generated routes attach to.
pub const GATEWAY_NAMESPACE: &'static str = "gateway_namespace";

/// Listener section the generated routes bind to.
pub const SECTION_NAME: &'static str = "section_name";

/// This annotation will split ingress rules to a new HTTPRoute for each rule
/// of the ingress. It's usefull because HTTPRoute resource can only have up
/// to 16 rules.
pub const SPLIT_ROUTES: &'static str = "split_routes";

/// Comma separated list of paths that should be routed with websocket
/// support. Read from both namespaces and unioned.
pub const WEBSOCKET_ROUTES: &'static str = "websocket_routes";

/// Retry budget carried onto the generated routes for the downstream
/// gateway. Zero or garbage means "not configured".
pub const NUM_RETRIES: &'static str = "num_retries";

/// Base name of the per-protocol upstream override family, completed with a
/// `.h2`/`.h2c`/`.tls` suffix.
pub const UPSTREAM_PROTOCOL: &'static str = "upstream_protocol";

/// Carry-through annotation on generated routes listing backend protocols
/// as `service:protocol` entries.
pub const BACKEND_PROTOCOL: &'static str = "backend_protocol";

/// Weighted header matcher annotations, `<ns>/header_match.<weight>`.
pub const HEADER_MATCH: &'static str = "header_match";

/// Weighted query matcher annotations, `<ns>/query_match.<weight>`.
pub const QUERY_MATCH: &'static str = "query_match";

/// Field manager used for server-side apply of generated resources.
pub const FIELD_MANAGER: &'static str = "annogate-operator";
