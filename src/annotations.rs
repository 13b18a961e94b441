use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::LazyLock,
};

use gateway_api::{apis::experimental::tcproutes::TCPRoute, httproutes::HTTPRoute};
use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::Resource;

use crate::consts;

/// The two capabilities this module needs from a Kubernetes object: its
/// annotation map and its kind name. Blanket-implemented for every
/// statically typed kube resource, so `Ingress`, `Service` and the
/// generated route types all satisfy the same contract.
pub trait AnnotatedObject {
    fn annotations(&self) -> Option<&BTreeMap<String, String>>;
    fn kind(&self) -> String;
}

impl<K> AnnotatedObject for K
where
    K: Resource<DynamicType = ()>,
{
    fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.meta().annotations.as_ref()
    }

    fn kind(&self) -> String {
        kind_of::<K>()
    }
}

/// Kind name of a statically typed resource, as used to key the policy
/// registry.
pub fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

/// Protocol names recognized on the upstream_protocol annotation family, in
/// resolution order. Later entries win when they claim the same port.
const UPSTREAM_PROTOCOLS: [&str; 3] = ["h2", "h2c", "tls"];

/// Bare annotation names legal per resource kind. Built once before the
/// controller starts watching and never mutated afterwards.
static ANNOTATIONS_BY_KIND: LazyLock<HashMap<String, HashSet<&'static str>>> =
    LazyLock::new(|| {
        HashMap::from([
            (
                kind_of::<Service>(),
                HashSet::from([
                    "upstream_protocol.h2",
                    "upstream_protocol.h2c",
                    "upstream_protocol.tls",
                ]),
            ),
            (
                kind_of::<Ingress>(),
                HashSet::from([
                    consts::TRANSLATE,
                    consts::GATEWAY_NAME,
                    consts::GATEWAY_NAMESPACE,
                    consts::SECTION_NAME,
                    consts::SPLIT_ROUTES,
                    consts::WEBSOCKET_ROUTES,
                    consts::NUM_RETRIES,
                    "ingress.allow-http",
                ]),
            ),
            (
                kind_of::<HTTPRoute>(),
                HashSet::from([
                    consts::WEBSOCKET_ROUTES,
                    consts::BACKEND_PROTOCOL,
                    consts::NUM_RETRIES,
                ]),
            ),
            (
                kind_of::<TCPRoute>(),
                HashSet::from([consts::BACKEND_PROTOCOL]),
            ),
        ])
    });

/// Bare name of an annotation key: the part after the namespace prefix, or
/// the whole key when there is none.
fn annotation_name(key: &str) -> &str {
    key.split_once('/').map_or(key, |(_, name)| name)
}

/// True when the bare name of `key` is registered for at least one kind.
/// Knownness says nothing about which kinds the key is legal on.
pub fn annotation_is_known(key: &str) -> bool {
    let name = annotation_name(key);
    ANNOTATIONS_BY_KIND
        .values()
        .any(|names| names.contains(name))
}

/// True when the bare name of `key` is registered for `kind` specifically.
/// A key that is unknown entirely, or registered for other kinds only, is
/// not valid here.
pub fn valid_annotation_for_kind(kind: &str, key: &str) -> bool {
    ANNOTATIONS_BY_KIND
        .get(kind)
        .is_some_and(|names| names.contains(annotation_name(key)))
}

/// Splits a comma separated annotation value into its trimmed, non-empty
/// entries. Garbage in, empty set out, never an error.
pub fn parse_annotation_set(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses an annotation value as a u32. Empty strings, signs, non-digit
/// characters and values above u32::MAX all collapse to 0; callers treat 0
/// as "not configured".
pub fn parse_uint32(value: &str) -> u32 {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    value.parse().unwrap_or(0)
}

/// Effective value of the annotation `name`, preferring the current
/// namespace over the legacy one. Returns an empty string when neither is
/// set. No parsing happens here.
pub fn compat_annotation(obj: &impl AnnotatedObject, name: &str) -> String {
    let Some(annotations) = obj.annotations() else {
        return String::new();
    };
    annotations
        .get(&format!("{}/{name}", consts::ANNOTATION_PREFIX))
        .or_else(|| annotations.get(&format!("{}/{name}", consts::LEGACY_ANNOTATION_PREFIX)))
        .cloned()
        .unwrap_or_default()
}

/// Reads the `upstream_protocol.{h2,h2c,tls}` annotation family into a map
/// of port name or number to protocol name. Absent or malformed values
/// contribute nothing.
pub fn parse_upstream_protocols(obj: &impl AnnotatedObject) -> BTreeMap<String, String> {
    let mut protocols = BTreeMap::new();
    for proto in UPSTREAM_PROTOCOLS {
        let value = compat_annotation(obj, &format!("{}.{proto}", consts::UPSTREAM_PROTOCOL));
        for port in parse_annotation_set(&value) {
            protocols.insert(port, proto.to_owned());
        }
    }
    protocols
}

/// Paths that should be routed with websocket support. Unlike the single
/// valued settings this merges both namespaces: each key's value is parsed
/// independently and the results are unioned.
pub fn websocket_routes(obj: &impl AnnotatedObject) -> BTreeSet<String> {
    let Some(annotations) = obj.annotations() else {
        return BTreeSet::new();
    };
    let mut routes = BTreeSet::new();
    for prefix in [consts::LEGACY_ANNOTATION_PREFIX, consts::ANNOTATION_PREFIX] {
        if let Some(value) = annotations.get(&format!("{prefix}/{}", consts::WEBSOCKET_ROUTES)) {
            routes.extend(parse_annotation_set(value));
        }
    }
    routes
}

/// Whether plain HTTP routing is allowed for this object. Permissive by
/// default; only the exact value "false" on the standard
/// `kubernetes.io/ingress.allow-http` annotation disables it.
pub fn http_allowed(obj: &impl AnnotatedObject) -> bool {
    obj.annotations()
        .and_then(|annotations| annotations.get(consts::ALLOW_HTTP))
        .map(|value| value != "false")
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;
    use rstest::rstest;

    use super::*;

    fn annotated<K>(annotations: &[(&str, &str)]) -> K
    where
        K: Resource<DynamicType = ()> + Default,
    {
        let mut obj = K::default();
        obj.meta_mut().annotations = Some(
            annotations
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
        obj
    }

    fn to_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn to_set(entries: &[&str]) -> BTreeSet<String> {
        entries.iter().map(|entry| entry.to_string()).collect()
    }

    #[rstest]
    #[case::blank("", 0)]
    #[case::negative("-6", 0)]
    #[case::plus_signed("+6", 0)]
    #[case::explicit("0", 0)]
    #[case::positive("2", 2)]
    #[case::trailing_garbage("10s", 0)]
    #[case::max(&u32::MAX.to_string(), u32::MAX)]
    #[case::one_past_max("4294967296", 0)]
    #[case::too_large("144115188075855872", 0)]
    fn test_parse_uint32(#[case] value: &str, #[case] want: u32) {
        assert_eq!(parse_uint32(value), want);
    }

    #[rstest]
    #[case::empty("", &[])]
    #[case::delimiters_only(", ,", &[])]
    #[case::whitespace_only("  \t ", &[])]
    #[case::single("80", &["80"])]
    #[case::spaces_and_blanks(" /ws1, , /ws2 ", &["/ws1", "/ws2"])]
    #[case::duplicates_collapse("a, b ,a", &["a", "b"])]
    fn test_parse_annotation_set(#[case] value: &str, #[case] want: &[&str]) {
        assert_eq!(parse_annotation_set(value), to_set(want));
    }

    #[rstest]
    #[case::no_annotations(&[], "")]
    #[case::legacy_only(&[("annogate-gateway/annotation", "100")], "100")]
    #[case::current_only(&[("annogate.io/annotation", "200")], "200")]
    #[case::current_takes_precedence(
        &[
            ("annogate-gateway/annotation", "100"),
            ("annogate.io/annotation", "200"),
        ],
        "200"
    )]
    fn test_compat_annotation(#[case] annotations: &[(&str, &str)], #[case] want: &str) {
        let svc: Service = annotated(annotations);
        assert_eq!(compat_annotation(&svc, "annotation"), want);
    }

    #[rstest]
    #[case::nada(&[], &[])]
    #[case::empty(&[("annogate.io/upstream_protocol.h2", "")], &[])]
    #[case::empty_with_spaces(&[("annogate.io/upstream_protocol.h2", ", ,")], &[])]
    #[case::single_value(
        &[("annogate.io/upstream_protocol.h2", "80")],
        &[("80", "h2")]
    )]
    #[case::tls(
        &[("annogate.io/upstream_protocol.tls", "https,80")],
        &[("80", "tls"), ("https", "tls")]
    )]
    #[case::multiple_values(
        &[("annogate.io/upstream_protocol.h2", "80,http,443,https")],
        &[("80", "h2"), ("http", "h2"), ("443", "h2"), ("https", "h2")]
    )]
    #[case::deprecated_multiple_values(
        &[
            ("annogate-gateway/upstream_protocol.h2", "80,http,443,https"),
            ("annogate.io/upstream_protocol.h2c", "8080,http"),
            ("annogate.io/upstream_protocol.tls", "443,https"),
        ],
        &[
            ("80", "h2"),
            ("8080", "h2c"),
            ("http", "h2c"),
            ("443", "tls"),
            ("https", "tls"),
        ]
    )]
    fn test_parse_upstream_protocols(
        #[case] annotations: &[(&str, &str)],
        #[case] want: &[(&str, &str)],
    ) {
        let svc: Service = annotated(annotations);
        assert_eq!(parse_upstream_protocols(&svc), to_map(want));
    }

    #[rstest]
    #[case::empty(&[("annogate.io/websocket_routes", "")], &[])]
    #[case::empty_with_spaces(&[("annogate.io/websocket_routes", ", ,")], &[])]
    #[case::single_value(&[("annogate.io/websocket_routes", "/ws1")], &["/ws1"])]
    #[case::multiple_values(&[("annogate.io/websocket_routes", "/ws1,/ws2")], &["/ws1", "/ws2"])]
    #[case::invalid_entries(
        &[("annogate.io/websocket_routes", " /ws1, , /ws2 ")],
        &["/ws1", "/ws2"]
    )]
    #[case::legacy_empty(&[("annogate-gateway/websocket_routes", "")], &[])]
    #[case::legacy_single_value(&[("annogate-gateway/websocket_routes", "/ws1")], &["/ws1"])]
    #[case::legacy_multiple_values(
        &[("annogate-gateway/websocket_routes", " /ws1, , /ws2 ")],
        &["/ws1", "/ws2"]
    )]
    #[case::mixed_namespaces_union(
        &[
            ("annogate-gateway/websocket_routes", " /ws1,  "),
            ("annogate.io/websocket_routes", " , /ws2 "),
        ],
        &["/ws1", "/ws2"]
    )]
    fn test_websocket_routes(#[case] annotations: &[(&str, &str)], #[case] want: &[&str]) {
        let ingress: Ingress = annotated(annotations);
        assert_eq!(websocket_routes(&ingress), to_set(want));
    }

    #[test]
    fn test_websocket_routes_without_annotations() {
        assert_eq!(websocket_routes(&Ingress::default()), BTreeSet::new());
    }

    #[rstest]
    #[case::absent(&[], true)]
    #[case::exact_false(&[("kubernetes.io/ingress.allow-http", "false")], false)]
    #[case::no_is_not_false(&[("kubernetes.io/ingress.allow-http", "no")], true)]
    #[case::case_sensitive(&[("kubernetes.io/ingress.allow-http", "FALSE")], true)]
    #[case::padded(&[("kubernetes.io/ingress.allow-http", " false")], true)]
    fn test_http_allowed(#[case] annotations: &[(&str, &str)], #[case] want: bool) {
        let ingress: Ingress = annotated(annotations);
        assert_eq!(http_allowed(&ingress), want);
    }

    #[test]
    fn registered_annotations_are_known_and_valid() {
        for (kind, names) in ANNOTATIONS_BY_KIND.iter() {
            for name in names {
                let key = format!("{}/{name}", consts::ANNOTATION_PREFIX);
                assert!(annotation_is_known(&key), "{key} should be known");
                assert!(
                    valid_annotation_for_kind(kind, &key),
                    "{key} should be valid for {kind}"
                );
            }
        }
    }

    #[rstest]
    // Bare names are matched regardless of the namespace prefix.
    #[case::current_prefix("annogate.io/websocket_routes", "Ingress", true, true)]
    #[case::legacy_prefix("annogate-gateway/websocket_routes", "Ingress", true, true)]
    #[case::foreign_prefix("kubernetes.io/ingress.allow-http", "Ingress", true, true)]
    // Known keys are only valid on the kinds they are registered for.
    #[case::service_key_on_ingress("annogate.io/upstream_protocol.h2", "Ingress", true, false)]
    #[case::ingress_key_on_service("annogate.io/translate", "Service", true, false)]
    #[case::ingress_key_on_httproute("annogate.io/split_routes", "HTTPRoute", true, false)]
    #[case::carried_key_on_tcproute("annogate.io/websocket_routes", "TCPRoute", true, false)]
    // Unknown keys are never valid, and kinds outside the registry accept
    // nothing.
    #[case::unknown_key("foo.io/secret_sauce", "Service", false, false)]
    #[case::unknown_bare_key("secret_sauce", "Ingress", false, false)]
    #[case::known_key_on_unknown_kind("annogate.io/websocket_routes", "Secret", true, false)]
    fn test_annotation_kind_validation(
        #[case] key: &str,
        #[case] kind: &str,
        #[case] known: bool,
        #[case] valid: bool,
    ) {
        assert_eq!(annotation_is_known(key), known);
        assert_eq!(valid_annotation_for_kind(kind, key), valid);
    }

    #[test]
    fn kind_names_match_the_registry() {
        let ingress: Ingress = annotated(&[]);
        assert_eq!(AnnotatedObject::kind(&ingress), "Ingress");
        assert_eq!(kind_of::<Service>(), "Service");
        assert_eq!(kind_of::<HTTPRoute>(), "HTTPRoute");
        assert_eq!(kind_of::<TCPRoute>(), "TCPRoute");
        for kind in ["Service", "Ingress", "HTTPRoute", "TCPRoute"] {
            assert!(ANNOTATIONS_BY_KIND.contains_key(kind), "{kind} registered");
        }
    }

    #[test]
    fn compat_annotation_without_annotations() {
        let meta_only = Service {
            metadata: ObjectMeta::default(),
            ..Default::default()
        };
        assert_eq!(compat_annotation(&meta_only, "annotation"), "");
    }
}
