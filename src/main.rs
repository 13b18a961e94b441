use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use gateway_api::{
    apis::experimental::tcproutes::{
        TCPRoute, TCPRouteParentRefs, TCPRouteRules, TCPRouteRulesBackendRefs, TCPRouteSpec,
    },
    gateways,
    httproutes::{
        HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs,
        HTTPRouteRulesMatches, HTTPRouteRulesMatchesPath, HTTPRouteRulesMatchesPathType,
        HTTPRouteSpec,
    },
};
use k8s_openapi::api::{
    core::v1::Service,
    networking::v1::{Ingress, IngressServiceBackend, ServiceBackendPort},
};
use kube::{Api, Resource, ResourceExt, runtime::controller::Action};
use tracing::Instrument;

use crate::{
    err::{AnnogateError, AnnogateResult},
    utils::ObjectMetaAnnogateExt,
    value_filters::{HeadersMatchersList, MatcherList, QueryMatchersList},
};

mod annotations;
mod args;
mod consts;
mod ctx;
mod err;
mod utils;
mod value_filters;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub struct RouteInputInfo {
    pub ingress_name: String,
    pub ingress_namespace: String,
    pub gw_name: String,
    pub gw_namespace: String,
    pub section_name: Option<String>,
    pub hostname: String,
    pub split_routes: bool,
    pub websocket_routes: BTreeSet<String>,
    pub num_retries: u32,
    pub header_matchers: Option<HeadersMatchersList>,
    pub query_matchers: Option<QueryMatchersList>,
}

async fn get_backend_service(api: Api<Service>, svc_name: &str) -> Option<Service> {
    match api.get(svc_name).await {
        Ok(svc) => Some(svc),
        Err(err) => {
            tracing::warn!("Failed to fetch backend service {svc_name}: {err}");
            None
        }
    }
}

fn resolve_svc_port(svc: &Service, port_def: &ServiceBackendPort) -> Option<i32> {
    if let Some(number) = port_def.number {
        return Some(number);
    }
    let port_name = port_def.name.as_ref()?;
    let port = svc
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|port| port.name.as_ref() == Some(port_name))?;
    Some(port.port)
}

/// Upstream protocol configured for this backend port via the
/// `upstream_protocol.{h2,h2c,tls}` annotations on the Service. The port
/// name wins over the port number when both are configured.
fn backend_protocol(svc: &Service, port_def: &ServiceBackendPort, port_number: i32) -> Option<String> {
    let protocols = annotations::parse_upstream_protocols(svc);
    if let Some(name) = &port_def.name {
        if let Some(proto) = protocols.get(name) {
            return Some(proto.clone());
        }
    }
    protocols.get(&port_number.to_string()).cloned()
}

/// Surfaces operator annotations that are attached to the wrong kind, e.g.
/// `upstream_protocol.h2` on an Ingress. Annotations outside the registry
/// belong to someone else and stay quiet.
fn warn_invalid_annotations<K>(obj: &K)
where
    K: Resource<DynamicType = ()>,
{
    let kind = annotations::AnnotatedObject::kind(obj);
    let Some(attached) = obj.meta().annotations.as_ref() else {
        return;
    };
    for key in attached.keys() {
        if annotations::annotation_is_known(key)
            && !annotations::valid_annotation_for_kind(&kind, key)
        {
            tracing::warn!(
                "Annotation {key} on {kind} {} is not valid for this kind",
                obj.name_any()
            );
        }
    }
}

fn create_match_rulesets(
    route_info: &RouteInputInfo,
) -> Vec<(Option<HeadersMatchersList>, Option<QueryMatchersList>)> {
    let headers_cart = route_info
        .header_matchers
        .as_ref()
        .map(|matcher| matcher.0.cartesian_product())
        .unwrap_or_default();
    let query_cart = route_info
        .query_matchers
        .as_ref()
        .map(|matcher| matcher.0.cartesian_product())
        .unwrap_or_default();

    match (headers_cart.is_empty(), query_cart.is_empty()) {
        (true, true) => vec![(None, None)],
        (false, true) => headers_cart
            .into_iter()
            .map(|rules| (Some(HeadersMatchersList(MatcherList(rules))), None))
            .collect(),
        (true, false) => query_cart
            .into_iter()
            .map(|rules| (None, Some(QueryMatchersList(MatcherList(rules)))))
            .collect(),
        (false, false) => {
            let mut res = vec![];
            for headers in &headers_cart {
                for query in &query_cart {
                    res.push((
                        Some(HeadersMatchersList(MatcherList(headers.clone()))),
                        Some(QueryMatchersList(MatcherList(query.clone()))),
                    ));
                }
            }
            res
        }
    }
}

/// Annotations carried onto the generated routes for the downstream
/// gateway: websocket paths present on this host, the backend protocol
/// overrides, and the retry budget.
fn carried_annotations(
    route_info: &RouteInputInfo,
    websocket_paths: BTreeSet<&str>,
    backend_protocols: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut carried = BTreeMap::new();
    if !websocket_paths.is_empty() {
        carried.insert(
            format!("{}/{}", consts::ANNOTATION_PREFIX, consts::WEBSOCKET_ROUTES),
            websocket_paths.into_iter().collect::<Vec<_>>().join(","),
        );
    }
    if !backend_protocols.is_empty() {
        carried.insert(
            format!("{}/{}", consts::ANNOTATION_PREFIX, consts::BACKEND_PROTOCOL),
            backend_protocols
                .iter()
                .map(|(svc, proto)| format!("{svc}:{proto}"))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    if route_info.num_retries > 0 {
        carried.insert(
            format!("{}/{}", consts::ANNOTATION_PREFIX, consts::NUM_RETRIES),
            route_info.num_retries.to_string(),
        );
    }
    carried
}

async fn create_http_routes(
    ctx: Arc<ctx::Context>,
    route_info: RouteInputInfo,
    http: &k8s_openapi::api::networking::v1::HTTPIngressRuleValue,
) -> AnnogateResult<Vec<HTTPRoute>> {
    let safe_hostname = utils::sanitize_hostname(&route_info.hostname);
    let gw_group = <gateways::Gateway as kube::Resource>::group(&());
    let gw_kind = <gateways::Gateway as kube::Resource>::kind(&());

    let match_ruleset = create_match_rulesets(&route_info);
    tracing::debug!("Match ruleset: \n{match_ruleset:#?}");

    let mut rules = vec![];
    let mut backend_protocols = BTreeMap::new();

    for path in &http.paths {
        let Some(svc) = &path.backend.service else {
            tracing::warn!("Skipping backend without service");
            continue;
        };
        let Some(svc_port) = &svc.port else {
            tracing::warn!("Skipping backend without service port");
            continue;
        };
        let Some(svc_obj) = get_backend_service(
            Api::namespaced(ctx.client.clone(), &route_info.ingress_namespace),
            &svc.name,
        )
        .await
        else {
            tracing::warn!("Skipping backend with missing service {}", &svc.name);
            continue;
        };
        let Some(svc_port_number) = resolve_svc_port(&svc_obj, svc_port) else {
            tracing::warn!(
                "Skipping backend with unresolvable service port for service {}",
                &svc.name
            );
            continue;
        };
        if ctx.args.annotation_warnings {
            warn_invalid_annotations(&svc_obj);
        }
        if let Some(proto) = backend_protocol(&svc_obj, svc_port, svc_port_number) {
            backend_protocols.insert(svc.name.clone(), proto);
        }
        let match_type = match path.path_type.as_str() {
            "Prefix" => HTTPRouteRulesMatchesPathType::PathPrefix,
            "Exact" => HTTPRouteRulesMatchesPathType::Exact,
            "ImplementationSpecific" => HTTPRouteRulesMatchesPathType::PathPrefix,
            _ => {
                return Err(AnnogateError::ParseError(format!(
                    "Unknown path type: {}",
                    path.path_type.as_str()
                )));
            }
        };
        for (header_matchers, query_matchers) in &match_ruleset {
            rules.push(HTTPRouteRules {
                name: None,
                backend_refs: Some(
                    [HTTPRouteRulesBackendRefs {
                        name: svc.name.clone(),
                        port: Some(svc_port_number),
                        kind: None,
                        group: None,
                        namespace: None,
                        filters: None,
                        weight: None,
                    }]
                    .to_vec(),
                ),
                matches: Some(vec![HTTPRouteRulesMatches {
                    headers: header_matchers.clone().map(Into::into),
                    method: None,
                    query_params: query_matchers.clone().map(Into::into),
                    path: Some(HTTPRouteRulesMatchesPath {
                        r#type: Some(match_type.clone()),
                        value: path.path.clone(),
                    }),
                }]),
                filters: None,
                timeouts: None,
            });
        }
    }
    if rules.is_empty() {
        return Err(AnnogateError::General("No valid paths found".to_string()));
    }

    let websocket_paths = http
        .paths
        .iter()
        .filter_map(|path| path.path.as_deref())
        .filter(|path| route_info.websocket_routes.contains(*path))
        .collect::<BTreeSet<_>>();
    let route_annotations = carried_annotations(&route_info, websocket_paths, &backend_protocols);

    let parent_ref = HTTPRouteParentRefs {
        group: Some(gw_group.to_string()),
        kind: Some(gw_kind.to_string()),
        name: route_info.gw_name.to_string(),
        namespace: Some(route_info.gw_namespace.to_string()),
        port: None,
        section_name: route_info.section_name.clone(),
    };

    // If split_routes is enabled, create a separate HTTPRoute for each rule.
    let mut routes = if route_info.split_routes {
        rules
            .into_iter()
            .map(|rule| {
                HTTPRoute::new(
                    &format!(
                        "{}-{}-{}",
                        route_info.ingress_name,
                        safe_hostname,
                        utils::sanitize_hostname(
                            &rule
                                .matches
                                .as_ref()
                                .and_then(|m| m.first())
                                .and_then(|mm| mm.path.as_ref())
                                .and_then(|p| p.value.clone())
                                .unwrap_or_else(|| "root".to_string())
                        )
                    ),
                    HTTPRouteSpec {
                        hostnames: Some(vec![route_info.hostname.clone()]),
                        parent_refs: Some(vec![parent_ref.clone()]),
                        rules: Some(vec![rule]),
                    },
                )
            })
            .collect()
    } else {
        // Split routes is disabled, create a single HTTPRoute with all rules.
        vec![HTTPRoute::new(
            &format!("{}-{}-http", route_info.ingress_name, safe_hostname),
            HTTPRouteSpec {
                hostnames: Some(vec![route_info.hostname.to_string()]),
                parent_refs: Some(vec![parent_ref]),
                rules: Some(rules),
            },
        )]
    };

    if !route_annotations.is_empty() {
        for route in &mut routes {
            route.meta_mut().annotations = Some(route_annotations.clone());
        }
    }

    Ok(routes)
}

async fn create_tcp_routes(
    ctx: Arc<ctx::Context>,
    route_info: RouteInputInfo,
    svc: &IngressServiceBackend,
) -> AnnogateResult<TCPRoute> {
    let safe_hostname = utils::sanitize_hostname(&route_info.hostname);
    let gw_group = <gateways::Gateway as kube::Resource>::group(&());
    let gw_kind = <gateways::Gateway as kube::Resource>::kind(&());

    let Some(svc_port) = &svc.port else {
        tracing::warn!("Skipping backend without service port");
        return Err(AnnogateError::General("Backend doesn't have port".to_string()));
    };

    let Some(svc_obj) = get_backend_service(
        Api::namespaced(ctx.client.clone(), &route_info.ingress_namespace),
        &svc.name,
    )
    .await
    else {
        return Err(AnnogateError::General(format!(
            "Couldn't fetch backend service {}",
            &svc.name
        )));
    };
    let Some(svc_port_number) = resolve_svc_port(&svc_obj, svc_port) else {
        tracing::warn!(
            "skipping backend with unresolvable service port for service {}",
            &svc.name
        );
        return Err(AnnogateError::General(format!(
            "Couldn't resolve port for a service {}",
            &svc.name
        )));
    };
    if ctx.args.annotation_warnings {
        warn_invalid_annotations(&svc_obj);
    }

    let mut route = TCPRoute::new(
        &format!("{}-{}-tcp", route_info.ingress_name, safe_hostname),
        TCPRouteSpec {
            use_default_gateways: None,
            rules: [TCPRouteRules {
                name: None,
                backend_refs: [TCPRouteRulesBackendRefs {
                    name: svc.name.clone(),
                    port: Some(svc_port_number),
                    kind: None,
                    group: None,
                    namespace: None,
                    weight: None,
                }]
                .to_vec(),
            }]
            .to_vec(),
            parent_refs: Some(
                [TCPRouteParentRefs {
                    group: Some(gw_group.to_string()),
                    kind: Some(gw_kind.to_string()),
                    name: route_info.gw_name.to_string(),
                    namespace: Some(route_info.gw_namespace.to_string()),
                    port: None,
                    section_name: route_info.section_name.clone(),
                }]
                .to_vec(),
            ),
        },
    );

    if let Some(proto) = backend_protocol(&svc_obj, svc_port, svc_port_number) {
        route.meta_mut().annotations = Some(BTreeMap::from([(
            format!("{}/{}", consts::ANNOTATION_PREFIX, consts::BACKEND_PROTOCOL),
            format!("{}:{proto}", svc.name),
        )]));
    }

    Ok(route)
}

#[tracing::instrument(skip(ingress, ctx), fields(ingress = ingress.name_any(), namespace = ingress.namespace()), err)]
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<ctx::Context>) -> AnnogateResult<Action> {
    if !ctx.is_leader.load(std::sync::atomic::Ordering::Relaxed) {
        tracing::debug!("Not a leader, skipping reconciliation");
        return Ok(Action::requeue(Duration::from_secs(20)));
    }

    // Only translate if the annotation is present and true
    // or if skip_by_default is false and
    // the annotation is not present or equals to true
    let skip_translation =
        match annotations::compat_annotation(ingress.as_ref(), consts::TRANSLATE).as_str() {
            "" => ctx.args.skip_by_default,
            value => !value.eq_ignore_ascii_case("true"),
        };

    if skip_translation {
        tracing::info!("Skipping translation due to annotation or operator settings");
        return Ok(Action::requeue(Duration::from_secs(60)));
    }

    tracing::info!("Reconciling Ingress");
    if ctx.args.annotation_warnings {
        warn_invalid_annotations(ingress.as_ref());
    }

    let ingress_spec = ingress
        .spec
        .as_ref()
        .ok_or(anyhow::anyhow!("Ingress doesn't have spec section"))?;
    let ingress_rules = ingress_spec
        .rules
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Ingress doesn't have any routing rules"))?;
    let ingress_namespace = ingress
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("Ingress doesn't have a namespace"))?;

    let section_name = annotations::compat_annotation(ingress.as_ref(), consts::SECTION_NAME);
    let desired_section_name = (!section_name.is_empty()).then_some(section_name);

    let gw_namespace =
        match annotations::compat_annotation(ingress.as_ref(), consts::GATEWAY_NAMESPACE) {
            ns if ns.is_empty() => ctx.args.default_gateway_namespace.clone(),
            ns => ns,
        };
    let gw_name = match annotations::compat_annotation(ingress.as_ref(), consts::GATEWAY_NAME) {
        name if name.is_empty() => ctx.args.default_gateway_name.clone(),
        name => name,
    };

    let split_routes = annotations::compat_annotation(ingress.as_ref(), consts::SPLIT_ROUTES)
        .eq_ignore_ascii_case("true");
    let websocket_routes = annotations::websocket_routes(ingress.as_ref());
    let num_retries = annotations::parse_uint32(&annotations::compat_annotation(
        ingress.as_ref(),
        consts::NUM_RETRIES,
    ));
    let allow_http = annotations::http_allowed(ingress.as_ref());
    let tls_hosts = ingress_spec
        .tls
        .iter()
        .flatten()
        .filter_map(|tls| tls.hosts.as_ref())
        .flatten()
        .map(String::as_str)
        .collect::<BTreeSet<_>>();

    let header_matchers = ingress
        .meta()
        .annotations
        .as_ref()
        .map(|annotations| MatcherList::from_annotations(annotations, consts::HEADER_MATCH))
        .map(HeadersMatchersList);
    let query_matchers = ingress
        .meta()
        .annotations
        .as_ref()
        .map(|annotations| MatcherList::from_annotations(annotations, consts::QUERY_MATCH))
        .map(QueryMatchersList);

    let default_backend = ingress_spec.default_backend.as_ref();

    for rule in ingress_rules {
        let Some(host) = &rule.host else {
            tracing::warn!("Skipping rule without host");
            continue;
        };

        if !allow_http && !tls_hosts.contains(host.as_str()) {
            tracing::warn!("Skipping rule for host {host}: HTTP is disallowed and the host has no TLS entry");
            continue;
        }

        let route_info = RouteInputInfo {
            ingress_name: ingress.name_any(),
            ingress_namespace: ingress_namespace.clone(),
            gw_name: gw_name.clone(),
            gw_namespace: gw_namespace.clone(),
            section_name: desired_section_name.clone(),
            hostname: host.to_string(),
            split_routes,
            websocket_routes: websocket_routes.clone(),
            num_retries,
            header_matchers: header_matchers.clone(),
            query_matchers: query_matchers.clone(),
        };

        if let Some(http) = &rule.http {
            let Ok(routes) = create_http_routes(ctx.clone(), route_info, http).await else {
                tracing::warn!("Failed to create HTTPRoute for host {}", host);
                continue;
            };
            for mut route in routes {
                if ctx.args.link_to_ingress {
                    route.meta_mut().add_owner(ingress.as_ref());
                }
                Api::<HTTPRoute>::namespaced(ctx.client.clone(), &ingress_namespace)
                    .patch(
                        &route.name_any(),
                        &ctx.patch_params(),
                        &kube::api::Patch::Apply(route),
                    )
                    .instrument(tracing::info_span!("Applying generated HTTPRoute"))
                    .await?;
            }
        } else {
            if !ctx.args.experimental {
                tracing::warn!(
                    "Skipping non-http rule. In order to migrate it to TCPRoute, please add --experimental flag to annogate-operator."
                );
                continue;
            }
            // In case if rule.http is None
            let Some(backend) = default_backend else {
                tracing::warn!("Skipping non-HTTP Ingress rule without default backend");
                continue;
            };
            let Some(backend_svc) = &backend.service else {
                tracing::warn!("defaultBackend doesn't have a service, skipping.");
                continue;
            };

            let Ok(mut route) = create_tcp_routes(ctx.clone(), route_info, backend_svc).await
            else {
                tracing::warn!("Failed to create TCPRoute for host {}", host);
                continue;
            };

            if ctx.args.link_to_ingress {
                route.meta_mut().add_owner(ingress.as_ref());
            }

            Api::<TCPRoute>::namespaced(ctx.client.clone(), &ingress_namespace)
                .patch(
                    &route.name_any(),
                    &ctx.patch_params(),
                    &kube::api::Patch::Apply(route),
                )
                .instrument(tracing::info_span!("Applying generated TCPRoute"))
                .await?;
        }
    }

    Ok(Action::requeue(Duration::from_secs(10)))
}

#[tracing::instrument(skip(obj, _ctx), fields(ingress = obj.name_any()))]
fn on_error(obj: Arc<Ingress>, _err: &AnnogateError, _ctx: Arc<ctx::Context>) -> Action {
    Action::requeue(Duration::from_secs(30))
}

async fn lease_renew(ctx: Arc<ctx::Context>) {
    let leadership = kube_leader_election::LeaseLock::new(
        ctx.client.clone(),
        ctx.client.default_namespace(),
        kube_leader_election::LeaseLockParams {
            holder_id: ctx.hostname.clone(),
            lease_name: "annogate-operator-lock".into(),
            lease_ttl: Duration::from_secs(15),
        },
    );
    loop {
        match leadership.try_acquire_or_renew().await {
            Ok(lease) => {
                if lease.acquired_lease {
                    tracing::info!("Acquired leadership lease");
                }
                ctx.is_leader
                    .store(lease.acquired_lease, std::sync::atomic::Ordering::Relaxed)
            }
            Err(err) => {
                tracing::warn!("Failed to acquire or renew lease: {}", err);
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let ctx = Arc::new(ctx::Context::new().await?);
    tracing_subscriber::fmt()
        .with_max_level(ctx.args.log_level)
        .init();
    tracing::info!("Starting operator");
    tracing::info!("CLI arguments: {:?}", ctx.args);

    let lease_renewer = lease_renew(ctx.clone());

    let ingress_controller = kube::runtime::Controller::new(
        Api::<Ingress>::all(ctx.client.clone()),
        kube::runtime::watcher::Config::default(),
    )
    .run(reconcile, on_error, ctx.clone())
    .for_each(|_| futures::future::ready(()));

    tokio::select! {
        _ = lease_renewer => {
            tracing::error!("Lease renewer task exited unexpectedly");
        },
        _ = ingress_controller => {
            tracing::error!("Ingress controller task exited unexpectedly");
        },
    }

    Ok(())
}
