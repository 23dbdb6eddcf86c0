use super::*;
use crate::{envoy, PolicyState, PolicyStatus};
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::INFO_ANNOTATION;
use pretty_assertions::assert_eq;

fn state(translation: &crate::Translation, name: &str) -> PolicyState {
    translation.policies[&ResourceId::new("default", name)]
        .state
        .clone()
}

fn info(ef: &EnvoyFilter) -> Vec<String> {
    envoy::info(ef).expect("provenance").http_filter_policies
}

#[test]
fn policy_on_gateway_route() {
    let snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("Mike")}),
    )]);
    let translation = translator().translate(&snapshot);

    let names = translation
        .envoy_filters
        .iter()
        .map(|ef| ef.metadata.name.clone().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["htnn-http-filter", "htnn-h-default.local"]);
    assert_eq!(
        translation.envoy_filters[0].metadata.namespace.as_deref(),
        Some("istio-system")
    );

    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(ef.spec.config_patches.len(), 1);
    let patch = &ef.spec.config_patches[0];
    assert_eq!(patch.apply_to, "HTTP_ROUTE");
    assert_eq!(vhost(patch), ("default.local:8888".to_string(), None));
    assert_eq!(
        plugins(patch),
        vec![("demo".to_string(), json!({"hostName": "Mike"}))]
    );
    assert_eq!(info(ef), vec!["default/policy"]);
    assert_eq!(
        ef.metadata.annotations.as_ref().unwrap()[INFO_ANNOTATION],
        r#"{"httpfilterpolicies":["default/policy"]}"#
    );

    assert_eq!(
        translation.policies[&ResourceId::new("default", "policy")],
        PolicyStatus {
            generation: Some(1),
            state: PolicyState::Accepted,
        }
    );
}

#[test]
fn global_filter_without_policies() {
    let translation = translator().translate(&Snapshot::default());
    assert_eq!(translation.envoy_filters.len(), 1);
    assert_eq!(
        translation.envoy_filters[0].metadata.name.as_deref(),
        Some("htnn-http-filter")
    );
    assert!(translation.policies.is_empty());
}

#[test]
fn listener_port_change_keeps_object_identity() {
    let policy = mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("Mike")}),
    );
    let mut snapshot = default_snapshot(vec![policy]);
    snapshot.istio_gateways = vec![mk_istio_gw("default", "gw", &[(8889, &["default.local"])])];

    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 2);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(ef.spec.config_patches.len(), 1);
    assert_eq!(
        vhost(&ef.spec.config_patches[0]),
        ("default.local:8889".to_string(), None)
    );
}

#[test]
fn deleted_route() {
    let mut snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("Mike")}),
    )]);
    snapshot.virtual_services.clear();

    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 1);
    assert!(matches!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound(_)
    ));
}

#[test]
fn unreachable_route() {
    let mut snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("Mike")}),
    )]);
    snapshot.istio_gateways.clear();

    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 1);
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound(
            "VirtualService default/vs is not served by any gateway: gateway default/gw not found"
                .to_string()
        )
    );

    // The gateway exists but none of its listeners admit the route's host.
    snapshot.istio_gateways = vec![mk_istio_gw("default", "gw", &[(8888, &["other.local"])])];
    let translation = translator().translate(&snapshot);
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound(
            "VirtualService default/vs is not served by any gateway".to_string()
        )
    );
}

#[test]
fn invalid_then_valid() {
    let invalid = mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": {"demo": {"config": {}}}}),
    );
    let translation = translator().translate(&default_snapshot(vec![invalid]));
    assert_eq!(translation.envoy_filters.len(), 1);
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::Invalid("invalid config for plugin demo: hostName is required".to_string())
    );

    let valid = mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("Mike")}),
    );
    let translation = translator().translate(&default_snapshot(vec![valid]));
    assert_eq!(state(&translation, "policy"), PolicyState::Accepted);

    // The same valid policy with an unreachable target.
    let valid = mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("nope"), "filters": demo("Mike")}),
    );
    let translation = translator().translate(&default_snapshot(vec![valid]));
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound("VirtualService default/nope not found".to_string())
    );
}

#[test]
fn policy_without_plugins_is_invalid() {
    let policy = mk_policy("default", "policy", 0, json!({"targetRef": vs_target("vs")}));
    let translation = translator().translate(&default_snapshot(vec![policy]));
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::Invalid("no plugin is configured".to_string())
    );

    let policy = mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": {"unknown": {"config": {}}}}),
    );
    let translation = translator().translate(&default_snapshot(vec![policy]));
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::Invalid("unknown http filter: unknown".to_string())
    );
}

#[test]
fn embedded_policy() {
    let mut snapshot = default_snapshot(vec![]);
    snapshot.virtual_services = vec![with_embedded(
        snapshot.virtual_services.remove(0),
        json!({
            "apiVersion": "htnn.mosn.io/v1",
            "kind": "HTTPFilterPolicy",
            "spec": {"filters": demo("embedded")},
        }),
    )];

    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(info(ef), vec!["default/embedded-virtualservice-vs"]);
    assert_eq!(
        plugins(&ef.spec.config_patches[0]),
        vec![("demo".to_string(), json!({"hostName": "embedded"}))]
    );
}

#[test]
fn embedded_policy_with_sub_policies() {
    let mut snapshot = default_snapshot(vec![]);
    snapshot.virtual_services = vec![with_embedded(
        snapshot.virtual_services.remove(0),
        json!({
            "apiVersion": "htnn.mosn.io/v1",
            "kind": "HTTPFilterPolicy",
            "spec": {"subPolicies": [{"sectionName": "route", "filters": demo("kate")}]},
        }),
    )];

    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    let patches = ef
        .spec
        .config_patches
        .iter()
        .map(|p| (vhost(p), plugins(p)))
        .collect::<Vec<_>>();
    assert_eq!(
        patches,
        vec![(
            ("default.local:8888".to_string(), Some("route".to_string())),
            vec![("demo".to_string(), json!({"hostName": "kate"}))],
        )]
    );
    assert_eq!(info(ef), vec!["default/embedded-virtualservice-vs"]);
}

#[test]
fn invalid_embedded_policy_is_ignored() {
    let mut snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": {"limitReq": {"config": {"average": 1}}}}),
    )]);
    snapshot.virtual_services = vec![with_embedded(
        snapshot.virtual_services.remove(0),
        json!({"spec": {"filters": {"demo": {"config": {}}}}}),
    )];

    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(info(ef), vec!["default/policy"]);
    assert_eq!(
        plugins(&ef.spec.config_patches[0]),
        vec![("limitReq".to_string(), json!({"average": 1}))]
    );
    assert_eq!(state(&translation, "policy"), PolicyState::Accepted);

    // Malformed JSON is ignored too.
    let mut snapshot = default_snapshot(vec![]);
    snapshot.virtual_services[0]
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(EMBEDDED_POLICY_ANNOTATION.to_string(), "{".to_string());
    assert_eq!(translator().translate(&snapshot).envoy_filters.len(), 1);
}

#[test]
fn direct_policy_overrides_embedded() {
    let mut snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({"targetRef": vs_target("vs"), "filters": demo("direct")}),
    )]);
    snapshot.virtual_services = vec![with_embedded(
        snapshot.virtual_services.remove(0),
        json!({"spec": {"filters": {
            "demo": {"config": {"hostName": "embedded"}},
            "limitReq": {"config": {"average": 1}},
        }}}),
    )];

    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(
        plugins(&ef.spec.config_patches[0]),
        vec![
            ("limitReq".to_string(), json!({"average": 1})),
            ("demo".to_string(), json!({"hostName": "direct"})),
        ]
    );
    assert_eq!(
        info(ef),
        vec!["default/embedded-virtualservice-vs", "default/policy"]
    );
}

#[test]
fn newer_direct_policy_wins() {
    let snapshot = default_snapshot(vec![
        mk_policy(
            "default",
            "newer",
            20,
            json!({"targetRef": vs_target("vs"), "filters": demo("newer")}),
        ),
        mk_policy(
            "default",
            "older",
            10,
            json!({"targetRef": vs_target("vs"), "filters": demo("older")}),
        ),
    ]);
    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(
        plugins(&ef.spec.config_patches[0]),
        vec![("demo".to_string(), json!({"hostName": "newer"}))]
    );
    assert_eq!(state(&translation, "older"), PolicyState::Accepted);
    assert_eq!(state(&translation, "newer"), PolicyState::Accepted);
}

#[test]
fn rule_scoped_policies() {
    let mut section = vs_target("vs");
    section["sectionName"] = json!("route");
    let snapshot = default_snapshot(vec![
        mk_policy(
            "default",
            "wide",
            0,
            json!({
                "targetRef": vs_target("vs"),
                "filters": demo("wide"),
                "subPolicies": [{
                    "sectionName": "other",
                    "filters": {"limitReq": {"config": {"average": 2}}},
                }],
            }),
        ),
        mk_policy(
            "default",
            "section",
            0,
            json!({"targetRef": section, "filters": {"limitReq": {"config": {"average": 1}}}}),
        ),
    ]);

    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    let patches = ef
        .spec
        .config_patches
        .iter()
        .map(|p| (vhost(p), plugins(p)))
        .collect::<Vec<_>>();
    assert_eq!(
        patches,
        vec![
            (
                ("default.local:8888".to_string(), None),
                vec![("demo".to_string(), json!({"hostName": "wide"}))],
            ),
            (
                ("default.local:8888".to_string(), Some("other".to_string())),
                vec![
                    ("limitReq".to_string(), json!({"average": 2})),
                    ("demo".to_string(), json!({"hostName": "wide"})),
                ],
            ),
            (
                ("default.local:8888".to_string(), Some("route".to_string())),
                vec![
                    ("limitReq".to_string(), json!({"average": 1})),
                    ("demo".to_string(), json!({"hostName": "wide"})),
                ],
            ),
        ]
    );
    assert_eq!(info(ef), vec!["default/section", "default/wide"]);
}

#[test]
fn sub_policy_for_missing_rule_is_not_found() {
    let snapshot = default_snapshot(vec![mk_policy(
        "default",
        "policy",
        0,
        json!({
            "targetRef": vs_target("vs"),
            "subPolicies": [{"sectionName": "nope", "filters": demo("sub")}],
        }),
    )]);
    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 1);
    assert_eq!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound("no virtual host is configured by the policy".to_string())
    );
}

#[test]
fn routes_sharing_a_host_share_an_object() {
    let mut snapshot = default_snapshot(vec![
        mk_policy(
            "default",
            "a",
            0,
            json!({"targetRef": vs_target("vs"), "filters": demo("a")}),
        ),
        mk_policy(
            "default",
            "b",
            0,
            json!({
                "targetRef": vs_target("vs2"),
                "filters": {"limitReq": {"config": {"average": 1}}},
            }),
        ),
    ]);
    snapshot
        .virtual_services
        .push(mk_vs("default", "vs2", &["default.local"], &["gw"], &[]));

    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 2);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(ef.spec.config_patches.len(), 1);
    assert_eq!(info(ef), vec!["default/a", "default/b"]);
}

#[test]
fn hostnames_with_the_same_object_name_share_an_object() {
    let snapshot = Snapshot {
        policies: vec![
            mk_policy(
                "default",
                "a",
                0,
                json!({"targetRef": vs_target("vs1"), "filters": demo("a")}),
            ),
            mk_policy(
                "default",
                "b",
                0,
                json!({"targetRef": vs_target("vs2"), "filters": demo("b")}),
            ),
        ],
        virtual_services: vec![
            mk_vs("default", "vs1", &["*.local"], &["gw"], &[]),
            mk_vs("default", "vs2", &["wildcard.local"], &["gw"], &[]),
        ],
        istio_gateways: vec![mk_istio_gw("default", "gw", &[(8888, &["*.local"])])],
        ..Default::default()
    };

    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 2);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-wildcard.local").unwrap();
    let patches = ef
        .spec
        .config_patches
        .iter()
        .map(|p| (vhost(p), plugins(p)))
        .collect::<Vec<_>>();
    assert_eq!(
        patches,
        vec![
            (
                ("*.local:8888".to_string(), None),
                vec![("demo".to_string(), json!({"hostName": "a"}))],
            ),
            (
                ("wildcard.local:8888".to_string(), None),
                vec![("demo".to_string(), json!({"hostName": "b"}))],
            ),
        ]
    );
    assert_eq!(info(ef), vec!["default/a", "default/b"]);
}

#[test]
fn http_route_through_gateway() {
    let snapshot = Snapshot {
        policies: vec![mk_policy(
            "default",
            "policy",
            0,
            json!({"targetRef": hr_target("hr"), "filters": demo("Mike")}),
        )],
        http_routes: vec![mk_hr("default", "hr", &["default.local"], "gw", None, &[])],
        gateways: vec![mk_gw("default", "gw", &[("default", 8888, None)])],
        ..Default::default()
    };
    let translation = translator().translate(&snapshot);
    let ef = find(&translation.envoy_filters, "default", "htnn-h-default.local").unwrap();
    assert_eq!(
        vhost(&ef.spec.config_patches[0]),
        ("default.local:8888".to_string(), None)
    );

    // A listener the route cannot bind to leaves the policy without a target.
    let mut snapshot = snapshot;
    snapshot.http_routes = vec![mk_hr(
        "default",
        "hr",
        &["default.local"],
        "gw",
        Some("default"),
        &[],
    )];
    snapshot.gateways = vec![mk_gw(
        "default",
        "gw",
        &[("no-one-can-match-it", 8888, None)],
    )];
    let translation = translator().translate(&snapshot);
    assert_eq!(translation.envoy_filters.len(), 1);
    assert!(matches!(
        state(&translation, "policy"),
        PolicyState::TargetNotFound(_)
    ));
}

#[test]
fn translation_is_deterministic() {
    let snapshot = default_snapshot(vec![
        mk_policy("default", "a", 1, json!({"targetRef": vs_target("vs"), "filters": demo("a")})),
        mk_policy("default", "b", 1, json!({"targetRef": vs_target("vs"), "filters": demo("b")})),
    ]);
    let first = serde_json::to_value(translator().translate(&snapshot).envoy_filters).unwrap();
    let mut reversed = snapshot.clone();
    reversed.policies.reverse();
    let second = serde_json::to_value(translator().translate(&reversed).envoy_filters).unwrap();
    assert_eq!(first, second);
}
