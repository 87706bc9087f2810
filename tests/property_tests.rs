//! Property-based tests for the request pipeline.
//!
//! These tests use proptest to verify properties that should hold for all
//! inputs: deployment paths, the passthrough whitelist and tool injection.

mod common;

use axum::http::{HeaderMap, Method, StatusCode};
use azure_llm_proxy::{
    core::config::{AzureConfig, UnmappedModelPolicy},
    services::{
        model_resolver::inject_web_search_tool, InboundRequest, ModelResolver, PassthroughFilter,
        RequestRewriter, RouteTarget, UserIdentity,
    },
};
use bytes::Bytes;
use common::*;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;

fn azure_config(deployments: HashMap<String, String>) -> AzureConfig {
    AzureConfig {
        endpoint: "https://example.openai.azure.com".to_string(),
        api_version: "2024-10-21".to_string(),
        api_key: "backend-key".to_string(),
        deployments,
        web_search_models: vec![],
        responses_path: None,
        unmapped_models: UnmappedModelPolicy::Strict,
        restricted_model_prefixes: vec![],
    }
}

fn inbound(uri: &str) -> InboundRequest {
    InboundRequest {
        method: Method::POST,
        uri: uri.parse().unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

/// Arbitrary JSON values a client might put in a request body.
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// A mapped model always puts its deployment id, and only it, in the path.
    #[test]
    fn prop_mapped_model_targets_deployment(
        model in "[a-z][a-z0-9.-]{0,15}",
        deployment in "[a-z][a-z0-9-]{0,15}",
    ) {
        let config = azure_config(HashMap::from([(model.clone(), deployment.clone())]));
        let resolver = ModelResolver::new(&config);
        let rewriter = RequestRewriter::new(&config).unwrap();
        let identity = UserIdentity { username: "alice".to_string(), can_use_gpt4: true };

        let resolution = resolver.resolve(&model, &identity).unwrap();
        prop_assert_eq!(&resolution.deployment, &deployment);

        let target = RouteTarget::Deployment {
            deployment: resolution.deployment,
            operation: "chat/completions",
        };
        let outbound = rewriter.rewrite(&inbound("/v1/chat/completions"), &target, Bytes::new());
        prop_assert_eq!(
            outbound.url.path(),
            format!("/openai/deployments/{}/chat/completions", deployment)
        );
    }

    /// Strict mode never forwards a name it does not know.
    #[test]
    fn prop_unmapped_model_rejected_in_strict_mode(model in "[a-zA-Z0-9._-]{1,20}") {
        let config = azure_config(HashMap::from([("gpt-4o".to_string(), "dep-123".to_string())]));
        prop_assume!(model != "gpt-4o");
        let resolver = ModelResolver::new(&config);
        let identity = UserIdentity { username: "alice".to_string(), can_use_gpt4: true };
        prop_assert!(resolver.resolve(&model, &identity).is_err());
    }

    /// `api-version` appears exactly once whatever the client sent.
    #[test]
    fn prop_api_version_set_once(
        pairs in prop::collection::vec(
            (prop_oneof![Just("api-version".to_string()), "[a-z]{1,8}"], "[a-z0-9]{0,8}"),
            0..6,
        ),
    ) {
        let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let uri = format!("/openai/responses?{}", query.join("&"));
        let rewriter = RequestRewriter::new(&azure_config(HashMap::new())).unwrap();
        let outbound = rewriter.rewrite(&inbound(&uri), &RouteTarget::Native, Bytes::new());

        let versions: Vec<String> = outbound
            .url
            .query_pairs()
            .filter(|(k, _)| k == "api-version")
            .map(|(_, v)| v.into_owned())
            .collect();
        prop_assert_eq!(versions, vec!["2024-10-21".to_string()]);

        let others = outbound.url.query_pairs().filter(|(k, _)| k != "api-version").count();
        let expected = pairs.iter().filter(|(k, _)| k != "api-version").count();
        prop_assert_eq!(others, expected);
    }

    /// Paths outside the two responses families are never allowed.
    #[test]
    fn prop_whitelist_rejects_other_paths(segment in "[a-z_]{1,12}", rest in "(/[a-z0-9_]{1,8}){0,3}") {
        prop_assume!(segment != "responses" && segment != "v1");
        let filter = PassthroughFilter::new();
        let path = format!("/openai/{}{}", segment, rest);
        prop_assert!(!filter.is_allowed(&path));
    }

    /// Sub-paths of the responses families are always allowed.
    #[test]
    fn prop_whitelist_accepts_sub_paths(
        root in prop_oneof![Just("/openai/responses"), Just("/openai/v1/responses")],
        rest in "(/[a-z0-9_]{1,8}){0,3}",
    ) {
        let filter = PassthroughFilter::new();
        let path = format!("{}{}", root, rest);
        prop_assert!(filter.is_allowed(&path));
    }

    /// Injection adds exactly one entry and the body stays serializable JSON.
    #[test]
    fn prop_injection_adds_exactly_one_tool(
        tools in prop::collection::vec(json_value_strategy(), 0..5),
        extra in json_value_strategy(),
    ) {
        let mut body = json!({"model": "gpt-4o", "tools": tools.clone(), "extra": extra});
        inject_web_search_tool(&mut body);

        let encoded = serde_json::to_vec(&body).unwrap();
        let decoded: Value = serde_json::from_slice(&encoded).unwrap();
        let injected = decoded["tools"].as_array().unwrap();
        prop_assert_eq!(injected.len(), tools.len() + 1);
        prop_assert_eq!(&injected[..tools.len()], &tools[..]);
        prop_assert_eq!(&injected[tools.len()], &json!({"type": "web_search_preview"}));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Non-whitelisted passthrough paths are 404 through the full router,
    /// whatever the method and credential.
    #[test]
    fn prop_router_hides_non_whitelisted_paths(
        segment in "[a-z]{1,10}",
        method in prop_oneof![Just("GET"), Just("POST"), Just("PUT"), Just("DELETE"), Just("PATCH")],
        authenticated in any::<bool>(),
    ) {
        prop_assume!(segment != "responses" && segment != "v1");
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let status = runtime.block_on(async {
            let app = TestApp::new("http://127.0.0.1:1").await;
            let token = authenticated.then_some(ALICE_TOKEN);
            let response = app
                .router
                .oneshot(empty_request(method, &format!("/openai/{}", segment), token))
                .await
                .unwrap();
            response.status()
        });
        prop_assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
