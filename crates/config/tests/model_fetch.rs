// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the model-config resolver against a local HTTP server.

use blis_config::error::Error;
use blis_config::model::{MAX_BODY_BYTES, ModelConfig, ModelResolver};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG_BODY: &str = r#"{
    "architectures": ["LlamaForCausalLM"],
    "num_hidden_layers": 32,
    "hidden_size": 4096,
    "num_attention_heads": 32,
    "num_key_value_heads": 8,
    "intermediate_size": 14336,
    "vocab_size": 128256
}"#;

fn resolver_for(server: &MockServer) -> ModelResolver {
    let endpoint = Url::parse(&server.uri()).expect("mock server uri");
    ModelResolver::new().with_endpoint(endpoint).with_token(None)
}

async fn fetch(resolver: ModelResolver, repo: &str) -> Result<ModelConfig, Error> {
    let repo = repo.to_owned();
    tokio::task::spawn_blocking(move || resolver.fetch(&repo))
        .await
        .expect("fetch task must not panic")
}

#[tokio::test]
async fn fetch_parses_a_valid_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/meta-llama/Llama-3.1-8B/resolve/main/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONFIG_BODY))
        .mount(&server)
        .await;

    let cfg = fetch(resolver_for(&server), "meta-llama/Llama-3.1-8B")
        .await
        .expect("fetch should succeed");
    assert_eq!(cfg.layers(), 32);
    assert_eq!(cfg.kv_heads(), 8);
}

#[tokio::test]
async fn http_404_reports_the_status_stage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetch(resolver_for(&server), "org/missing")
        .await
        .expect_err("must fail");
    match err {
        Error::ModelFetchError { stage, details, .. } => {
            assert_eq!(stage, "status");
            assert!(details.contains("404"));
        }
        other => panic!("expected fetch error, got: {other:?}"),
    }
}

#[tokio::test]
async fn same_host_redirects_are_followed() {
    let server = MockServer::start().await;
    let target = format!("{}/relocated/config.json", server.uri());
    Mock::given(method("GET"))
        .and(path("/org/moved/resolve/main/config.json"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", target.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relocated/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONFIG_BODY))
        .mount(&server)
        .await;

    let cfg = fetch(resolver_for(&server), "org/moved")
        .await
        .expect("redirected fetch should succeed");
    assert_eq!(cfg.hidden(), 4096);
}

#[tokio::test]
async fn foreign_host_redirects_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "https://evil.example.com/config.json"),
        )
        .mount(&server)
        .await;

    let err = fetch(resolver_for(&server), "org/model")
        .await
        .expect_err("must fail");
    match err {
        Error::RedirectRejected { location, .. } => {
            assert!(location.contains("evil.example.com"));
        }
        other => panic!("expected redirect rejection, got: {other:?}"),
    }
}

#[tokio::test]
async fn oversize_bodies_are_rejected() {
    let server = MockServer::start().await;
    let body = vec![b' '; (MAX_BODY_BYTES + 1) as usize];
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let err = fetch(resolver_for(&server), "org/huge")
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::OversizeBody { .. }));
}

#[tokio::test]
async fn non_json_bodies_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .mount(&server)
        .await;

    let err = fetch(resolver_for(&server), "org/html")
        .await
        .expect_err("must fail");
    match err {
        Error::ModelFetchError { stage, .. } => assert_eq!(stage, "body"),
        other => panic!("expected body error, got: {other:?}"),
    }
}

#[tokio::test]
async fn semantically_empty_bodies_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"model_type":"llama"}"#))
        .mount(&server)
        .await;

    let err = fetch(resolver_for(&server), "org/empty")
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::EmptyModelConfig { .. }));
}

#[tokio::test]
async fn bearer_token_is_sent_to_the_endpoint_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer hf_test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONFIG_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server).with_token(Some("hf_test_token".to_owned()));
    let cfg = fetch(resolver, "org/private").await.expect("authorized fetch");
    assert_eq!(cfg.layers(), 32);
}

#[tokio::test]
async fn invalid_repo_names_never_hit_the_network() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 and, worse, count as traffic.
    let err = fetch(resolver_for(&server), "../etc/passwd")
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::InvalidRepoName { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn resolver_chain_prefers_the_explicit_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    std::fs::write(&path, CONFIG_BODY).expect("write config");

    let server = MockServer::start().await;
    let mut resolver = resolver_for(&server);
    resolver.explicit_path = Some(path);

    let repo = "org/ignored".to_owned();
    let cfg = tokio::task::spawn_blocking(move || resolver.resolve(&repo))
        .await
        .expect("resolve task")
        .expect("explicit path should resolve");
    assert_eq!(cfg.hidden(), 4096);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn fetched_configs_are_written_to_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONFIG_BODY))
        .mount(&server)
        .await;

    let mut resolver = resolver_for(&server);
    resolver.cache_dir = Some(dir.path().to_path_buf());

    let repo = "org/cached".to_owned();
    let cloned = resolver.clone();
    let _ = tokio::task::spawn_blocking(move || cloned.resolve(&repo))
        .await
        .expect("resolve task")
        .expect("fetch should succeed");
    assert!(dir.path().join("org/cached/config.json").is_file());
}
