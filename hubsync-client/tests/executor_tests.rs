//! Retry, classification and search tests against a mock server.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubsync_client::{AuthConfig, HubConfig, Method, RequestError, RequestExecutor};

fn config(server: &MockServer, max_attempts: u32) -> HubConfig {
    HubConfig {
        api_base_url: format!("{}/crm/v3/objects", server.uri()),
        v4_base_url: format!("{}/crm/v4", server.uri()),
        oauth_token_url: format!("{}/oauth/v1/token", server.uri()),
        properties_base_url: format!("{}/crm/v3/properties", server.uri()),
        auth: AuthConfig::ApiKey {
            hapikey: "key".into(),
        },
        max_attempts,
        retry_interval_ms: 5,
        ..HubConfig::default()
    }
}

#[tokio::test]
async fn server_errors_exhaust_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(5)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let url = format!("{}/contacts/1", cfg.api_base_url);
    let err = executor.fetch(&url, &[]).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::RetriesExhausted { attempts: 5, .. }
    ));
    assert!(err.is_run_fatal());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/1"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let url = format!("{}/contacts/1", cfg.api_base_url);
    let err = executor.fetch(&url, &[]).await.unwrap_err();
    match err {
        RequestError::Client { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad request");
        }
        other => panic!("expected client error, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limits_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/1"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let url = format!("{}/contacts/1", cfg.api_base_url);
    let response = executor.fetch(&url, &[]).await.unwrap();
    assert_eq!(response.id().as_deref(), Some("1"));
}

#[tokio::test]
async fn push_returns_conflict_and_not_found_without_raising() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_string("Contact already exists. Existing ID: 42"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/crm/v3/objects/contacts/9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());

    let create_url = format!("{}/contacts", cfg.api_base_url);
    let conflict = executor
        .push(Method::POST, &create_url, &json!({"properties": {}}))
        .await
        .unwrap();
    assert_eq!(conflict.status, 409);
    assert!(conflict.text.contains("Existing ID: 42"));

    let update_url = format!("{}/contacts/9", cfg.api_base_url);
    let missing = executor
        .push(Method::PATCH, &update_url, &json!({"properties": {}}))
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn push_strips_nulls_from_create_bodies_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts"))
        .and(body_json(json!({"properties": {"email": "a@b.com"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "7"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/crm/v3/objects/contacts/7"))
        .and(body_json(json!({"properties": {"email": "a@b.com", "phone": null}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "7"})))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let body = json!({"properties": {"email": "a@b.com", "phone": null}});

    let create_url = format!("{}/contacts", cfg.api_base_url);
    executor.push(Method::POST, &create_url, &body).await.unwrap();

    let update_url = format!("{}/contacts/7", cfg.api_base_url);
    executor.push(Method::PATCH, &update_url, &body).await.unwrap();
}

#[tokio::test]
async fn search_sends_conjunctive_equality_filters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .and(body_json(json!({
            "filterGroups": [{
                "filters": [
                    {"propertyName": "email", "operator": "EQ", "value": "a@b.com"},
                    {"propertyName": "lastname", "operator": "EQ", "value": "Lovelace"}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "42", "properties": {"email": "a@b.com"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let results = executor
        .search(
            "contacts",
            &[
                ("email".to_string(), "a@b.com".to_string()),
                ("lastname".to_string(), "Lovelace".to_string()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "42");
}

#[tokio::test]
async fn search_tolerates_empty_result_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server, 5);
    let executor = RequestExecutor::new(cfg.clone());
    let results = executor.search("contacts", &[]).await.unwrap();
    assert!(results.is_empty());
}
