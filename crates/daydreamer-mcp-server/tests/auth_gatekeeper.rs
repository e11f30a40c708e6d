//! Gatekeeper behavior across the full router: dual credential modes,
//! public endpoints, and the configured-off mode.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{response_json, test_config, test_router};
use serde_json::json;
use tower::ServiceExt;

fn sse_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/sse").header("accept", "text/event-stream");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn mint_jwt(router: &axum::Router) -> String {
    use daydreamer_mcp_server::oauth::pkce;

    let register = Request::builder()
        .method("POST")
        .uri("/register")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"redirect_uris": ["https://claude.ai/cb"]}).to_string(),
        ))
        .unwrap();
    let body = response_json(router.clone().oneshot(register).await.unwrap()).await;
    let client_id = body["client_id"].as_str().unwrap().to_string();

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let authorize_uri = format!(
        "/authorize?response_type=code&client_id={client_id}\
         &redirect_uri=https%3A%2F%2Fclaude.ai%2Fcb\
         &code_challenge={}&code_challenge_method=S256",
        pkce::challenge_s256(verifier)
    );
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(authorize_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap();
    let code = url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let token = Request::builder()
        .method("POST")
        .uri("/token")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=authorization_code&code={code}\
             &redirect_uri=https://claude.ai/cb&client_id={client_id}&code_verifier={verifier}"
        )))
        .unwrap();
    let body = response_json(router.clone().oneshot(token).await.unwrap()).await;
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn protected_endpoints_demand_a_credential() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    let response = router.clone().oneshot(sse_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
}

#[tokio::test]
async fn an_oauth_minted_jwt_opens_a_session() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    let token = mint_jwt(&router).await;
    let response = router
        .clone()
        .oneshot(sse_request(Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn the_legacy_static_bearer_is_sufficient() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    let response = router
        .clone()
        .oneshot(sse_request(Some(common::TEST_STATIC_BEARER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn garbage_bearers_are_rejected() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    let response = router
        .clone()
        .oneshot(sse_request(Some("not-a-real-credential")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_root_stay_public() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    for uri in ["/health", "/"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri} must be public");
    }

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response_json(response).await;
    // The harness database is disconnected by design.
    assert_eq!(body["database"], false);
    assert_eq!(body["status"], "degraded");
    assert!(body["active_sessions"].is_number());
}

#[tokio::test]
async fn messages_are_gated_too() {
    let config = test_config(true);
    let (router, _sessions) = test_router(&config);

    let request = Request::builder()
        .method("POST")
        .uri("/messages?session_id=00000000-0000-4000-8000-000000000000")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
