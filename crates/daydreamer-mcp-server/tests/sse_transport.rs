//! SSE transport end-to-end: endpoint framing, message binding, protocol
//! dispatch, session bounds.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{json_request, next_sse_chunk, response_json, test_config, test_router};
use serde_json::json;
use tower::ServiceExt;

async fn open_sse(router: &axum::Router) -> (String, axum::body::BodyDataStream) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/sse")
                .header("accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut stream = response.into_body().into_data_stream();
    let first = next_sse_chunk(&mut stream).await.expect("bootstrap frame");

    let session_id = first
        .split("session_id=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .expect("session id in bootstrap frame")
        .to_string();

    (session_id, stream)
}

#[tokio::test]
async fn the_opening_frame_is_a_plain_endpoint_uri() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let first = next_sse_chunk(&mut stream).await.unwrap();

    assert!(first.starts_with("event: endpoint\ndata: /messages?session_id="));
    assert!(first.ends_with("\n\n"));
    // The data value is a URI, never JSON.
    assert!(!first.contains('{'));

    let id_part = first
        .split("session_id=")
        .nth(1)
        .unwrap()
        .trim_end();
    assert!(uuid::Uuid::parse_str(id_part).is_ok());
}

#[tokio::test]
async fn initialize_round_trips_on_both_channels() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, mut stream) = open_sse(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "daydreamer-memory");
    assert!(
        body["result"]["serverInfo"]["version"]
            .as_str()
            .unwrap()
            .starts_with('6')
    );

    // The same payload arrives as a data frame on the session stream.
    let frame = next_sse_chunk(&mut stream).await.unwrap();
    assert!(frame.starts_with("data: "));
    assert!(frame.contains("\"protocolVersion\":\"2024-11-05\""));
    assert!(frame.contains("\"daydreamer-memory\""));
}

#[tokio::test]
async fn tools_list_exposes_the_full_registry() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        ))
        .await
        .unwrap();
    let body = response_json(response).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 17);
    for tool in tools {
        assert!(tool["name"].is_string());
        assert!(tool["description"].is_string());
        assert!(tool["inputSchema"].is_object());
    }
}

#[tokio::test]
async fn notifications_return_204_with_no_body() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unknown_methods_return_method_not_found() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({"jsonrpc": "2.0", "id": 3, "method": "shenanigans/do"}),
        ))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn unknown_sessions_are_rejected_with_400() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/messages?session_id=00000000-0000-4000-8000-000000000000",
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "unknown_session");
}

#[tokio::test]
async fn oversized_payloads_are_refused_with_413() {
    let mut config = test_config(false);
    config.max_body_bytes = 1024;
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    let padding = "x".repeat(4096);
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"pad": padding}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn the_session_bound_evicts_the_least_recently_active_stream() {
    let mut config = test_config(false);
    config.max_sessions = 2;
    let (router, sessions) = test_router(&config);

    let (_first_id, mut first_stream) = open_sse(&router).await;
    let (second_id, _second_stream) = open_sse(&router).await;

    // Make the second session the most recently active.
    let _ = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={second_id}"),
            &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        ))
        .await
        .unwrap();

    // Admitting a third closes the least-recently-active stream.
    let (_third_id, _third_stream) = open_sse(&router).await;
    assert_eq!(sessions.active_count(), 2);
    assert!(next_sse_chunk(&mut first_stream).await.is_none());
}

#[tokio::test]
async fn tool_errors_surface_with_stable_categories() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    // The harness graph store is disconnected, so a database-backed tool
    // reports database_unavailable through the JSON-RPC envelope.
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "tools/call",
                "params": {"name": "memory_stats", "arguments": {}}
            }),
        ))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["category"], "database_unavailable");
}

#[tokio::test]
async fn raw_cypher_schema_violations_reach_the_client() {
    let config = test_config(false);
    let (router, _sessions) = test_router(&config);
    let (session_id, _stream) = open_sse(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/messages?session_id={session_id}"),
            &json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "tools/call",
                "params": {
                    "name": "raw_cypher_query",
                    "arguments": {
                        "query": "CREATE (o:Observation {timestamp: datetime(), theme:'x'})-[:OCCURRED_ON]->(d:Day)",
                        "params": {}
                    }
                }
            }),
        ))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["category"], "schema_violation");
}
