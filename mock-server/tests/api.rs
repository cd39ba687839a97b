use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Echo};
use serde_json::Value;
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(body.to_string())
        .unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

// --- items ---

#[tokio::test]
async fn list_items_empty_echoes_page() {
    let resp = app().oneshot(get("/items?page=3")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["code"], "0");
    assert_eq!(body["data"]["page"], 3);
    assert_eq!(body["data"]["items"], serde_json::json!([]));
}

#[tokio::test]
async fn create_then_list() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(json_request("POST", "/items", r#"{"name":"bolt"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: Value = body_json(resp).await;
    assert_eq!(created["data"]["id"], 1);

    let resp = app.oneshot(get("/items")).await.unwrap();
    let body: Value = body_json(resp).await;
    assert_eq!(body["data"]["items"][0]["name"], "bolt");
}

#[tokio::test]
async fn create_item_missing_name_returns_422() {
    let resp = app()
        .oneshot(json_request("POST", "/items", r#"{"label":"x"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn update_and_delete_item() {
    let app = app();
    app.clone()
        .oneshot(json_request("POST", "/items", r#"{"name":"nut"}"#))
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(json_request("PUT", "/items/1", r#"{"name":"washer"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["data"]["name"], "washer");

    let resp = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri("/items/1").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::builder().method("DELETE").uri("/items/1").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(resp).await;
    assert_eq!(body["code"], "404");
}

#[tokio::test]
async fn update_unknown_item_returns_404() {
    let resp = app()
        .oneshot(json_request("PUT", "/items/42", r#"{"name":"x"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- helpers ---

#[tokio::test]
async fn status_returns_requested_code() {
    for code in [200u16, 404, 500] {
        let resp = app().oneshot(get(&format!("/status/{code}"))).await.unwrap();
        assert_eq!(resp.status().as_u16(), code);
        let body: Value = body_json(resp).await;
        assert_eq!(body["code"], code.to_string());
    }
}

#[tokio::test]
async fn empty_has_no_body() {
    let resp = app().oneshot(get("/empty")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn slow_waits_then_answers() {
    let resp = app().oneshot(get("/slow/10")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["data"]["slept_ms"], 10);
}

#[tokio::test]
async fn echo_reflects_request() {
    let req = Request::builder()
        .method("PUT")
        .uri("/echo?a=1&b=two")
        .header("X-Custom", "yes")
        .body("payload".to_string())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.path, "/echo");
    assert_eq!(echo.query.as_deref(), Some("a=1&b=two"));
    assert_eq!(echo.headers["x-custom"], "yes");
    assert_eq!(echo.body, "payload");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let resp = app().oneshot(get("/nope")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_bytes(resp).await.is_empty());
}
