use std::sync::Arc;

use doll_config::prelude::*;
use doll_plugin::{HttpPlugin, HyperService};
use doll_plugin_http::HttpStaticPlugin;
use hyper::{Body, Request, Response, StatusCode};

fn service_for(document: serde_json::Value) -> HyperService {
    let config = RuleCompiler::default()
        .compile(&document)
        .unwrap()
        .configuration;
    let security = config.security.clone();
    let plugin: Box<dyn HttpPlugin> = Box::new(HttpStaticPlugin::new(Arc::new(config)));
    HyperService::new(security, vec![Arc::new(plugin)])
}

async fn call(service: &HyperService, method: &str, uri: &str) -> Response<Body> {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    service
        .process_plugins(req, Some("10.0.0.1".parse().unwrap()))
        .await
        .unwrap()
}

async fn body_string(response: Response<Body>) -> String {
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn hello_world() {
    let service = service_for(serde_json::json!({
        "response": [{"path": "/hello", "string": "world"}]
    }));
    let response = call(&service, "GET", "/hello").await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!("0", response.headers()["x-doll-rule"]);
    assert_eq!("world", body_string(response).await);
}

#[tokio::test]
async fn query_mismatch_is_not_found() {
    let service = service_for(serde_json::json!({
        "response": [{"path": "/greet?name=bob", "string": "hi bob"}]
    }));
    let response = call(&service, "GET", "/greet?name=alice").await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
    assert_eq!(
        "Not found response for query: /greet?name=alice",
        body_string(response).await
    );

    let response = call(&service, "GET", "/greet?name=bob").await;
    assert_eq!("hi bob", body_string(response).await);
}

#[tokio::test]
async fn missing_file_serves_empty_body() {
    let service = service_for(serde_json::json!([
        {"path": "/data", "filePath": "/does/not/exist.json", "code": 201}
    ]));
    let response = call(&service, "GET", "/data").await;
    assert_eq!(StatusCode::CREATED, response.status());
    assert_eq!("", body_string(response).await);
}

#[tokio::test]
async fn method_restricted_rule() {
    let service = service_for(serde_json::json!([
        {"path": "/items", "method": "POST", "string": "created", "code": 201},
        {"path": "/items", "string": "list"}
    ]));
    let response = call(&service, "POST", "/items").await;
    assert_eq!(StatusCode::CREATED, response.status());
    assert_eq!("created", body_string(response).await);

    let response = call(&service, "GET", "/items").await;
    assert_eq!("list", body_string(response).await);
}

#[tokio::test]
async fn ip_restriction_denies_other_clients() {
    let service = service_for(serde_json::json!({
        "security": {"ip": ["10.0.0.5"]},
        "response": [{"path": "/hello", "string": "world"}]
    }));
    let response = call(&service, "GET", "/hello").await;
    assert_eq!(StatusCode::FORBIDDEN, response.status());

    let req = Request::builder().uri("/hello").body(Body::empty()).unwrap();
    let response = service
        .process_plugins(req, Some("10.0.0.5".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, response.status());
}

#[tokio::test]
async fn delayed_response_still_arrives() {
    let service = service_for(serde_json::json!([
        {"path": "/slow", "string": "done", "delay": 20}
    ]));
    let started = std::time::Instant::now();
    let response = call(&service, "GET", "/slow").await;
    assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    assert_eq!("done", body_string(response).await);
}
