use bytes::Bytes;
use doll_config::prelude::{ResponseBody, ResponseRule};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use std::{path::Path, time::Duration};
use tracing::{debug, instrument, warn};

use crate::{HttpPluginError, RULE_HEADER};

/// Everything needed to emit the response for a matched rule.
#[derive(Debug, Clone)]
pub struct ResolvedResponse {
    pub rule_index: usize,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub delay: Duration,
}

impl ResolvedResponse {
    /// Tags the response with the rule index unless the rule sets the header itself.
    pub fn into_response(self) -> Response<Bytes> {
        let mut headers = self.headers;
        if !headers.contains_key(RULE_HEADER) {
            headers.insert(
                HeaderName::from_static(RULE_HEADER),
                HeaderValue::from(self.rule_index),
            );
        }

        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

#[instrument(skip_all, fields(rule.index = rule.index))]
pub async fn resolve(rule: &ResponseRule) -> ResolvedResponse {
    let body = match &rule.body {
        ResponseBody::Proxy { target, fallback } => {
            warn!(
                "Proxy to \"{}\" is not supported, serving the configured body instead",
                target
            );
            resolve_body(fallback).await
        }
        body => resolve_body(body).await,
    };

    ResolvedResponse {
        rule_index: rule.index,
        status: rule.status,
        headers: rule.headers.clone(),
        body,
        delay: rule.delay,
    }
}

async fn resolve_body(body: &ResponseBody) -> Bytes {
    match body {
        ResponseBody::File { path, fallback } => match read_file(path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("{}", e);
                fallback.clone().map(Bytes::from).unwrap_or_default()
            }
        },
        ResponseBody::Literal(literal) => Bytes::from(literal.clone()),
        ResponseBody::Empty | ResponseBody::Proxy { .. } => Bytes::new(),
    }
}

async fn read_file(path: &Path) -> Result<Bytes, HttpPluginError> {
    let to_error = |source| HttpPluginError::FileRead {
        path: path.to_path_buf(),
        source,
    };
    let real_path = tokio::fs::canonicalize(path).await.map_err(to_error)?;
    debug!("Loading data file {:?}", real_path);
    let contents = tokio::fs::read(&real_path).await.map_err(to_error)?;
    Ok(Bytes::from(contents))
}

#[cfg(test)]
fn rule_from(value: serde_json::Value) -> ResponseRule {
    let compiled = doll_config::RuleCompiler::default()
        .compile(&serde_json::json!([value]))
        .unwrap();
    compiled.configuration.rules.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_literal_body() {
    let rule = rule_from(serde_json::json!({
        "path": "/hello", "string": "world", "code": 202, "delay": 5,
        "headers": {"content-type": "text/plain"}
    }));
    let resolved = resolve(&rule).await;
    assert_eq!(StatusCode::ACCEPTED, resolved.status);
    assert_eq!(Duration::from_millis(5), resolved.delay);
    assert_eq!(Bytes::from("world"), resolved.body);

    let response = resolved.into_response();
    assert_eq!("text/plain", response.headers()["content-type"]);
    assert_eq!("0", response.headers()[RULE_HEADER]);
}

#[tokio::test]
async fn test_file_body() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("body.json");
    std::fs::write(&file, b"{\"ok\":true}").unwrap();

    let rule = rule_from(serde_json::json!({
        "path": "/file", "filePath": file.to_str().unwrap(), "string": "unused"
    }));
    assert_eq!(Bytes::from("{\"ok\":true}"), resolve(&rule).await.body);
}

#[tokio::test]
async fn test_missing_file_falls_through() {
    let rule = rule_from(serde_json::json!({
        "path": "/file", "filePath": "/no/such/file.json", "code": 418
    }));
    let resolved = resolve(&rule).await;
    assert!(resolved.body.is_empty());
    assert_eq!(StatusCode::IM_A_TEAPOT, resolved.status);

    let rule = rule_from(serde_json::json!({
        "path": "/file", "filePath": "/no/such/file.json", "string": "fallback"
    }));
    assert_eq!(Bytes::from("fallback"), resolve(&rule).await.body);
}

#[tokio::test]
async fn test_proxy_serves_fallback() {
    let rule = rule_from(serde_json::json!({
        "path": "/p", "proxy": "http://upstream:1234", "string": "local"
    }));
    let resolved = resolve(&rule).await;
    assert_eq!(StatusCode::OK, resolved.status);
    assert_eq!(Bytes::from("local"), resolved.body);
}

#[tokio::test]
async fn test_configured_rule_header_wins() {
    let rule = rule_from(serde_json::json!({
        "path": "/h", "headers": {"x-doll-rule": "custom"}
    }));
    let response = resolve(&rule).await.into_response();
    assert_eq!("custom", response.headers()[RULE_HEADER]);
    assert!(response.body().is_empty());
}
