use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, instrument};

use async_trait::async_trait;
use bytes::Bytes;
use doll_config::prelude::{Configuration, RequestTarget, ResponseRule};
use tokio::time::sleep;

use http::{HeaderMap, Method, Response, Uri};

/// The request side of a match: normalised pathname and every query value.
struct IncomingTarget {
    pathname: String,
    query: BTreeMap<String, Vec<String>>,
}

impl IncomingTarget {
    fn from_uri(uri: &Uri) -> Option<Self> {
        let pathname = match RequestTarget::parse(uri.path()) {
            Ok(target) => target.pathname,
            Err(e) => {
                debug!("Unable to parse request path {}: {}", uri.path(), e);
                return None;
            }
        };

        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(raw) = uri.query() {
            for (key, value) in form_urlencoded::parse(raw.as_bytes()).into_owned() {
                query.entry(key).or_default().push(value);
            }
        }

        Some(Self { pathname, query })
    }
}

fn rule_matches(rule: &ResponseRule, method: &Method, request: &IncomingTarget) -> bool {
    if rule.target.pathname != request.pathname {
        return false;
    }

    if let Some(expected) = &rule.method {
        if expected != method {
            return false;
        }
    }

    // A repeated request key never equals a single configured value.
    rule.required_params.iter().all(|(key, expected)| {
        match request.query.get(key).map(Vec::as_slice) {
            Some([value]) => value == expected,
            _ => false,
        }
    })
}

/// First rule, in declaration order, whose path, method and parameters
/// are all satisfied by the request.
#[instrument(skip_all, fields(http.uri = %uri, http.method = %method))]
pub fn find_rule<'a>(
    rules: &'a [ResponseRule],
    method: &Method,
    uri: &Uri,
) -> Option<&'a ResponseRule> {
    let request = IncomingTarget::from_uri(uri)?;
    let found = rules
        .iter()
        .find(|rule| rule_matches(rule, method, &request));
    if let Some(rule) = found {
        debug!("Matched rule {}", rule.label());
    }
    found
}

/// Serves the configured rules of one configuration snapshot.
#[derive(Debug, Clone)]
pub struct HttpStaticPlugin {
    pub config: Arc<Configuration>,
}

impl HttpStaticPlugin {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl doll_plugin::HttpPlugin for HttpStaticPlugin {
    #[instrument(skip_all)]
    async fn respond_to_request(
        &self,
        method: &Method,
        uri: &Uri,
        _headers: &HeaderMap,
    ) -> Option<Response<Bytes>> {
        let rule = find_rule(&self.config.rules, method, uri)?;
        let resolved = crate::resolve(rule).await;

        if !resolved.delay.is_zero() {
            debug!("Starting a wait of {:?}", resolved.delay);
            sleep(resolved.delay).await;
        }

        Some(resolved.into_response())
    }
}

#[cfg(test)]
fn rules(document: serde_json::Value) -> Vec<ResponseRule> {
    doll_config::RuleCompiler::default()
        .compile(&document)
        .unwrap()
        .configuration
        .rules
}

#[cfg(test)]
fn find_index(rules: &[ResponseRule], method: Method, uri: &str) -> Option<usize> {
    find_rule(rules, &method, &uri.parse::<Uri>().unwrap()).map(|rule| rule.index)
}

#[test]
fn test_path_match() {
    let rules = rules(serde_json::json!([{"path": "/foo/bar"}]));
    assert_eq!(Some(0), find_index(&rules, Method::GET, "/foo/bar"));
    assert_eq!(Some(0), find_index(&rules, Method::DELETE, "/foo/bar?x=1"));
    assert_eq!(None, find_index(&rules, Method::GET, "/foo/barasdfa"));
    assert_eq!(None, find_index(&rules, Method::GET, "/foo/bar/"));
    assert_eq!(None, find_index(&rules, Method::GET, "/"));
}

#[test]
fn test_absolute_rule_path() {
    let rules = rules(serde_json::json!([{"path": "http://example.com/foo"}]));
    assert_eq!(Some(0), find_index(&rules, Method::GET, "/foo"));
}

#[test]
fn test_method_match() {
    let rules = rules(serde_json::json!([
        {"path": "/m", "method": "POST"},
        {"path": "/m"}
    ]));
    assert_eq!(Some(0), find_index(&rules, Method::POST, "/m"));
    assert_eq!(Some(1), find_index(&rules, Method::GET, "/m"));
    assert_eq!(Some(1), find_index(&rules, Method::PATCH, "/m"));
}

#[test]
fn test_query_match() {
    let rules = rules(serde_json::json!([
        {"path": "/greet?name=bob"},
        {"path": "/num", "params": {"id": 7}}
    ]));
    assert_eq!(Some(0), find_index(&rules, Method::GET, "/greet?name=bob"));
    assert_eq!(Some(0), find_index(&rules, Method::GET, "/greet?extra=1&name=bob"));
    assert_eq!(None, find_index(&rules, Method::GET, "/greet?name=alice"));
    assert_eq!(None, find_index(&rules, Method::GET, "/greet"));
    assert_eq!(None, find_index(&rules, Method::GET, "/greet?name=bob&name=baz"));
    assert_eq!(Some(1), find_index(&rules, Method::GET, "/num?id=7"));
    assert_eq!(None, find_index(&rules, Method::GET, "/num?id=8"));
}

#[test]
fn test_params_win_over_path_query() {
    let merged = rules(serde_json::json!([{"path": "/q?a=1", "params": {"a": "2"}}]));
    let params_only = rules(serde_json::json!([{"path": "/q", "params": {"a": "2"}}]));
    for uri in ["/q?a=2", "/q?a=1", "/q"] {
        assert_eq!(
            find_index(&params_only, Method::GET, uri),
            find_index(&merged, Method::GET, uri),
            "disagreement on {}",
            uri
        );
    }
    assert_eq!(Some(0), find_index(&merged, Method::GET, "/q?a=2"));
}

#[test]
fn test_rule_path_fragment_is_ignored() {
    let rules = rules(serde_json::json!([
        {"path": "/a?x=1#top"},
        {"path": "/b#top"}
    ]));
    assert_eq!(Some(0), find_index(&rules, Method::GET, "/a?x=1"));
    assert_eq!(None, find_index(&rules, Method::GET, "/a?x=2"));
    assert_eq!(Some(1), find_index(&rules, Method::GET, "/b"));
}

#[test]
fn test_first_match_wins() {
    let rules = rules(serde_json::json!([
        {"path": "/other"},
        {"path": "/dup", "string": "first"},
        {"path": "/dup?x=1", "string": "second"}
    ]));
    assert_eq!(Some(1), find_index(&rules, Method::GET, "/dup?x=1"));
}

#[test]
fn test_index_survives_skipped_rules() {
    let rules = rules(serde_json::json!([
        {"string": "no path"},
        {"path": "/ok"}
    ]));
    assert_eq!(Some(1), find_index(&rules, Method::GET, "/ok"));
}
