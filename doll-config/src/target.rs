use std::collections::BTreeMap;
use url::Url;

const BASE_URL: &str = "http://localhost/";

/// The path and query of a request target, normalised so that configured
/// rule paths and incoming request URIs compare like for like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub pathname: String,
    pub query: Vec<(String, String)>,
}

impl RequestTarget {
    /// Accepts an origin-form target (`/a/b?c=d`) or an absolute URL. Scheme,
    /// host and fragment are discarded.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let url = match Url::parse(raw) {
            Ok(url) if url.has_host() => url,
            _ => {
                let mut url = Url::parse(BASE_URL)?;
                let raw = raw.split_once('#').map_or(raw, |(before, _)| before);
                let (path, query) = match raw.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (raw, None),
                };
                url.set_path(path);
                url.set_query(query);
                url
            }
        };

        Ok(Self {
            pathname: url.path().to_owned(),
            query: url.query_pairs().into_owned().collect(),
        })
    }

    /// Query parameters grouped by name, keeping repeated values.
    pub fn query_map(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in &self.query {
            map.entry(key.as_str()).or_default().push(value.as_str());
        }
        map
    }
}

#[test]
fn test_parse_origin_form() {
    let target = RequestTarget::parse("/greet?name=bob&age=3").unwrap();
    assert_eq!("/greet", target.pathname);
    assert_eq!(
        vec![
            ("name".to_string(), "bob".to_string()),
            ("age".to_string(), "3".to_string())
        ],
        target.query
    );
}

#[test]
fn test_parse_absolute_ignores_host() {
    let target = RequestTarget::parse("http://example.com:9000/hello?x=1").unwrap();
    assert_eq!("/hello", target.pathname);
    assert_eq!(1, target.query.len());

    let plain = RequestTarget::parse("/hello").unwrap();
    assert_eq!(plain.pathname, target.pathname);
}

#[test]
fn test_parse_relative_gets_leading_slash() {
    let target = RequestTarget::parse("hello").unwrap();
    assert_eq!("/hello", target.pathname);
    assert!(target.query.is_empty());
}

#[test]
fn test_parse_drops_fragment() {
    let target = RequestTarget::parse("/b#top").unwrap();
    assert_eq!("/b", target.pathname);
    assert!(target.query.is_empty());

    let target = RequestTarget::parse("/a?x=1#top").unwrap();
    assert_eq!("/a", target.pathname);
    assert_eq!(vec![("x".to_string(), "1".to_string())], target.query);

    let absolute = RequestTarget::parse("http://example.com/a?x=1#top").unwrap();
    assert_eq!(target, absolute);
}

#[test]
fn test_query_map_keeps_repeats() {
    let target = RequestTarget::parse("/x?a=1&a=2&b=3").unwrap();
    let map = target.query_map();
    assert_eq!(vec!["1", "2"], map["a"]);
    assert_eq!(vec!["3"], map["b"]);
}
