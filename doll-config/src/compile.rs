use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
    path::PathBuf,
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::{
    errors::{ConfigLoadError, RuleCompileError, ValidationError},
    model::*,
    target::RequestTarget,
    validate::{optional_str, required_str, scalar_to_string, validate_field, FieldType},
};

/// Output of a compile: the configuration plus every rule that was rejected.
#[derive(Debug)]
pub struct Compiled {
    pub configuration: Configuration,
    pub rule_errors: Vec<RuleCompileError>,
}

/// Turns a parsed configuration document into a [`Configuration`].
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    /// Port given at launch. When set the document's `port` is ignored.
    port_override: Option<u16>,
}

impl RuleCompiler {
    pub fn new(port_override: Option<u16>) -> Self {
        Self { port_override }
    }

    /// Only the top-level shape can fail the compile. Broken rules are
    /// reported in [`Compiled::rule_errors`] and left out.
    pub fn compile(&self, document: &Value) -> Result<Compiled, ConfigLoadError> {
        match document {
            Value::Array(rules) => {
                debug!("Configuration is an array");
                let (rules, rule_errors) = compile_rules(rules);
                Ok(Compiled {
                    configuration: Configuration {
                        port: self.port_override.unwrap_or(DEFAULT_PORT),
                        rules,
                        ..Default::default()
                    },
                    rule_errors,
                })
            }
            Value::Object(fields) => {
                debug!("Configuration is an object");
                Ok(self.compile_object(fields))
            }
            _ => Err(ConfigLoadError::NotObjectOrArray),
        }
    }

    fn compile_object(&self, fields: &Map<String, Value>) -> Compiled {
        let mut configuration = Configuration {
            port: self.port_override.unwrap_or(DEFAULT_PORT),
            ..Default::default()
        };

        if fields.is_empty() {
            warn!("Configuration is empty");
            return Compiled {
                configuration,
                rule_errors: Vec::new(),
            };
        }

        if self.port_override.is_none() {
            if let Some(port) = fields.get("port") {
                configuration.port = compile_port(port);
            }
        }

        // Timestamps stay on only when the object asks for them.
        configuration.log = LogSettings {
            levels: compile_log_levels(fields.get("log_level")),
            time: validate_field(fields.get("log_time"), "log_time", FieldType::Boolean, false)
                .ok()
                .flatten()
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        if let Ok(Some(security)) =
            validate_field(fields.get("security"), "security", FieldType::Object, false)
        {
            configuration.security = compile_security(security);
        }

        let mut rule_errors = Vec::new();
        match fields.get("response") {
            None => {}
            Some(Value::Array(rules)) => {
                let (rules, errors) = compile_rules(rules);
                configuration.rules = rules;
                rule_errors = errors;
            }
            Some(_) => info!(
                target: CONSOLE_TARGET,
                "Invalid \"response\" field type, expects array"
            ),
        }

        Compiled {
            configuration,
            rule_errors,
        }
    }
}

fn compile_port(value: &Value) -> u16 {
    let port = validate_field(Some(value), "port", FieldType::Number, false)
        .ok()
        .flatten()
        .and_then(Value::as_u64)
        .filter(|port| *port > 0 && *port < 65536);

    match port {
        Some(port) => port as u16,
        None => {
            error!("Port should be a number > 0 and < 65536");
            DEFAULT_PORT
        }
    }
}

fn log_level_hint() -> String {
    let names: Vec<_> = LogLevel::ALL.iter().map(LogLevel::as_str).collect();
    names.join(",")
}

/// A single level or a list of levels. Anything that leaves no valid level
/// falls back to the defaults.
pub fn compile_log_levels(value: Option<&Value>) -> LogLevels {
    let mut levels = Vec::new();
    match value {
        None => {}
        Some(Value::String(name)) => match name.parse::<LogLevel>() {
            Ok(level) => levels.push(level),
            Err(_) => error!(
                "log_level must be a string or an array of values: {}",
                log_level_hint()
            ),
        },
        Some(Value::Array(names)) => {
            for name in names {
                match name.as_str().map(str::parse::<LogLevel>) {
                    Some(Ok(level)) => levels.push(level),
                    _ => error!(
                        "log_level must be a string one of values: {} (got {})",
                        log_level_hint(),
                        name
                    ),
                }
            }
        }
        Some(_) => error!(
            "log_level must be a string or an array of values: {}",
            log_level_hint()
        ),
    }

    if levels.is_empty() {
        LogLevels::default()
    } else {
        LogLevels::new(levels)
    }
}

fn compile_security(value: &Value) -> Security {
    let non_empty = |name: &str| {
        optional_str(value.get(name), name)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    Security {
        username: non_empty("username"),
        password: non_empty("password"),
        allowed_ips: compile_allowed_ips(value.get("ip")),
    }
}

/// Keeps the valid IPv4 literals. An empty result means no IP restriction.
pub fn compile_allowed_ips(value: Option<&Value>) -> Option<BTreeSet<Ipv4Addr>> {
    let entries = validate_field(value, "ip", FieldType::Array, false)
        .ok()
        .flatten()?
        .as_array()?;

    let mut allowed = BTreeSet::new();
    for entry in entries {
        match entry.as_str().map(str::parse::<Ipv4Addr>) {
            Some(Ok(ip)) => {
                allowed.insert(ip);
            }
            _ => error!("{} - not IPv4", entry),
        }
    }

    if allowed.is_empty() {
        None
    } else {
        Some(allowed)
    }
}

/// Compiles every rule, keeping declaration order. A rule that fails is
/// logged and skipped.
pub fn compile_rules(raw: &[Value]) -> (Vec<ResponseRule>, Vec<RuleCompileError>) {
    if raw.is_empty() {
        warn!("Configuration is empty");
    }

    let mut rules = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    for (index, value) in raw.iter().enumerate() {
        match compile_rule(index, value) {
            Ok(rule) => rules.push(rule),
            Err(e) => {
                error!("{}", e);
                errors.push(e);
            }
        }
    }
    debug!("{} responses loaded, {} rejected", rules.len(), errors.len());

    (rules, errors)
}

pub fn compile_rule(index: usize, value: &Value) -> Result<ResponseRule, RuleCompileError> {
    let fields = value
        .as_object()
        .ok_or(RuleCompileError::NotAnObject { index })?;

    let name = optional_str(fields.get("name"), "name").map(str::to_owned);
    let invalid = |source: ValidationError| RuleCompileError::Invalid {
        index,
        label: name.clone().unwrap_or_else(|| index.to_string()),
        source,
    };

    let path = required_str(fields.get("path"), "path").map_err(&invalid)?;
    let target = RequestTarget::parse(path).map_err(|e| {
        invalid(ValidationError::InvalidValue {
            field: "path".to_owned(),
            reason: e.to_string(),
        })
    })?;

    let params = compile_params(fields.get("params"));
    let mut required_params: BTreeMap<String, String> = target.query.iter().cloned().collect();
    required_params.extend(params.clone());

    Ok(ResponseRule {
        index,
        name,
        path: path.to_owned(),
        target,
        method: compile_method(fields.get("method")),
        params,
        required_params,
        body: compile_body(fields),
        status: compile_status(fields.get("code")),
        delay: compile_delay(fields.get("delay")),
        headers: compile_headers(fields.get("headers")),
    })
}

fn compile_body(fields: &Map<String, Value>) -> ResponseBody {
    let literal = optional_str(fields.get("string"), "string").map(str::to_owned);
    let file = optional_str(fields.get("filePath"), "filePath");
    let proxy = optional_str(fields.get("proxy"), "proxy");

    let body = match (file, literal) {
        (Some(path), fallback) => ResponseBody::File {
            path: PathBuf::from(path),
            fallback,
        },
        (None, Some(literal)) => ResponseBody::Literal(literal),
        (None, None) => ResponseBody::Empty,
    };

    match proxy {
        Some(target) => ResponseBody::Proxy {
            target: target.to_owned(),
            fallback: Box::new(body),
        },
        None => body,
    }
}

fn compile_method(value: Option<&Value>) -> Option<Method> {
    let method = optional_str(value, "method")?;
    if !HTTP_METHODS.contains(&method) {
        warn!("\"method\" value \"{}\" is not valid", method);
        return None;
    }
    Method::from_bytes(method.as_bytes()).ok()
}

fn compile_params(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let fields = match validate_field(value, "params", FieldType::Object, false) {
        Ok(Some(Value::Object(fields))) => fields,
        _ => return params,
    };

    for (key, value) in fields {
        match scalar_to_string(value) {
            Some(value) => {
                params.insert(key.clone(), value);
            }
            None => warn!("param \"{}\" dropped, expects string or number", key),
        }
    }
    params
}

fn compile_status(value: Option<&Value>) -> StatusCode {
    let code = match validate_field(value, "code", FieldType::Number, false) {
        Ok(Some(code)) => code,
        _ => return StatusCode::OK,
    };

    match code
        .as_u64()
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
    {
        Some(status) => status,
        None => {
            warn!("\"code\" value {} is not a valid status code", code);
            StatusCode::OK
        }
    }
}

fn compile_delay(value: Option<&Value>) -> Duration {
    let delay = match validate_field(value, "delay", FieldType::Number, false) {
        Ok(Some(delay)) => delay,
        _ => return Duration::ZERO,
    };

    match delay.as_f64().filter(|ms| ms.is_finite() && *ms >= 0.0) {
        Some(ms) => Duration::from_millis(ms as u64),
        None => {
            warn!("\"delay\" value {} is not a valid delay", delay);
            Duration::ZERO
        }
    }
}

fn compile_headers(value: Option<&Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let fields = match validate_field(value, "headers", FieldType::Object, false) {
        Ok(Some(Value::Object(fields))) => fields,
        _ => return headers,
    };

    for (name, value) in fields {
        let parsed = scalar_to_string(value).and_then(|value| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(&value).ok()?;
            Some((name, value))
        });
        match parsed {
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => warn!("header \"{}\" dropped, invalid name or value {}", name, value),
        }
    }
    headers
}

#[cfg(test)]
fn compile_json(document: Value) -> Compiled {
    RuleCompiler::default().compile(&document).unwrap()
}

#[test]
fn test_array_form() {
    let compiled = compile_json(serde_json::json!([
        {"path": "/a", "string": "a"},
        {"path": "/b", "filePath": "/tmp/b.json", "method": "POST", "code": 201, "delay": 15},
    ]));
    let rules = &compiled.configuration.rules;
    assert_eq!(2, rules.len());
    assert_eq!(ResponseBody::Literal("a".to_owned()), rules[0].body);
    assert_eq!(StatusCode::OK, rules[0].status);
    assert_eq!(None, rules[0].method);

    assert_eq!(1, rules[1].index);
    assert_eq!(Some(Method::POST), rules[1].method);
    assert_eq!(StatusCode::CREATED, rules[1].status);
    assert_eq!(Duration::from_millis(15), rules[1].delay);
    assert_eq!(
        ResponseBody::File {
            path: PathBuf::from("/tmp/b.json"),
            fallback: None
        },
        rules[1].body
    );
    assert!(compiled.configuration.security.is_empty());
}

#[test]
fn test_object_form_globals() {
    let compiled = compile_json(serde_json::json!({
        "port": 9100,
        "log_level": ["debug", "error"],
        "log_time": false,
        "security": {"username": "a", "password": "b", "ip": ["10.0.0.5", "nope", "1.2.3"]},
        "response": [{"path": "/hello", "string": "world"}]
    }));
    let config = compiled.configuration;
    assert_eq!(9100, config.port);
    assert!(!config.log.time);
    assert!(config.log.levels.allows(LogLevel::Debug));
    assert!(!config.log.levels.allows(LogLevel::Info));
    assert_eq!(Some("a".to_owned()), config.security.username);
    assert_eq!(Some("b".to_owned()), config.security.password);
    let ips: Vec<_> = config.security.allowed_ips.unwrap().into_iter().collect();
    assert_eq!(vec![Ipv4Addr::new(10, 0, 0, 5)], ips);
    assert_eq!(1, config.rules.len());
}

#[test]
fn test_log_time_defaults_by_shape() {
    let object = compile_json(serde_json::json!({"response": [{"path": "/a"}]}));
    assert!(!object.configuration.log.time);

    let mistyped = compile_json(serde_json::json!({"log_time": "yes", "response": []}));
    assert!(!mistyped.configuration.log.time);

    let enabled = compile_json(serde_json::json!({"log_time": true, "response": []}));
    assert!(enabled.configuration.log.time);

    let array = compile_json(serde_json::json!([{"path": "/a"}]));
    assert!(array.configuration.log.time);

    let empty = compile_json(serde_json::json!({}));
    assert!(empty.configuration.log.time);
}

#[test]
fn test_port_override_and_fallback() {
    let document = serde_json::json!({"port": 70000, "response": []});
    let compiled = RuleCompiler::default().compile(&document).unwrap();
    assert_eq!(DEFAULT_PORT, compiled.configuration.port);

    let compiled = RuleCompiler::new(Some(4000)).compile(&document).unwrap();
    assert_eq!(4000, compiled.configuration.port);

    let compiled = compile_json(serde_json::json!({"port": "80"}));
    assert_eq!(DEFAULT_PORT, compiled.configuration.port);
}

#[test]
fn test_bogus_log_level_falls_back() {
    let compiled = compile_json(serde_json::json!({"log_level": "bogus", "response": []}));
    assert_eq!(LogLevels::default(), compiled.configuration.log.levels);

    let compiled = compile_json(serde_json::json!({"log_level": ["bogus", 3]}));
    assert_eq!(LogLevels::default(), compiled.configuration.log.levels);

    let compiled = compile_json(serde_json::json!({"log_level": "none"}));
    assert!(!compiled.configuration.log.levels.allows(LogLevel::Error));
}

#[test]
fn test_all_invalid_ips_means_unrestricted() {
    let compiled = compile_json(serde_json::json!({"security": {"ip": ["::1", "abc"]}}));
    assert_eq!(None, compiled.configuration.security.allowed_ips);
    assert!(compiled.configuration.security.is_empty());
}

#[test]
fn test_broken_rule_is_skipped() {
    let compiled = compile_json(serde_json::json!([
        {"name": "no path", "string": "x"},
        {"path": 4},
        7,
        {"path": "/ok"}
    ]));
    let rules = &compiled.configuration.rules;
    assert_eq!(1, rules.len());
    assert_eq!(3, rules[0].index);

    let failed: Vec<_> = compiled.rule_errors.iter().map(|e| e.index()).collect();
    assert_eq!(vec![0, 1, 2], failed);
    assert!(compiled.rule_errors[0].to_string().contains("no path"));
}

#[test]
fn test_bad_optional_fields_are_dropped() {
    let compiled = compile_json(serde_json::json!([{
        "path": "/x",
        "method": "get",
        "code": "201",
        "delay": -5,
        "headers": {"x-ok": "1", "x-num": 2, "bad header": "v"},
        "params": {"a": 1, "b": {"nested": true}},
        "name": 5
    }]));
    let rule = &compiled.configuration.rules[0];
    assert_eq!(None, rule.method);
    assert_eq!(None, rule.name);
    assert_eq!(StatusCode::OK, rule.status);
    assert_eq!(Duration::ZERO, rule.delay);
    assert_eq!(2, rule.headers.len());
    assert_eq!("2", rule.headers["x-num"]);
    assert_eq!(BTreeMap::from([("a".to_owned(), "1".to_owned())]), rule.params);
}

#[test]
fn test_params_override_path_query() {
    let compiled = compile_json(serde_json::json!([
        {"path": "/q?a=1&b=2", "params": {"b": 3, "c": "x"}}
    ]));
    let rule = &compiled.configuration.rules[0];
    assert_eq!("/q", rule.target.pathname);
    assert_eq!(
        BTreeMap::from([
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "3".to_owned()),
            ("c".to_owned(), "x".to_owned()),
        ]),
        rule.required_params
    );
}

#[test]
fn test_body_kinds() {
    let compiled = compile_json(serde_json::json!([
        {"path": "/p", "proxy": "http://upstream", "string": "fallback"},
        {"path": "/f", "filePath": "data.json", "string": "fallback"},
        {"path": "/e"}
    ]));
    let rules = &compiled.configuration.rules;
    assert_eq!(
        ResponseBody::Proxy {
            target: "http://upstream".to_owned(),
            fallback: Box::new(ResponseBody::Literal("fallback".to_owned())),
        },
        rules[0].body
    );
    assert_eq!(
        ResponseBody::File {
            path: PathBuf::from("data.json"),
            fallback: Some("fallback".to_owned()),
        },
        rules[1].body
    );
    assert_eq!(ResponseBody::Empty, rules[2].body);
}

#[test]
fn test_non_container_document() {
    let err = RuleCompiler::default()
        .compile(&serde_json::json!("just a string"))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::NotObjectOrArray));
}

#[test]
fn test_response_not_array() {
    let compiled = compile_json(serde_json::json!({"response": {"path": "/x"}}));
    assert!(compiled.configuration.rules.is_empty());
    assert!(compiled.rule_errors.is_empty());
}
