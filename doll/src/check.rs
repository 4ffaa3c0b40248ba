use anyhow::bail;
use clap::Parser;
use doll_config::prelude::*;
use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf};

#[derive(Parser, Debug)]
pub struct CheckCommandConfig {
    #[clap(long = "config", short, env = "CFG_PATH", default_value = "config.json")]
    /// Location of the configuration file
    pub config_file: PathBuf,

    #[clap(long)]
    /// Print the compiled configuration as JSON
    pub json: bool,

    #[clap(long)]
    /// Fail when any rule was rejected
    pub strict: bool,
}

#[derive(Serialize, Debug)]
struct RuleSummary {
    index: usize,
    name: Option<String>,
    method: Option<String>,
    path: String,
    params: BTreeMap<String, String>,
    body: &'static str,
    status: u16,
    delay_ms: u128,
}

impl From<&ResponseRule> for RuleSummary {
    fn from(rule: &ResponseRule) -> Self {
        let body = match &rule.body {
            ResponseBody::Proxy { .. } => "proxy",
            ResponseBody::File { .. } => "file",
            ResponseBody::Literal(_) => "string",
            ResponseBody::Empty => "empty",
        };
        Self {
            index: rule.index,
            name: rule.name.clone(),
            method: rule.method.as_ref().map(|m| m.to_string()),
            path: rule.target.pathname.clone(),
            params: rule.required_params.clone(),
            body,
            status: rule.status.as_u16(),
            delay_ms: rule.delay.as_millis(),
        }
    }
}

#[derive(Serialize, Debug)]
struct CheckSummary {
    port: u16,
    log_level: Vec<LogLevel>,
    log_time: bool,
    secured: bool,
    rules: Vec<RuleSummary>,
    rejected: Vec<String>,
}

impl From<&Compiled> for CheckSummary {
    fn from(compiled: &Compiled) -> Self {
        let config = &compiled.configuration;
        Self {
            port: config.port,
            log_level: config.log.levels.iter().copied().collect(),
            log_time: config.log.time,
            secured: !config.security.is_empty(),
            rules: config.rules.iter().map(RuleSummary::from).collect(),
            rejected: compiled.rule_errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl CheckCommandConfig {
    pub async fn run_check(&self) -> Result<(), anyhow::Error> {
        let container = ConfigContainer::open(&self.config_file, None)?;
        let compiled = container.load().await?;
        let summary = CheckSummary::from(&compiled);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            for rule in &summary.rules {
                println!(
                    "#{} {} {}{} -> {} ({})",
                    rule.index,
                    rule.method.as_deref().unwrap_or("*"),
                    rule.path,
                    format_params(&rule.params),
                    rule.status,
                    rule.body
                );
            }
            for rejected in &summary.rejected {
                println!("rejected: {}", rejected);
            }
        }

        if self.strict && !summary.rejected.is_empty() {
            bail!("{} rules were rejected", summary.rejected.len());
        }
        Ok(())
    }
}

fn format_params(params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let pairs: Vec<_> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("?{}", pairs.join("&"))
}

#[test]
fn test_summary_of_compiled() {
    let compiled = RuleCompiler::default()
        .compile(&serde_json::json!({
            "security": {"username": "a"},
            "response": [
                {"path": "/a?x=1", "method": "GET", "string": "a"},
                {"name": "broken"}
            ]
        }))
        .unwrap();
    let summary = CheckSummary::from(&compiled);
    assert!(summary.secured);
    assert_eq!(1, summary.rules.len());
    assert_eq!("string", summary.rules[0].body);
    assert_eq!(Some("GET".to_owned()), summary.rules[0].method);
    assert_eq!("?x=1", format_params(&summary.rules[0].params));
    assert_eq!(1, summary.rejected.len());
}
