//! Named request/expected-result scenarios and the runner that drives them

use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult, TransportErrorKind};
use crate::jsonrpc::{JsonRpcClient, Transport};
use crate::report::TestRunResult;

/// One request and the result it must produce
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestScenario {
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(alias = "expectedResult")]
    pub expected: Value,
}

impl TestScenario {
    pub fn new(name: impl Into<String>, method: impl Into<String>, params: Value, expected: Value) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            params,
            expected,
        }
    }
}

/// Result the allium language server returns for `initialize`
pub fn initialize_expected_result() -> Value {
    json!({
        "capabilities": {
            "semanticTokensProvider": {
                "legend": {
                    "tokenTypes": ["enumMember", "variable"],
                    "tokenModifiers": []
                },
                "range": true,
                "full": true
            }
        },
        "serverInfo": {
            "name": "allium-lsp",
            "version": "0.0.1"
        }
    })
}

/// The handshake scenario run when no scenario file is given
pub fn initialize_scenario() -> TestScenario {
    TestScenario::new(
        "initialize",
        "initialize",
        json!({
            "processId": 1000,
            "rootUri": null,
            "capabilities": {}
        }),
        initialize_expected_result(),
    )
}

pub fn default_scenarios() -> Vec<TestScenario> {
    vec![initialize_scenario()]
}

fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let text = value.to_string();
    if text.len() > 80 {
        format!("{} {}...", kind, &text[..text.char_indices().nth(77).map_or(text.len(), |(i, _)| i)])
    } else {
        text
    }
}

/// First structural difference between `expected` and `actual`, if any
///
/// Object keys compare without regard to order, arrays element by element,
/// scalars by value and JSON type (`1` and `1.0` differ).
pub fn first_difference(expected: &Value, actual: &Value) -> Option<String> {
    difference_at("$", expected, actual)
}

fn difference_at(path: &str, expected: &Value, actual: &Value) -> Option<String> {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            for (key, e_value) in e {
                let child = format!("{}.{}", path, key);
                match a.get(key) {
                    Some(a_value) => {
                        if let Some(diff) = difference_at(&child, e_value, a_value) {
                            return Some(diff);
                        }
                    }
                    None => return Some(format!("{}: missing, expected {}", child, describe(e_value))),
                }
            }
            a.keys()
                .find(|key| !e.contains_key(*key))
                .map(|key| format!("{}.{}: unexpected key", path, key))
        }
        (Value::Array(e), Value::Array(a)) => {
            if e.len() != a.len() {
                return Some(format!(
                    "{}: expected {} elements, got {}",
                    path,
                    e.len(),
                    a.len()
                ));
            }
            e.iter()
                .zip(a)
                .enumerate()
                .find_map(|(i, (e_item, a_item))| difference_at(&format!("{}[{}]", path, i), e_item, a_item))
        }
        _ if expected == actual => None,
        _ => Some(format!(
            "{}: expected {}, got {}",
            path,
            describe(expected),
            describe(actual)
        )),
    }
}

/// Send one scenario's request and check the result
pub async fn run_scenario<T: Transport>(
    client: &mut JsonRpcClient<T>,
    scenario: &TestScenario,
) -> HarnessResult<()> {
    let response = client
        .request(&scenario.method, scenario.params.clone())
        .await?;

    if let Some(error) = response.error {
        return Err(HarnessError::AssertionMismatch(format!(
            "expected a result, got error [{}]: {}",
            error.code, error.message
        )));
    }

    let actual = response.result.unwrap_or(Value::Null);
    match first_difference(&scenario.expected, &actual) {
        Some(diff) => Err(HarnessError::AssertionMismatch(diff)),
        None => Ok(()),
    }
}

/// Run scenarios in order on one connection, recording every outcome
///
/// A failing scenario never stops the ones after it.
pub async fn run_scenarios<T: Transport>(
    client: &mut JsonRpcClient<T>,
    scenarios: &[TestScenario],
    result: &mut TestRunResult,
) {
    for scenario in scenarios {
        println!("Running test {}", scenario.name);
        let outcome = run_scenario(client, scenario).await;
        result.record(&scenario.name, outcome);
    }
}

/// Spawn a language server, run the scenarios against it, and tear it down
///
/// The server is closed on every path, including when scenarios fail. If it
/// cannot be started, every scenario is recorded as failed.
pub async fn run_language_server_suite<S, I, A>(
    server: S,
    args: I,
    scenarios: &[TestScenario],
    read_timeout: Duration,
) -> TestRunResult
where
    S: AsRef<OsStr>,
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let mut result = TestRunResult::new();

    let mut client = match JsonRpcClient::spawn(server, args, read_timeout).await {
        Ok(client) => client,
        Err(e) => {
            let (kind, message) = match e {
                HarnessError::Transport { kind, message } => (kind, message),
                other => (TransportErrorKind::Spawn, other.to_string()),
            };
            for scenario in scenarios {
                println!("Running test {}", scenario.name);
                result.record(&scenario.name, Err(HarnessError::transport(kind, message.clone())));
            }
            return result;
        }
    };

    info!("Running {} scenario(s) against language server", scenarios.len());
    run_scenarios(&mut client, scenarios, &mut result).await;

    if let Err(e) = client.close().await {
        warn!("Language server teardown failed: {}", e);
    }

    result
}
