//! CW-009: Support routines embedded in generated programs.
//!
//! Each routine is Rust source text mirroring the interpreter's behaviour
//! (`value`, `render`, `transport`) byte for byte. Only the routines whose
//! feature is in use are emitted.

use super::features::{Analysis, Feature};

const HEADER: &str = r#"#![allow(unused_variables)]

use clap::{ArgMatches, Command};
"#;

const VALUE_IMPORT: &str = "use serde_json::Value;\n";

const MAIN: &str = r#"
fn main() {
    let matches = cmd_root().get_matches();
    if let Err(e) = run_root(&matches) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
"#;

const ENV_FALLBACK: &str = r#"
fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}
"#;

const STRINGIFY: &str = r#"
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
"#;

const PATH_LOOKUP: &str = r#"
fn lookup(value: &Value, path: &[&str]) -> Value {
    let mut current = value;
    for key in path {
        match current.as_object().and_then(|map| map.get(*key)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}
"#;

const POSITIONAL: &str = r#"
fn positional(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}
"#;

const EXACT_ARITY: &str = r#"
fn check_exact(command: &str, args: &[String], n: usize) -> Result<(), String> {
    if args.len() != n {
        return Err(format!("{}: accepts {} arg(s), received {}", command, n, args.len()));
    }
    Ok(())
}
"#;

const MIN_ARITY: &str = r#"
fn check_min(command: &str, args: &[String], n: usize) -> Result<(), String> {
    if args.len() < n {
        return Err(format!(
            "{}: requires at least {} arg(s), only received {}",
            command,
            n,
            args.len()
        ));
    }
    Ok(())
}
"#;

const HTTP_STEP: &str = r#"
fn http_step(
    client: &reqwest::blocking::Client,
    method: &str,
    url: &Value,
    headers: &Value,
    body: &Value,
) -> Result<Value, String> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| format!("invalid method: {}", method))?;
    let mut request = client.request(method, stringify(url));
    let mut has_content_type = false;
    if let Value::Object(map) = headers {
        for (name, value) in map {
            has_content_type |= name.eq_ignore_ascii_case("content-type");
            request = request.header(name.as_str(), stringify(value));
        }
    }
    match body {
        Value::Null => {}
        Value::String(s) => request = request.body(s.clone()),
        other => {
            if !has_content_type {
                request = request.header("Content-Type", "application/json");
            }
            request = request.body(other.to_string());
        }
    }
    let response = request
        .send()
        .map_err(|e| format!("request failed: {}", e))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .map_err(|e| format!("request failed: {}", e))?;
    if !(200..300).contains(&status) {
        return Err(format!("HTTP {}: {}", status, text));
    }
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    let mut result = serde_json::Map::new();
    result.insert("status".to_string(), Value::from(status));
    result.insert("body".to_string(), body);
    Ok(Value::Object(result))
}
"#;

const RENDER_JSON: &str = r#"
fn render_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("cannot encode output: {}", e))?;
    println!("{}", text);
    Ok(())
}
"#;

const RENDER_TABLE: &str = r#"
fn render_table(value: &Value, columns: &[&str]) -> Result<(), String> {
    let rows = value
        .as_array()
        .ok_or_else(|| "table output requires an array".to_string())?;
    let columns: Vec<String> = if columns.is_empty() {
        rows.first()
            .and_then(Value::as_object)
            .map(|first| first.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        columns.iter().map(|c| c.to_string()).collect()
    };
    println!("{}", columns.join("\t"));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|col| row.get(col.as_str()).map(stringify).unwrap_or_default())
            .collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}
"#;

const RENDER_TEXT: &str = r#"
fn render_text(value: &Value) -> Result<(), String> {
    println!("{}", stringify(value));
    Ok(())
}
"#;

/// Program header: imports and `main`. `Value` is imported only when
/// some step or output needs it.
pub fn prelude(analysis: &Analysis) -> String {
    let needs_value = [
        Feature::HttpStep,
        Feature::RenderJson,
        Feature::RenderTable,
        Feature::RenderText,
    ]
    .iter()
    .any(|f| analysis.uses(*f));

    let mut src = HEADER.to_string();
    if needs_value {
        src.push_str(VALUE_IMPORT);
    }
    src.push_str(MAIN);
    src
}

/// Support routines for the features in use, in a fixed order.
pub fn support_routines(analysis: &Analysis) -> String {
    let table: [(Feature, &str); 10] = [
        (Feature::EnvFallback, ENV_FALLBACK),
        (Feature::Stringify, STRINGIFY),
        (Feature::PathLookup, PATH_LOOKUP),
        (Feature::Positional, POSITIONAL),
        (Feature::ExactArity, EXACT_ARITY),
        (Feature::MinArity, MIN_ARITY),
        (Feature::HttpStep, HTTP_STEP),
        (Feature::RenderJson, RENDER_JSON),
        (Feature::RenderTable, RENDER_TABLE),
        (Feature::RenderText, RENDER_TEXT),
    ];
    table
        .iter()
        .filter(|(feature, _)| analysis.uses(*feature))
        .map(|(_, source)| *source)
        .collect()
}
