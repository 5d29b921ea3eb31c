//! CW-008: Interpreting backend: run a leaf command's action directly.
//!
//! Flags and args seed the environment; each step resolves against the
//! environment as it stands after the steps before it, runs, and is then
//! recorded under its name. First failure stops the chain.

use super::error::{Error, StepError};
use super::expr::Expr;
use super::render;
use super::resolver::{self, Backend, Piece, Scope};
use super::tree::LiveTree;
use super::types::Action;
use super::value::Value;
use crate::transport::{self, HttpRequest, HttpTransport};
use indexmap::IndexMap;
use std::io::Write;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Resolve expressions to values.
pub struct Evaluate<'a> {
    args: &'a [String],
}

impl<'a> Evaluate<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self { args }
    }
}

impl Backend for Evaluate<'_> {
    type Binding = Value;
    type Output = Value;

    fn literal(&self, value: &Value) -> Value {
        value.clone()
    }

    fn flag(&self, binding: &Value) -> Value {
        binding.clone()
    }

    /// Optional args that were not supplied resolve to null.
    fn arg(&self, position: usize) -> Value {
        self.args
            .get(position)
            .map(|a| Value::String(a.clone()))
            .unwrap_or_default()
    }

    fn step(&self, binding: &Value, path: &[String]) -> Value {
        binding.lookup(path)
    }

    fn template(&self, pieces: Vec<Piece<Value>>) -> Value {
        let mut text = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(t) => text.push_str(&t),
                Piece::Resolved(v) => text.push_str(&v.to_string()),
            }
        }
        Value::String(text)
    }

    fn list(&self, items: Vec<Value>) -> Value {
        Value::List(items)
    }

    fn object(&self, entries: Vec<(String, Value)>) -> Value {
        Value::Map(entries.into_iter().collect())
    }
}

/// Values visible to one action execution. Grows as steps finish.
#[derive(Debug, Clone)]
pub struct Environment {
    scope: Scope<Value>,
    args: Vec<String>,
}

impl Environment {
    pub fn new(flags: &IndexMap<String, String>, arg_names: &[String], args: Vec<String>) -> Self {
        let mut scope = Scope::new();
        for (name, value) in flags {
            scope.bind_flag(name.clone(), Value::String(value.clone()));
        }
        scope.bind_args(arg_names.iter().map(String::as_str));
        Self { scope, args }
    }

    pub fn resolve(&self, expr: &Expr) -> Result<Value, Error> {
        Ok(resolver::resolve(&Evaluate::new(&self.args), &self.scope, expr)?)
    }

    fn resolve_opt(&self, expr: Option<&Expr>) -> Result<Value, Error> {
        expr.map(|e| self.resolve(e))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn record_step(&mut self, name: &str, result: Value) {
        self.scope.bind_step(name, result);
    }

    pub fn step(&self, name: &str) -> Option<&Value> {
        self.scope.step(name)
    }

    pub fn last_step(&self) -> Option<&Value> {
        self.scope.last_step()
    }
}

/// Collaborators for one run.
pub struct RunConfig<'a> {
    pub transport: &'a dyn HttpTransport,
    pub cancel: &'a CancellationToken,
}

/// Execute an action's steps and render its output.
pub async fn run_action(
    cfg: &RunConfig<'_>,
    action: &Action,
    mut env: Environment,
    out: &mut dyn Write,
) -> Result<Environment, Error> {
    for step in &action.steps {
        let url = env.resolve(&step.url)?;
        let headers = env.resolve_opt(step.headers.as_ref())?;
        let body = env.resolve_opt(step.body.as_ref())?;
        let request = HttpRequest::from_values(&step.method, &url, &headers, &body);

        log::debug!("step {}: {} {}", step.name, request.method, request.url);
        let start = Instant::now();
        let result = transport::execute_step(cfg.transport, request, cfg.cancel)
            .await
            .map_err(|source| StepError {
                step: step.name.clone(),
                source,
            })?;
        log::debug!(
            "step {} finished in {:.3}s",
            step.name,
            start.elapsed().as_secs_f64()
        );
        env.record_step(&step.name, result);
    }

    if let Some(output) = &action.output {
        let format = output.format()?;
        let data = match &output.data {
            Some(expr) => env.resolve(expr)?,
            None => env.last_step().cloned().unwrap_or_default(),
        };
        render::render(out, format, &data, &output.columns)?;
    }

    Ok(env)
}

/// Run handler for the command at `path`: arity check, environment from
/// the flags visible there, then the action.
pub async fn run_command(
    cfg: &RunConfig<'_>,
    tree: &LiveTree,
    path: &[String],
    args: Vec<String>,
    out: &mut dyn Write,
) -> Result<(), Error> {
    let node = tree
        .find(path)
        .ok_or_else(|| Error::Usage(format!("unknown command: {}", path.join(" "))))?;
    node.check_args(args.len())?;

    let Some(action) = &node.action else {
        return Err(Error::Usage(format!(
            "'{}' requires a subcommand",
            node.name
        )));
    };

    if let Some(name) = tree.missing_required(path).first() {
        return Err(Error::Usage(format!("missing required flag --{}", name)));
    }

    let flags = tree.visible_flags(path);
    let env = Environment::new(&flags, &node.args, args);
    run_action(cfg, action, env, out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree;
    use crate::core::types::Specification;
    use crate::transport::{HttpResponse, MockTransport, TransportError};
    use serde_json::json;

    const SPEC: &str = r#"
name: vault
flags:
  - name: address
    default: H
commands:
  - name: kv
    commands:
      - name: list
        action:
          steps:
            - name: list
              method: LIST
              url: "${flag.address}/v1/secret/metadata"
          output:
            format: text
            data: "${step.list.body.data.keys}"
      - name: get
        args: [{name: path}]
        action:
          steps:
            - name: read
              url: "${flag.address}/v1/secret/data/${arg.path}"
            - name: audit
              method: POST
              url: "${flag.address}/v1/audit"
              body:
                path: "${arg.path}"
                version: "${step.read.body.data.version}"
          output:
            format: json
            data: "${step.read.body.data.data}"
      - name: rows
        action:
          steps:
            - name: fetch
              url: "${flag.address}/rows"
          output:
            format: table
            columns: [id, name, status]
            data: "${step.fetch.body}"
      - name: default-output
        action:
          steps:
            - name: one
              url: "${flag.address}/1"
            - name: two
              url: "${flag.address}/2"
          output:
            format: json
      - name: quiet
        action:
          steps: []
"#;

    fn tree() -> LiveTree {
        let spec: Specification = serde_yaml_ng::from_str(SPEC).unwrap();
        tree::build(&spec)
    }

    fn path(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    async fn run(
        mock: &MockTransport,
        p: &[&str],
        args: &[&str],
    ) -> (Result<(), Error>, String) {
        let cancel = CancellationToken::new();
        let cfg = RunConfig {
            transport: mock,
            cancel: &cancel,
        };
        let mut out = Vec::new();
        let result = run_command(
            &cfg,
            &tree(),
            &path(p),
            args.iter().map(|s| s.to_string()).collect(),
            &mut out,
        )
        .await;
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_cw008_evaluate_template() {
        let mut flags = IndexMap::new();
        flags.insert("address".to_string(), "H".to_string());
        let env = Environment::new(&flags, &path(&["path"]), vec!["P".into()]);
        let e = Expr::parse("${flag.address}/v1/secret/data/${arg.path}").unwrap();
        assert_eq!(env.resolve(&e).unwrap(), Value::from("H/v1/secret/data/P"));
    }

    #[test]
    fn test_cw008_missing_optional_arg_is_null() {
        let env = Environment::new(&IndexMap::new(), &path(&["a", "b"]), vec!["x".into()]);
        let e = Expr::parse("${arg.b}").unwrap();
        assert!(env.resolve(&e).unwrap().is_null());
        let e = Expr::parse("[${arg.b}]").unwrap();
        assert_eq!(env.resolve(&e).unwrap(), Value::from("[]"));
    }

    #[test]
    fn test_cw008_unknown_reference_names_kind() {
        let env = Environment::new(&IndexMap::new(), &[], vec![]);
        let err = env.resolve(&Expr::parse("${flag.nope}").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "unknown flag: nope");
        let err = env.resolve(&Expr::parse("${step.nope}").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "unknown step: nope");
    }

    #[test]
    fn test_cw008_step_resolvable_after_record() {
        let mut env = Environment::new(&IndexMap::new(), &[], vec![]);
        let e = Expr::parse("${step.list.body.data.keys}").unwrap();
        assert!(env.resolve(&e).is_err());
        env.record_step(
            "list",
            Value::from(json!({"status": 200, "body": {"data": {"keys": ["a"]}}})),
        );
        assert_eq!(env.resolve(&e).unwrap(), Value::from(json!(["a"])));
        assert!(env
            .resolve(&Expr::parse("${step.list.body.missing.keys}").unwrap())
            .unwrap()
            .is_null());
        assert!(env.step("list").is_some());
    }

    #[tokio::test]
    async fn test_cw008_text_output_from_nested_lookup() {
        let mock = MockTransport::new(vec![Ok(HttpResponse::new(
            200,
            r#"{"data":{"keys":["a","b"]}}"#,
        ))]);
        let (result, out) = run(&mock, &["kv", "list"], &[]).await;
        result.unwrap();
        assert_eq!(out, "[\"a\",\"b\"]\n");
        let reqs = mock.requests();
        assert_eq!(reqs[0].method, "LIST");
        assert_eq!(reqs[0].url, "H/v1/secret/metadata");
    }

    #[tokio::test]
    async fn test_cw008_later_steps_see_earlier_results() {
        let mock = MockTransport::new(vec![
            Ok(HttpResponse::new(
                200,
                r#"{"data":{"data":{"user":"u"},"version":7}}"#,
            )),
            Ok(HttpResponse::new(204, "")),
        ]);
        let (result, out) = run(&mock, &["kv", "get"], &["P"]).await;
        result.unwrap();
        assert_eq!(out, "{\n  \"user\": \"u\"\n}\n");
        let reqs = mock.requests();
        assert_eq!(reqs[0].url, "H/v1/secret/data/P");
        assert_eq!(reqs[1].body.as_deref(), Some(r#"{"path":"P","version":7}"#));
    }

    #[tokio::test]
    async fn test_cw008_step_failure_aborts_before_output() {
        let mock = MockTransport::new(vec![
            Ok(HttpResponse::new(403, "permission denied")),
            Ok(HttpResponse::new(200, "{}")),
        ]);
        let (result, out) = run(&mock, &["kv", "get"], &["P"]).await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "step read: HTTP 403: permission denied");
        assert!(out.is_empty());
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cw008_transport_error_names_step() {
        let mock = MockTransport::new(vec![Err(TransportError::Request("refused".into()))]);
        let (result, out) = run(&mock, &["kv", "list"], &[]).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "step list: request failed: refused"
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cw008_cancellation_wrapped_with_step() {
        let mock = MockTransport::hanging();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cfg = RunConfig {
            transport: &mock,
            cancel: &cancel,
        };
        let mut out = Vec::new();
        let err = run_command(&cfg, &tree(), &path(&["kv", "list"]), vec![], &mut out)
            .await
            .unwrap_err();
        match err {
            Error::Step(step) => {
                assert_eq!(step.step, "list");
                assert!(matches!(step.source, TransportError::Cancelled));
            }
            other => panic!("expected step error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_cw008_table_output() {
        let mock = MockTransport::new(vec![Ok(HttpResponse::new(
            200,
            r#"[{"id":1,"name":"a","status":"up"},{"id":2,"name":"b"}]"#,
        ))]);
        let (result, out) = run(&mock, &["kv", "rows"], &[]).await;
        result.unwrap();
        assert_eq!(out, "id\tname\tstatus\n1\ta\tup\n2\tb\t\n");
    }

    #[tokio::test]
    async fn test_cw008_output_defaults_to_last_step() {
        let mock = MockTransport::new(vec![
            Ok(HttpResponse::new(200, r#"{"n":1}"#)),
            Ok(HttpResponse::new(200, r#"{"n":2}"#)),
        ]);
        let (result, out) = run(&mock, &["kv", "default-output"], &[]).await;
        result.unwrap();
        assert_eq!(
            out,
            "{\n  \"status\": 200,\n  \"body\": {\n    \"n\": 2\n  }\n}\n"
        );
    }

    #[tokio::test]
    async fn test_cw008_no_steps_no_output() {
        let mock = MockTransport::new(vec![]);
        let (result, out) = run(&mock, &["kv", "quiet"], &[]).await;
        result.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cw008_arity_checked_before_steps() {
        let mock = MockTransport::new(vec![]);
        let (result, _) = run(&mock, &["kv", "get"], &[]).await;
        assert!(matches!(result, Err(Error::Arity(_))));
        let (result, _) = run(&mock, &["kv", "get"], &["a", "b"]).await;
        assert!(matches!(result, Err(Error::Arity(_))));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cw008_group_requires_subcommand() {
        let mock = MockTransport::new(vec![]);
        let (result, _) = run(&mock, &["kv"], &[]).await;
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[tokio::test]
    async fn test_cw008_unknown_format_is_error() {
        let yaml = r#"
name: t
commands:
  - name: x
    action:
      output:
        format: yaml
        data: hello
"#;
        let spec: Specification = serde_yaml_ng::from_str(yaml).unwrap();
        let tree = tree::build(&spec);
        let mock = MockTransport::new(vec![]);
        let cancel = CancellationToken::new();
        let cfg = RunConfig {
            transport: &mock,
            cancel: &cancel,
        };
        let mut out = Vec::new();
        let err = run_command(&cfg, &tree, &path(&["x"]), vec![], &mut out)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown output format: yaml");
    }
}
