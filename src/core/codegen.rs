//! CW-009: Compiling backend: specification to standalone Rust source.
//!
//! Pass 1 (`features::scan`) names everything and decides which support
//! routines are needed. Pass 2 emits, per command, a clap builder
//! `cmd_<id>()` and a run function `run_<id>()`. Expressions go through the
//! shared resolver with the `Emit` backend, so unknown names abort
//! generation exactly where the interpreter would fail.

use super::build;
use super::error::{Error, FormatError};
use super::features::{self, path_key, Analysis};
use super::resolver::{self, Backend, Piece, Scope};
use super::runtime;
use super::tree::Arity;
use super::types::{Action, Command, Flag, OutputFormat, Specification};
use super::value::Value;
use crate::transport;

/// Resolve expressions to Rust source fragments of type `serde_json::Value`.
pub struct Emit;

impl Backend for Emit {
    /// Generated identifier
    type Binding = String;
    type Output = String;

    fn literal(&self, value: &Value) -> String {
        value_source(value)
    }

    fn flag(&self, binding: &String) -> String {
        format!("Value::String({}.clone())", binding)
    }

    fn arg(&self, position: usize) -> String {
        format!(
            "args.get({}).cloned().map(Value::String).unwrap_or(Value::Null)",
            position
        )
    }

    fn step(&self, binding: &String, path: &[String]) -> String {
        if path.is_empty() {
            format!("{}.clone()", binding)
        } else {
            format!("lookup(&{}, &[{}])", binding, quoted_list(path))
        }
    }

    fn template(&self, pieces: Vec<Piece<String>>) -> String {
        let parts: Vec<String> = pieces
            .into_iter()
            .map(|piece| match piece {
                Piece::Text(text) => format!("String::from({:?})", text),
                Piece::Resolved(src) => format!("stringify(&{})", src),
            })
            .collect();
        format!("Value::String([{}].concat())", parts.join(", "))
    }

    fn list(&self, items: Vec<String>) -> String {
        format!("Value::Array(vec![{}])", items.join(", "))
    }

    fn object(&self, entries: Vec<(String, String)>) -> String {
        object_source(entries)
    }
}

/// Rust expression constructing `value` as a `serde_json::Value`.
pub fn value_source(value: &Value) -> String {
    match value {
        Value::Null => "Value::Null".to_string(),
        Value::Bool(b) => format!("Value::Bool({})", b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                format!("Value::from({}u64)", u)
            } else if let Some(i) = n.as_i64() {
                format!("Value::from({}i64)", i)
            } else {
                format!("Value::from({:?}f64)", n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => format!("Value::String(String::from({:?}))", s),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(value_source).collect();
            format!("Value::Array(vec![{}])", items.join(", "))
        }
        Value::Map(map) => object_source(
            map.iter()
                .map(|(k, v)| (k.clone(), value_source(v)))
                .collect(),
        ),
    }
}

fn object_source(entries: Vec<(String, String)>) -> String {
    if entries.is_empty() {
        return "Value::Object(serde_json::Map::new())".to_string();
    }
    let entries: Vec<String> = entries
        .into_iter()
        .map(|(k, v)| format!("(String::from({:?}), {})", k, v))
        .collect();
    format!(
        "Value::Object([{}].into_iter().collect())",
        entries.join(", ")
    )
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("{:?}", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Output of the compiling backend.
#[derive(Debug, Clone)]
pub struct Generated {
    pub source: String,
    pub analysis: Analysis,
    /// Set when the formatter failed; `source` is then unformatted.
    pub format_error: Option<FormatError>,
}

/// Generate and format a program. Formatter failure is not fatal.
pub fn generate(spec: &Specification) -> Result<Generated, Error> {
    let (raw, analysis) = generate_unformatted(spec)?;
    let generated = match build::format_source(&raw) {
        Ok(source) => Generated {
            source,
            analysis,
            format_error: None,
        },
        Err(e) => {
            log::warn!("{}; returning unformatted source", e);
            Generated {
                source: raw,
                analysis,
                format_error: Some(e),
            }
        }
    };
    Ok(generated)
}

/// Generate source without running the formatter.
pub fn generate_unformatted(spec: &Specification) -> Result<(String, Analysis), Error> {
    let analysis = features::scan(spec);
    let mut emitter = Emitter {
        spec,
        analysis: &analysis,
        out: String::new(),
    };
    emitter.out.push_str(&runtime::prelude(&analysis));
    emitter.out.push_str(&runtime::support_routines(&analysis));
    emitter.emit_root();
    let mut path = Vec::new();
    for command in &spec.commands {
        emitter.emit_command(&mut path, command)?;
    }
    let source = emitter.out;
    log::debug!(
        "generated {} bytes of source for '{}'",
        source.len(),
        spec.name
    );
    Ok((source, analysis))
}

struct Emitter<'a> {
    spec: &'a Specification,
    analysis: &'a Analysis,
    out: String,
}

impl Emitter<'_> {
    fn ident(&self, path: &[String]) -> &str {
        self.analysis
            .command_idents
            .get(&path_key(path))
            .map(String::as_str)
            .unwrap_or("root")
    }

    fn emit_root(&mut self) {
        let spec = self.spec;
        let children: Vec<(String, String)> = spec
            .commands
            .iter()
            .map(|c| {
                let child = vec![c.name.clone()];
                (c.name.clone(), self.ident(&child).to_string())
            })
            .collect();

        let mut builder = format!(
            "Command::new({:?})\n        .about({:?})",
            spec.name, spec.description
        );
        for flag in &spec.flags {
            builder.push_str(&flag_arg_source(flag, true));
        }
        push_subcommands(&mut builder, &children);

        self.out.push_str(&format!(
            "\nfn cmd_root() -> Command {{\n    {}\n}}\n",
            builder
        ));
        self.out.push_str(&format!(
            "\nfn run_root(matches: &ArgMatches) -> Result<(), String> {{\n{}}}\n",
            dispatch_source(&spec.name, &children)
        ));
    }

    fn emit_command(&mut self, path: &mut Vec<String>, command: &Command) -> Result<(), Error> {
        path.push(command.name.clone());
        let id = self.ident(path).to_string();

        let children: Vec<(String, String)> = command
            .commands
            .iter()
            .map(|c| {
                let mut child = path.clone();
                child.push(c.name.clone());
                (c.name.clone(), self.ident(&child).to_string())
            })
            .collect();

        let mut builder = format!(
            "Command::new({:?})\n        .about({:?})",
            command.name, command.description
        );
        if !command.args.is_empty() {
            builder.push_str(&format!("\n        .override_usage({:?})", command.usage()));
        }
        for flag in &command.flags {
            builder.push_str(&flag_arg_source(flag, false));
        }
        if !command.args.is_empty() {
            builder.push_str(
                "\n        .arg(clap::Arg::new(\"args\").num_args(0..).action(clap::ArgAction::Append))",
            );
            if !children.is_empty() {
                builder.push_str("\n        .args_conflicts_with_subcommands(true)");
            }
        }
        push_subcommands(&mut builder, &children);

        self.out.push_str(&format!(
            "\nfn cmd_{}() -> Command {{\n    {}\n}}\n",
            id, builder
        ));

        let mut body = String::new();
        match &command.action {
            Some(action) => {
                if !command.args.is_empty() {
                    body.push_str(&arity_source(command, "    "));
                }
                body.push_str(&self.action_source(path, command, action)?);
            }
            None => {
                // A chosen subcommand owns the positionals; the group's own
                // arity only applies when it is the final node
                if !command.args.is_empty() {
                    body.push_str("    if matches.subcommand().is_none() {\n");
                    body.push_str(&arity_source(command, "        "));
                    body.push_str("    }\n");
                }
                body.push_str(&dispatch_source(&command.name, &children));
            }
        }
        self.out.push_str(&format!(
            "\nfn run_{}(matches: &ArgMatches) -> Result<(), String> {{\n{}}}\n",
            id, body
        ));

        for child in &command.commands {
            self.emit_command(path, child)?;
        }
        path.pop();
        Ok(())
    }

    /// Leaf run body: flag bindings, steps in order, then output.
    fn action_source(
        &self,
        path: &[String],
        command: &Command,
        action: &Action,
    ) -> Result<String, Error> {
        let mut body = String::new();
        let mut scope: Scope<String> = Scope::new();
        scope.bind_args(command.args.iter().map(|a| a.name.as_str()));

        let visible: Vec<&Flag> = self.spec.flags.iter().chain(command.flags.iter()).collect();
        for flag in &visible {
            let ident = self.flag_ident(flag);
            let fallback = if let Some(var) = &flag.env {
                format!("env_or({:?}, {:?})", var, flag.default)
            } else {
                format!("String::from({:?})", flag.default)
            };
            body.push_str(&format!(
                "    let {}: String = matches.get_one::<String>({:?}).cloned().unwrap_or_else(|| {});\n",
                ident, flag.name, fallback
            ));
            scope.bind_flag(flag.name.clone(), ident);
        }
        for flag in visible.iter().filter(|f| f.required) {
            body.push_str(&format!(
                "    if {}.is_empty() {{\n        return Err(String::from({:?}));\n    }}\n",
                self.flag_ident(flag),
                format!("missing required flag --{}", flag.name)
            ));
        }

        let step_idents = self.analysis.step_idents.get(&path_key(path));
        if !action.steps.is_empty() {
            body.push_str(&format!(
                "    let client = reqwest::blocking::Client::builder()\n        .timeout(std::time::Duration::from_secs({}))\n        .user_agent({:?})\n        .build()\n        .map_err(|e| format!(\"request failed: {{}}\", e))?;\n",
                transport::DEFAULT_TIMEOUT_SECS,
                transport::USER_AGENT
            ));
        }
        for step in &action.steps {
            let ident = step_idents
                .and_then(|m| m.get(&step.name))
                .cloned()
                .unwrap_or_else(|| format!("step_{}", features::snake_ident(&step.name)));
            let url = resolver::resolve(&Emit, &scope, &step.url)?;
            let headers = match &step.headers {
                Some(e) => resolver::resolve(&Emit, &scope, e)?,
                None => "Value::Null".to_string(),
            };
            let body_src = match &step.body {
                Some(e) => resolver::resolve(&Emit, &scope, e)?,
                None => "Value::Null".to_string(),
            };
            body.push_str(&format!(
                "    let {ident} = http_step(&client, {method:?}, &{url}, &{headers}, &{body_src})\n        .map_err(|e| format!(\"step {{}}: {{}}\", {name:?}, e))?;\n",
                ident = ident,
                method = step.method.to_uppercase(),
                url = url,
                headers = headers,
                body_src = body_src,
                name = step.name,
            ));
            scope.bind_step(step.name.clone(), ident);
        }

        match &action.output {
            Some(output) => {
                let format = output.format()?;
                let data = match &output.data {
                    Some(expr) => resolver::resolve(&Emit, &scope, expr)?,
                    None => scope
                        .last_step()
                        .map(|ident| format!("{}.clone()", ident))
                        .unwrap_or_else(|| "Value::Null".to_string()),
                };
                body.push_str(&format!("    let data: Value = {};\n", data));
                body.push_str(&match format {
                    OutputFormat::Json => "    render_json(&data)\n".to_string(),
                    OutputFormat::Text => "    render_text(&data)\n".to_string(),
                    OutputFormat::Table => format!(
                        "    render_table(&data, &[{}])\n",
                        quoted_list(&output.columns)
                    ),
                });
            }
            None => body.push_str("    Ok(())\n"),
        }
        Ok(body)
    }

    fn flag_ident(&self, flag: &Flag) -> String {
        self.analysis
            .flag_idents
            .get(&flag.name)
            .cloned()
            .unwrap_or_else(|| format!("flag_{}", features::snake_ident(&flag.name)))
    }
}

fn flag_arg_source(flag: &Flag, global: bool) -> String {
    let mut src = format!(
        "\n        .arg(clap::Arg::new({:?}).long({:?})",
        flag.name, flag.name
    );
    if let Some(short) = flag.short {
        src.push_str(&format!(".short({:?})", short));
    }
    if !flag.description.is_empty() {
        src.push_str(&format!(".help({:?})", flag.description));
    }
    if global {
        src.push_str(".global(true)");
    }
    src.push(')');
    src
}

fn arity_source(command: &Command, indent: &str) -> String {
    let check = match Arity::from_args(&command.args) {
        Arity::Exact(n) => format!("check_exact({:?}, &args, {})?;", command.name, n),
        Arity::AtLeast(n) => format!("check_min({:?}, &args, {})?;", command.name, n),
    };
    format!(
        "{indent}let args = positional(matches);\n{indent}{check}\n",
        indent = indent,
        check = check
    )
}

fn push_subcommands(builder: &mut String, children: &[(String, String)]) {
    if children.is_empty() {
        return;
    }
    builder.push_str("\n        .subcommand_required(true)\n        .arg_required_else_help(true)");
    for (_, id) in children {
        builder.push_str(&format!("\n        .subcommand(cmd_{}())", id));
    }
}

fn dispatch_source(name: &str, children: &[(String, String)]) -> String {
    let missing = format!("'{}' requires a subcommand", name);
    if children.is_empty() {
        return format!("    Err(String::from({:?}))\n", missing);
    }
    let mut src = String::from("    match matches.subcommand() {\n");
    for (child, id) in children {
        src.push_str(&format!(
            "        Some(({:?}, sub)) => run_{}(sub),\n",
            child, id
        ));
    }
    src.push_str(&format!(
        "        _ => Err(String::from({:?})),\n    }}\n",
        missing
    ));
    src
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ReferenceError;
    use crate::core::expr::Expr;

    const VAULT: &str = r#"
name: vault
description: Tiny Vault client
flags:
  - name: address
    short: a
    default: http://127.0.0.1:8200
    env: VAULT_ADDR
  - name: token
    required: true
commands:
  - name: kv
    description: Key/value secrets
    commands:
      - name: get
        args: [{name: path}]
        action:
          steps:
            - name: read
              url: "${flag.address}/v1/secret/data/${arg.path}"
              headers:
                X-Vault-Token: "${flag.token}"
          output:
            format: json
            data: "${step.read.body.data.data}"
      - name: list
        args: [{name: prefix, required: false}]
        flags:
          - name: columns-only
        action:
          steps:
            - name: list
              method: list
              url: "${flag.address}/v1/secret/metadata/${arg.prefix}"
          output:
            format: table
            columns: [id, name, status]
            data: "${step.list.body.data.keys}"
"#;

    fn spec(yaml: &str) -> Specification {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn src(yaml: &str) -> String {
        generate_unformatted(&spec(yaml)).unwrap().0
    }

    fn emit(text: &str, scope: &Scope<String>) -> Result<String, ReferenceError> {
        resolver::resolve(&Emit, scope, &Expr::parse(text).unwrap())
    }

    #[test]
    fn test_cw009_emit_template() {
        let mut scope = Scope::new();
        scope.bind_flag("address", "flag_address".to_string());
        scope.bind_args(["path"]);
        let out = emit("${flag.address}/v1/secret/data/${arg.path}", &scope).unwrap();
        assert_eq!(
            out,
            "Value::String([stringify(&Value::String(flag_address.clone())), \
             String::from(\"/v1/secret/data/\"), \
             stringify(&args.get(0).cloned().map(Value::String).unwrap_or(Value::Null))].concat())"
        );
    }

    #[test]
    fn test_cw009_emit_step_lookup() {
        let mut scope = Scope::new();
        scope.bind_step("list", "step_list".to_string());
        assert_eq!(
            emit("${step.list.body.data.keys}", &scope).unwrap(),
            "lookup(&step_list, &[\"body\", \"data\", \"keys\"])"
        );
        assert_eq!(emit("${step.list}", &scope).unwrap(), "step_list.clone()");
    }

    #[test]
    fn test_cw009_emit_unknown_names() {
        let scope: Scope<String> = Scope::new();
        assert_eq!(
            emit("${flag.nope}", &scope),
            Err(ReferenceError::UnknownFlag("nope".into()))
        );
        assert_eq!(
            emit("${arg.nope}", &scope),
            Err(ReferenceError::UnknownArg("nope".into()))
        );
        assert_eq!(
            emit("${step.nope.body}", &scope),
            Err(ReferenceError::UnknownStep("nope".into()))
        );
    }

    #[test]
    fn test_cw009_value_source() {
        let v = Value::from(serde_json::json!({"a": [1, -2, 2.5, null, true, "q\"uote"]}));
        assert_eq!(
            value_source(&v),
            "Value::Object([(String::from(\"a\"), Value::Array(vec![Value::from(1u64), \
             Value::from(-2i64), Value::from(2.5f64), Value::Null, Value::Bool(true), \
             Value::String(String::from(\"q\\\"uote\"))]))].into_iter().collect())"
        );
        assert_eq!(
            value_source(&Value::Map(Default::default())),
            "Value::Object(serde_json::Map::new())"
        );
    }

    #[test]
    fn test_cw009_program_structure() {
        let s = src(VAULT);
        assert!(s.contains("fn main()"));
        assert!(s.contains("fn cmd_root() -> Command"));
        assert!(s.contains("fn run_root(matches: &ArgMatches)"));
        assert!(s.contains("fn cmd_kv_get() -> Command"));
        assert!(s.contains("fn run_kv_list(matches: &ArgMatches)"));
        assert!(s.contains("Some((\"kv\", sub)) => run_kv(sub),"));
        assert!(s.contains("Some((\"get\", sub)) => run_kv_get(sub),"));
    }

    #[test]
    fn test_cw009_usage_and_arity() {
        let s = src(VAULT);
        assert!(s.contains(".override_usage(\"get <path>\")"));
        assert!(s.contains(".override_usage(\"list [prefix]\")"));
        assert!(s.contains("check_exact(\"get\", &args, 1)?;"));
        assert!(s.contains("check_min(\"list\", &args, 0)?;"));
    }

    #[test]
    fn test_cw009_group_arity_only_without_subcommand() {
        let s = src(
            r#"
name: t
commands:
  - name: kv
    args: [{name: mount}]
    commands:
      - name: get
        args: [{name: path}]
        action: {}
"#,
        );
        let run_kv = s.split("fn run_kv(").nth(1).unwrap();
        let run_kv = &run_kv[..run_kv.find("\n}\n").unwrap()];
        let guard = run_kv.find("if matches.subcommand().is_none() {").unwrap();
        let check = run_kv.find("check_exact(\"kv\", &args, 1)?;").unwrap();
        let dispatch = run_kv.find("match matches.subcommand()").unwrap();
        assert!(guard < check && check < dispatch);
        assert!(s.contains("check_exact(\"get\", &args, 1)?;"));
    }

    #[test]
    fn test_cw009_client_matches_interpreter() {
        let s = src(VAULT);
        assert!(s.contains(&format!(
            ".timeout(std::time::Duration::from_secs({}))",
            transport::DEFAULT_TIMEOUT_SECS
        )));
        assert!(s.contains(&format!(".user_agent({:?})", transport::USER_AGENT)));
    }

    #[test]
    fn test_cw009_flags_global_and_local() {
        let s = src(VAULT);
        assert!(s.contains(
            ".arg(clap::Arg::new(\"address\").long(\"address\").short('a').global(true))"
        ));
        assert!(s.contains(".arg(clap::Arg::new(\"columns-only\").long(\"columns-only\"))"));
        assert!(s.contains(
            "let flag_address: String = matches.get_one::<String>(\"address\").cloned()\
             .unwrap_or_else(|| env_or(\"VAULT_ADDR\", \"http://127.0.0.1:8200\"));"
        ));
        assert!(s.contains("let flag_columns_only: String"));
        assert!(s.contains("\"missing required flag --token\""));
    }

    #[test]
    fn test_cw009_steps_and_output() {
        let s = src(VAULT);
        assert!(s.contains("let step_read = http_step(&client, \"GET\""));
        assert!(s.contains("let step_list = http_step(&client, \"LIST\""));
        assert!(s.contains(".map_err(|e| format!(\"step {}: {}\", \"read\", e))?;"));
        assert!(s.contains("let data: Value = lookup(&step_read, &[\"body\", \"data\", \"data\"]);"));
        assert!(s.contains("render_json(&data)"));
        assert!(s.contains("render_table(&data, &[\"id\", \"name\", \"status\"])"));
        assert!(s.contains(
            "&Value::Object([(String::from(\"X-Vault-Token\"), Value::String(flag_token.clone()))].into_iter().collect())"
        ));
    }

    #[test]
    fn test_cw009_support_routines_follow_features() {
        let s = src(VAULT);
        for routine in ["fn env_or", "fn stringify", "fn lookup", "fn http_step", "fn render_json", "fn render_table", "fn check_exact", "fn check_min"] {
            assert!(s.contains(routine), "missing {}", routine);
        }
        assert!(!s.contains("fn render_text"));
    }

    #[test]
    fn test_cw009_minimal_program() {
        let s = src("name: hello\ncommands:\n  - name: noop\n");
        assert!(!s.contains("fn http_step"));
        assert!(!s.contains("fn env_or"));
        assert!(!s.contains("fn stringify"));
        assert!(!s.contains("use serde_json::Value;"));
        assert!(s.contains("Err(String::from(\"'noop' requires a subcommand\"))"));
    }

    #[test]
    fn test_cw009_default_data_is_last_step() {
        let s = src(
            r#"
name: t
commands:
  - name: two
    action:
      steps:
        - name: first
          url: http://x/1
        - name: second
          url: http://x/2
      output:
        format: text
"#,
        );
        assert!(s.contains("let data: Value = step_second.clone();"));
        assert!(s.contains("render_text(&data)"));
    }

    #[test]
    fn test_cw009_no_steps_output_is_null() {
        let s = src(
            r#"
name: t
commands:
  - name: nothing
    action:
      output: {}
"#,
        );
        assert!(s.contains("let data: Value = Value::Null;"));
        assert!(!s.contains("reqwest::blocking::Client::builder()"));
    }

    #[test]
    fn test_cw009_forward_step_reference_aborts() {
        let yaml = r#"
name: t
commands:
  - name: bad
    action:
      steps:
        - name: first
          url: "${step.second.body.url}"
        - name: second
          url: http://x
"#;
        let err = generate_unformatted(&spec(yaml)).unwrap_err();
        assert_eq!(err.to_string(), "unknown step: second");
    }

    #[test]
    fn test_cw009_ancestor_local_flag_not_visible() {
        let yaml = r#"
name: t
commands:
  - name: kv
    flags: [{name: mount}]
    commands:
      - name: get
        action:
          steps:
            - name: s
              url: "${flag.mount}"
"#;
        let err = generate_unformatted(&spec(yaml)).unwrap_err();
        assert_eq!(err.to_string(), "unknown flag: mount");
    }

    #[test]
    fn test_cw009_unknown_format_aborts() {
        let yaml = r#"
name: t
commands:
  - name: x
    action:
      output: {format: yaml}
"#;
        let err = generate_unformatted(&spec(yaml)).unwrap_err();
        assert_eq!(err.to_string(), "unknown output format: yaml");
    }

    #[test]
    fn test_cw009_generate_always_returns_source() {
        let g = generate(&spec(VAULT)).unwrap();
        assert!(g.source.contains("fn run_kv_get"));
        if let Some(e) = &g.format_error {
            assert!(e.to_string().starts_with("rustfmt failed"));
        }
    }
}
