//! CW-007: Generation pass 1: identifiers and feature usage.
//!
//! One walk over the whole specification assigns a Rust identifier to
//! every flag, step and command, and aggregates which support routines the
//! generated program needs. Emission is then conditioned on set
//! membership.

use super::expr::{Expr, Namespace};
use super::tree::Arity;
use super::types::{Command, OutputFormat, Specification};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Optional support routines of a generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    EnvFallback,
    HttpStep,
    PathLookup,
    Stringify,
    Positional,
    ExactArity,
    MinArity,
    RenderJson,
    RenderTable,
    RenderText,
}

pub type FeatureSet = BTreeSet<Feature>;

/// Result of pass 1.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub features: FeatureSet,
    /// Flag name → identifier
    pub flag_idents: HashMap<String, String>,
    /// Command path key → step name → identifier
    pub step_idents: HashMap<String, HashMap<String, String>>,
    /// Command path key → function suffix
    pub command_idents: HashMap<String, String>,
}

impl Analysis {
    pub fn uses(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Key for a command path (names below the root).
pub fn path_key(path: &[String]) -> String {
    path.join(" ")
}

/// Word-boundary-aware snake case: `my-flag`, `my_flag`, `my.flag` and
/// `myFlag` all become `my_flag`.
pub fn snake_ident(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    if words.is_empty() {
        "x".to_string()
    } else {
        words.join("_")
    }
}

/// Hands out identifiers, suffixing `_2`, `_3`... on collision.
#[derive(Debug, Default)]
struct Allocator {
    taken: HashSet<String>,
}

impl Allocator {
    fn claim(&mut self, base: String) -> String {
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Run pass 1 over a specification.
pub fn scan(spec: &Specification) -> Analysis {
    let mut analysis = Analysis::default();
    let mut commands = Allocator::default();
    commands.claim("root".to_string());
    analysis
        .command_idents
        .insert(String::new(), "root".to_string());

    for flag in &spec.flags {
        note_flag(&mut analysis, flag);
    }

    let mut path = Vec::new();
    for command in &spec.commands {
        scan_command(&mut analysis, &mut commands, &mut path, command);
    }

    log::debug!("feature scan: {:?}", analysis.features);
    analysis
}

fn note_flag(analysis: &mut Analysis, flag: &super::types::Flag) {
    if flag.env.is_some() {
        analysis.features.insert(Feature::EnvFallback);
    }
    analysis
        .flag_idents
        .insert(flag.name.clone(), format!("flag_{}", snake_ident(&flag.name)));
}

fn scan_command(
    analysis: &mut Analysis,
    commands: &mut Allocator,
    path: &mut Vec<String>,
    command: &Command,
) {
    path.push(command.name.clone());
    let key = path_key(path);

    let suffix = path.iter().map(|n| snake_ident(n)).collect::<Vec<_>>().join("_");
    analysis
        .command_idents
        .insert(key.clone(), commands.claim(suffix));

    for flag in &command.flags {
        note_flag(analysis, flag);
    }

    if !command.args.is_empty() {
        analysis.features.insert(Feature::Positional);
        analysis.features.insert(match Arity::from_args(&command.args) {
            Arity::Exact(_) => Feature::ExactArity,
            Arity::AtLeast(_) => Feature::MinArity,
        });
    }

    if let Some(action) = &command.action {
        let mut steps = Allocator::default();
        let mut idents = HashMap::new();
        for step in &action.steps {
            analysis.features.insert(Feature::HttpStep);
            analysis.features.insert(Feature::Stringify);
            idents.insert(
                step.name.clone(),
                steps.claim(format!("step_{}", snake_ident(&step.name))),
            );
            note_expr(analysis, &step.url);
            step.headers.iter().for_each(|e| note_expr(analysis, e));
            step.body.iter().for_each(|e| note_expr(analysis, e));
        }
        analysis.step_idents.insert(key, idents);

        if let Some(output) = &action.output {
            if let Some(data) = &output.data {
                note_expr(analysis, data);
            }
            match output.format() {
                Ok(OutputFormat::Json) => {
                    analysis.features.insert(Feature::RenderJson);
                }
                Ok(OutputFormat::Table) => {
                    analysis.features.insert(Feature::RenderTable);
                    analysis.features.insert(Feature::Stringify);
                }
                Ok(OutputFormat::Text) => {
                    analysis.features.insert(Feature::RenderText);
                    analysis.features.insert(Feature::Stringify);
                }
                Err(_) => {}
            }
        }
    }

    for child in &command.commands {
        scan_command(analysis, commands, path, child);
    }
    path.pop();
}

fn note_expr(analysis: &mut Analysis, expr: &Expr) {
    if expr.is_template() {
        analysis.features.insert(Feature::Stringify);
    }
    let mut lookup = false;
    expr.visit_refs(&mut |r| {
        if r.namespace == Namespace::Step && !r.path.is_empty() {
            lookup = true;
        }
    });
    if lookup {
        analysis.features.insert(Feature::PathLookup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scan_yaml(yaml: &str) -> Analysis {
        let spec: Specification = serde_yaml_ng::from_str(yaml).unwrap();
        scan(&spec)
    }

    #[test]
    fn test_cw007_snake_ident_normalizes() {
        assert_eq!(snake_ident("my-flag"), "my_flag");
        assert_eq!(snake_ident("my_flag"), "my_flag");
        assert_eq!(snake_ident("my.flag"), "my_flag");
        assert_eq!(snake_ident("myFlag"), "my_flag");
        assert_eq!(snake_ident("HTTPServer"), "httpserver");
        assert_eq!(snake_ident("api2Key"), "api2_key");
        assert_eq!(snake_ident("--"), "x");
    }

    #[test]
    fn test_cw007_minimal_spec_has_no_features() {
        let a = scan_yaml("name: empty\ncommands:\n  - name: noop\n");
        assert!(a.features.is_empty());
        assert_eq!(a.command_idents[""], "root");
        assert_eq!(a.command_idents["noop"], "noop");
    }

    #[test]
    fn test_cw007_features_aggregated() {
        let a = scan_yaml(
            r#"
name: vault
flags:
  - name: address
    env: VAULT_ADDR
commands:
  - name: kv
    commands:
      - name: get
        args: [{name: path}, {name: version, required: false}]
        action:
          steps:
            - name: read
              url: "${flag.address}/v1/${arg.path}"
          output:
            format: table
            data: "${step.read.body.data}"
      - name: raw
        action:
          steps:
            - name: read
              url: "${flag.address}/raw"
"#,
        );
        let expected: FeatureSet = [
            Feature::EnvFallback,
            Feature::HttpStep,
            Feature::PathLookup,
            Feature::Stringify,
            Feature::Positional,
            Feature::MinArity,
            Feature::RenderTable,
        ]
        .into_iter()
        .collect();
        assert_eq!(a.features, expected);
        assert_eq!(a.flag_idents["address"], "flag_address");
        assert_eq!(a.step_idents["kv get"]["read"], "step_read");
        assert_eq!(a.command_idents["kv get"], "kv_get");
    }

    #[test]
    fn test_cw007_json_only_skips_stringify() {
        let a = scan_yaml(
            r#"
name: t
commands:
  - name: show
    args: [{name: id}]
    action:
      output:
        data: "${arg.id}"
"#,
        );
        assert!(a.uses(Feature::RenderJson));
        assert!(a.uses(Feature::ExactArity));
        assert!(!a.uses(Feature::Stringify));
        assert!(!a.uses(Feature::HttpStep));
        assert!(!a.uses(Feature::EnvFallback));
    }

    #[test]
    fn test_cw007_colliding_names_get_suffixes() {
        let a = scan_yaml(
            r#"
name: t
commands:
  - name: kv-get
  - name: kv
    commands:
      - name: get
        action:
          steps:
            - name: a-b
              url: x
            - name: a_b
              url: y
"#,
        );
        assert_eq!(a.command_idents["kv-get"], "kv_get");
        assert_eq!(a.command_idents["kv get"], "kv_get_2");
        assert_eq!(a.step_idents["kv get"]["a-b"], "step_a_b");
        assert_eq!(a.step_idents["kv get"]["a_b"], "step_a_b_2");
    }

    proptest! {
        #[test]
        fn prop_cw007_snake_ident_is_valid_identifier_tail(name in "[a-zA-Z0-9._-]{0,24}") {
            let ident = snake_ident(&name);
            prop_assert!(!ident.is_empty());
            prop_assert!(ident.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            prop_assert!(!ident.starts_with('_') && !ident.ends_with('_'));
            prop_assert!(!ident.contains("__"));
        }

        #[test]
        fn prop_cw007_separator_choice_does_not_matter(
            words in proptest::collection::vec("[a-z][a-z0-9]{0,6}", 1..4)
        ) {
            let dashed = snake_ident(&words.join("-"));
            let dotted = snake_ident(&words.join("."));
            let underscored = snake_ident(&words.join("_"));
            prop_assert_eq!(&dashed, &dotted);
            prop_assert_eq!(&dashed, &underscored);
        }
    }
}
