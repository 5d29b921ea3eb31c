//! CW-017: YAML parsing and validation.
//!
//! Parses cliwright.yaml and validates structural constraints:
//! - Names must be non-empty and usable as clap ids
//! - Flag names and their generated identifiers must be unique
//! - Sibling commands, steps and args must be unique
//! - Output formats must be known
//!
//! Unknown references are not checked here; resolution reports them.

use super::error::ParseError;
use super::expr::Expr;
use super::features::snake_ident;
use super::types::*;
use super::value::Value;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap_or_else(|e| panic!("{}", e))
});

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| panic!("{}", e))
});

/// Flag names clap reserves for itself or that collide with the
/// positional collector.
const RESERVED_FLAGS: &[&str] = &["help", "args"];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a cliwright.yaml file from disk.
pub fn parse_spec_file(path: &Path) -> Result<Specification, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| ParseError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_spec(&content)
}

/// Parse a cliwright.yaml from a string.
pub fn parse_spec(yaml: &str) -> Result<Specification, ParseError> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed specification. Returns a list of errors (empty = valid).
pub fn validate_spec(spec: &Specification) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if spec.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    // Flags are checked across the whole specification
    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut idents: HashMap<String, &str> = HashMap::new();
    let mut shorts: HashMap<char, &str> = HashMap::new();
    for flag in spec.all_flags() {
        if !NAME.is_match(&flag.name) {
            push(format!("flag '{}' has an invalid name", flag.name));
        }
        if RESERVED_FLAGS.contains(&flag.name.as_str()) {
            push(format!("flag name '{}' is reserved", flag.name));
        }
        if !seen_names.insert(&flag.name) {
            push(format!("duplicate flag '{}'", flag.name));
            continue;
        }
        let ident = snake_ident(&flag.name);
        if let Some(other) = idents.insert(ident.clone(), &flag.name) {
            push(format!(
                "flags '{}' and '{}' both map to identifier 'flag_{}'",
                other, flag.name, ident
            ));
        }
        if let Some(short) = flag.short {
            if short == 'h' {
                push(format!("flag '{}' uses reserved short alias -h", flag.name));
            }
            if let Some(other) = shorts.insert(short, &flag.name) {
                push(format!(
                    "flags '{}' and '{}' share short alias -{}",
                    other, flag.name, short
                ));
            }
        }
        if let Some(var) = &flag.env {
            if !ENV_VAR.is_match(var) {
                push(format!(
                    "flag '{}' has an invalid environment variable '{}'",
                    flag.name, var
                ));
            }
        }
    }

    validate_commands(&spec.name, &spec.commands, &mut push);
    errors
}

fn validate_commands(parent: &str, commands: &[Command], push: &mut impl FnMut(String)) {
    let mut siblings = HashSet::new();
    for command in commands {
        if !NAME.is_match(&command.name) {
            push(format!("command '{}' has an invalid name", command.name));
        }
        if !siblings.insert(command.name.as_str()) {
            push(format!(
                "duplicate command '{}' under '{}'",
                command.name, parent
            ));
        }
        validate_command(command, push);
        validate_commands(&command.name, &command.commands, push);
    }
}

fn validate_command(command: &Command, push: &mut impl FnMut(String)) {
    let name = &command.name;

    let mut args = HashSet::new();
    let mut optional_seen = false;
    for arg in &command.args {
        if !args.insert(arg.name.as_str()) {
            push(format!("command '{}' has duplicate arg '{}'", name, arg.name));
        }
        if arg.required && optional_seen {
            log::warn!(
                "command '{}': required arg '{}' follows an optional arg",
                name,
                arg.name
            );
        }
        optional_seen |= !arg.required;
    }

    let Some(action) = &command.action else {
        return;
    };
    if !command.commands.is_empty() {
        push(format!(
            "command '{}' has both an action and subcommands",
            name
        ));
    }

    let mut steps = HashSet::new();
    for step in &action.steps {
        if step.name.is_empty() {
            push(format!("command '{}' has a step with no name", name));
        } else if !steps.insert(step.name.as_str()) {
            push(format!(
                "command '{}' has duplicate step '{}'",
                name, step.name
            ));
        }
        if is_blank(&step.url) {
            push(format!(
                "command '{}' step '{}' has no url",
                name, step.name
            ));
        }
    }

    if let Some(output) = &action.output {
        match output.format() {
            Ok(OutputFormat::Table) => {}
            Ok(format) => {
                if !output.columns.is_empty() {
                    push(format!(
                        "command '{}' declares columns on {} output",
                        name, format
                    ));
                }
            }
            Err(e) => push(format!("command '{}': {}", name, e)),
        }
    }
}

fn is_blank(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(Value::Null) => true,
        Expr::Literal(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}
