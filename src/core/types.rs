//! CW-001: Specification data model.
//!
//! Defines the YAML schema for a declarative CLI: global flags, a command
//! tree, and per-leaf actions made of HTTP steps plus an output renderer.

use super::error::RenderError;
use super::expr::Expr;
use super::value::Value;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Top-level cliwright.yaml
// ============================================================================

/// Root of a CLI specification.
#[derive(Debug, Clone, Deserialize)]
pub struct Specification {
    /// Program name
    pub name: String,

    /// One-line description
    #[serde(default)]
    pub description: String,

    /// Global flags, visible to every command
    #[serde(default)]
    pub flags: Vec<Flag>,

    /// Top-level commands (order-preserving)
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl Specification {
    /// All flags in the specification, global ones first, then command
    /// flags in depth-first declaration order.
    pub fn all_flags(&self) -> Vec<&Flag> {
        let mut flags: Vec<&Flag> = self.flags.iter().collect();
        for command in &self.commands {
            command.walk(&mut |c| flags.extend(c.flags.iter()));
        }
        flags
    }
}

// ============================================================================
// Commands
// ============================================================================

/// A node of the command tree. Leaf when it has an action.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Positional arguments; order determines binding
    #[serde(default)]
    pub args: Vec<Arg>,

    /// Command-local flags
    #[serde(default)]
    pub flags: Vec<Flag>,

    #[serde(default)]
    pub action: Option<Action>,

    /// Child commands
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl Command {
    pub fn is_leaf(&self) -> bool {
        self.action.is_some()
    }

    /// `name <required> [optional]`, args in declaration order.
    pub fn usage(&self) -> String {
        let mut parts = vec![self.name.clone()];
        for arg in &self.args {
            if arg.required {
                parts.push(format!("<{}>", arg.name));
            } else {
                parts.push(format!("[{}]", arg.name));
            }
        }
        parts.join(" ")
    }

    /// Pre-order walk over this command and its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Command)) {
        f(self);
        for child in &self.commands {
            child.walk(f);
        }
    }
}

/// A named flag, bound once per invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct Flag {
    pub name: String,

    /// Single-character alias
    #[serde(default)]
    pub short: Option<char>,

    /// Declared default (scalars are stringified)
    #[serde(default, deserialize_with = "scalar_string")]
    pub default: String,

    /// Environment variable consulted before the default
    #[serde(default)]
    pub env: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,
}

impl Flag {
    /// Default after environment fallback: a set, non-empty env var wins.
    pub fn effective_default(&self) -> String {
        self.env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.default.clone())
    }
}

/// A positional argument.
#[derive(Debug, Clone, Deserialize)]
pub struct Arg {
    pub name: String,

    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Value::deserialize(deserializer)?.to_string())
}

// ============================================================================
// Actions
// ============================================================================

/// Executable behaviour of a leaf command.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    /// HTTP steps, executed in order
    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub output: Option<Output>,
}

/// One named HTTP call.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub url: Expr,

    #[serde(default)]
    pub headers: Option<Expr>,

    #[serde(default)]
    pub body: Option<Expr>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// How the action's result is presented.
#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    #[serde(default = "default_format")]
    pub format: String,

    /// Data to render; defaults to the last step's result
    #[serde(default)]
    pub data: Option<Expr>,

    /// Explicit table columns
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_format() -> String {
    "json".to_string()
}

impl Output {
    pub fn format(&self) -> Result<OutputFormat, RenderError> {
        self.format.parse()
    }
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputFormat {
    Json,
    Table,
    Text,
}

impl FromStr for OutputFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "text" => Ok(Self::Text),
            other => Err(RenderError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
            Self::Text => write!(f, "text"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
