//! CW-003: Expression trees and expression-string parsing.
//!
//! `${flag.address}/v1/${arg.path}` is a template, `${step.list.body.data}`
//! on its own is a type-preserving reference, anything without `${` is a
//! literal. YAML lists and maps containing references become composite
//! nodes; without references they stay literals.

use super::error::ExprError;
use super::value::Value;
use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use std::fmt;

/// The three scopes an expression can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Flag,
    Arg,
    Step,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => write!(f, "flag"),
            Self::Arg => write!(f, "arg"),
            Self::Step => write!(f, "step"),
        }
    }
}

/// `namespace.name[.path...]`. Only step references carry a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub namespace: Namespace,
    pub name: String,
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: &[&str]) -> Self {
        self.path = path.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Parse the inside of `${...}`.
    ///
    /// Flag and arg names may themselves contain dots (`flag.my.flag` names
    /// the flag `my.flag`); step references split name and path at the
    /// first dot after the namespace.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let (ns, rest) = match text.split_once('.') {
            Some((ns, rest)) => (ns, rest),
            None => (text, ""),
        };
        let namespace = match ns {
            "flag" => Namespace::Flag,
            "arg" => Namespace::Arg,
            "step" => Namespace::Step,
            other => return Err(ExprError::UnknownNamespace(other.to_string())),
        };
        if rest.is_empty() {
            return Err(ExprError::MissingName(text.to_string()));
        }
        match namespace {
            Namespace::Step => {
                let mut segments = rest.split('.');
                let name = segments.next().unwrap_or_default();
                if name.is_empty() {
                    return Err(ExprError::MissingName(text.to_string()));
                }
                Ok(Self {
                    namespace,
                    name: name.to_string(),
                    path: segments.map(str::to_string).collect(),
                })
            }
            _ => Ok(Self::new(namespace, rest)),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

/// One piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Ref(Reference),
}

/// A parsed expression. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Reference(Reference),
    Template(Vec<Fragment>),
    List(Vec<Expr>),
    Object(IndexMap<String, Expr>),
}

impl Expr {
    /// Parse an expression string.
    pub fn parse(text: &str) -> Result<Expr, ExprError> {
        let mut fragments = Vec::new();
        let mut start = 0;

        while let Some(open) = text[start..].find("${") {
            let open = start + open;
            let close = text[open..]
                .find('}')
                .ok_or(ExprError::Unclosed(open))?;
            let close = open + close;
            let inner = text[open + 2..close].trim();
            if inner.is_empty() {
                return Err(ExprError::Empty(open));
            }
            if open > start {
                fragments.push(Fragment::Text(text[start..open].to_string()));
            }
            fragments.push(Fragment::Ref(Reference::parse(inner)?));
            start = close + 1;
        }

        if fragments.is_empty() {
            return Ok(Expr::Literal(Value::String(text.to_string())));
        }
        if start < text.len() {
            fragments.push(Fragment::Text(text[start..].to_string()));
        }
        if fragments.len() == 1 {
            if let Some(Fragment::Ref(reference)) = fragments.pop() {
                return Ok(Expr::Reference(reference));
            }
        }
        Ok(Expr::Template(fragments))
    }

    /// Build an expression from a declared YAML/JSON value.
    pub fn from_value(value: Value) -> Result<Expr, ExprError> {
        match value {
            Value::String(s) => Expr::parse(&s),
            Value::List(items) => {
                let exprs = items
                    .into_iter()
                    .map(Expr::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(collapse_list(exprs))
            }
            Value::Map(map) => {
                let mut entries = IndexMap::new();
                for (k, v) in map {
                    entries.insert(k, Expr::from_value(v)?);
                }
                Ok(collapse_object(entries))
            }
            scalar => Ok(Expr::Literal(scalar)),
        }
    }

    /// Visit every reference in declaration order.
    pub fn visit_refs<'a>(&'a self, f: &mut impl FnMut(&'a Reference)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(r) => f(r),
            Expr::Template(parts) => {
                for part in parts {
                    if let Fragment::Ref(r) = part {
                        f(r);
                    }
                }
            }
            Expr::List(items) => items.iter().for_each(|e| e.visit_refs(f)),
            Expr::Object(entries) => entries.values().for_each(|e| e.visit_refs(f)),
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Expr::Template(_))
    }
}

fn collapse_list(items: Vec<Expr>) -> Expr {
    if items.iter().all(|e| matches!(e, Expr::Literal(_))) {
        let values = items
            .into_iter()
            .filter_map(|e| match e {
                Expr::Literal(v) => Some(v),
                _ => None,
            })
            .collect();
        return Expr::Literal(Value::List(values));
    }
    Expr::List(items)
}

fn collapse_object(entries: IndexMap<String, Expr>) -> Expr {
    if entries.values().all(|e| matches!(e, Expr::Literal(_))) {
        let map = entries
            .into_iter()
            .filter_map(|(k, e)| match e {
                Expr::Literal(v) => Some((k, v)),
                _ => None,
            })
            .collect();
        return Expr::Literal(Value::Map(map));
    }
    Expr::Object(entries)
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expr::from_value(value).map_err(de::Error::custom)
    }
}
