//! CW-004: Shared expression resolver.
//!
//! One walker for both realizations. A `Backend` decides what a resolved
//! node becomes (a Rust source fragment or a runtime value); the walker
//! owns namespace lookup, so unknown names fail identically everywhere.

use super::error::ReferenceError;
use super::expr::{Expr, Fragment, Namespace, Reference};
use super::value::Value;
use indexmap::IndexMap;

/// A resolved template piece, still split into text and references.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece<T> {
    Text(String),
    Resolved(T),
}

/// Emit-source or emit-value capability.
pub trait Backend {
    /// What a flag or step name is bound to.
    type Binding;
    type Output;

    fn literal(&self, value: &Value) -> Self::Output;
    fn flag(&self, binding: &Self::Binding) -> Self::Output;
    fn arg(&self, position: usize) -> Self::Output;
    fn step(&self, binding: &Self::Binding, path: &[String]) -> Self::Output;
    fn template(&self, pieces: Vec<Piece<Self::Output>>) -> Self::Output;
    fn list(&self, items: Vec<Self::Output>) -> Self::Output;
    fn object(&self, entries: Vec<(String, Self::Output)>) -> Self::Output;
}

/// Namespace table: flag and step names to bindings, arg names to positions.
#[derive(Debug, Clone)]
pub struct Scope<B> {
    flags: IndexMap<String, B>,
    args: IndexMap<String, usize>,
    steps: IndexMap<String, B>,
}

impl<B> Default for Scope<B> {
    fn default() -> Self {
        Self {
            flags: IndexMap::new(),
            args: IndexMap::new(),
            steps: IndexMap::new(),
        }
    }
}

impl<B> Scope<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_flag(&mut self, name: impl Into<String>, binding: B) {
        self.flags.insert(name.into(), binding);
    }

    /// Bind arg names to their declared positions.
    pub fn bind_args<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for (position, name) in names.into_iter().enumerate() {
            self.args.insert(name.to_string(), position);
        }
    }

    /// Make a finished step resolvable.
    pub fn bind_step(&mut self, name: impl Into<String>, binding: B) {
        self.steps.insert(name.into(), binding);
    }

    pub fn step(&self, name: &str) -> Option<&B> {
        self.steps.get(name)
    }

    /// Binding of the most recently bound step.
    pub fn last_step(&self) -> Option<&B> {
        self.steps.last().map(|(_, b)| b)
    }
}

/// Resolve an expression against a scope.
pub fn resolve<K: Backend>(
    backend: &K,
    scope: &Scope<K::Binding>,
    expr: &Expr,
) -> Result<K::Output, ReferenceError> {
    match expr {
        Expr::Literal(value) => Ok(backend.literal(value)),
        Expr::Reference(reference) => resolve_reference(backend, scope, reference),
        Expr::Template(fragments) => {
            let mut pieces = Vec::with_capacity(fragments.len());
            for fragment in fragments {
                pieces.push(match fragment {
                    Fragment::Text(text) => Piece::Text(text.clone()),
                    Fragment::Ref(reference) => {
                        Piece::Resolved(resolve_reference(backend, scope, reference)?)
                    }
                });
            }
            Ok(backend.template(pieces))
        }
        Expr::List(items) => {
            let resolved = items
                .iter()
                .map(|item| resolve(backend, scope, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(backend.list(resolved))
        }
        Expr::Object(entries) => {
            let mut resolved = Vec::with_capacity(entries.len());
            for (key, item) in entries {
                resolved.push((key.clone(), resolve(backend, scope, item)?));
            }
            Ok(backend.object(resolved))
        }
    }
}

fn resolve_reference<K: Backend>(
    backend: &K,
    scope: &Scope<K::Binding>,
    reference: &Reference,
) -> Result<K::Output, ReferenceError> {
    let name = &reference.name;
    match reference.namespace {
        Namespace::Flag => scope
            .flags
            .get(name)
            .map(|b| backend.flag(b))
            .ok_or_else(|| ReferenceError::UnknownFlag(name.clone())),
        Namespace::Arg => scope
            .args
            .get(name)
            .map(|&position| backend.arg(position))
            .ok_or_else(|| ReferenceError::UnknownArg(name.clone())),
        Namespace::Step => scope
            .steps
            .get(name)
            .map(|b| backend.step(b, &reference.path))
            .ok_or_else(|| ReferenceError::UnknownStep(name.clone())),
    }
}
