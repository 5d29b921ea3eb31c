//! CW-005: Command-tree builder and arity policy.
//!
//! One node per command. Global flags live in the root's flag set and are
//! visible to every descendant along the dispatch path; command-local
//! flags live only on their own node. Both backends take the usage string
//! and arity from here.

use super::error::ArityError;
use super::types::{Action, Arg, Command, Flag, Specification};
use indexmap::IndexMap;

/// Positional-argument count policy.
///
/// All args required → exactly that many. Any optional arg → at least
/// the required count, with no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn from_args(args: &[Arg]) -> Self {
        let required = args.iter().filter(|a| a.required).count();
        if required == args.len() {
            Self::Exact(required)
        } else {
            Self::AtLeast(required)
        }
    }

    pub fn check(&self, command: &str, given: usize) -> Result<(), ArityError> {
        let message = match *self {
            Self::Exact(n) if given != n => {
                format!("accepts {} arg(s), received {}", n, given)
            }
            Self::AtLeast(n) if given < n => {
                format!("requires at least {} arg(s), only received {}", n, given)
            }
            _ => return Ok(()),
        };
        Err(ArityError {
            command: command.to_string(),
            message,
        })
    }
}

/// A flag bound to its storage cell.
#[derive(Debug, Clone)]
pub struct FlagCell {
    pub flag: Flag,
    value: String,
    bound: bool,
}

impl FlagCell {
    /// Cell starting at the flag's effective default.
    pub fn new(flag: &Flag) -> Self {
        Self {
            value: flag.effective_default(),
            flag: flag.clone(),
            bound: false,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether a caller-supplied value has been stored.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Store a caller-supplied value. Only the first bind sticks.
    pub fn bind(&mut self, value: impl Into<String>) {
        if !self.bound {
            self.value = value.into();
            self.bound = true;
        }
    }
}

/// Flags declared on one node, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    cells: IndexMap<String, FlagCell>,
}

impl FlagSet {
    pub fn from_flags(flags: &[Flag]) -> Self {
        Self {
            cells: flags
                .iter()
                .map(|f| (f.name.clone(), FlagCell::new(f)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FlagCell> {
        self.cells.get(name)
    }

    pub fn bind(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.cells.get_mut(name) {
            Some(cell) => {
                cell.bind(value);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagCell> {
        self.cells.values()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A live command node.
#[derive(Debug, Clone)]
pub struct CommandNode {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub arity: Arity,
    /// Declared arg names, in positional order
    pub args: Vec<String>,
    pub flags: FlagSet,
    /// Present on leaves
    pub action: Option<Action>,
    pub children: Vec<CommandNode>,
}

impl CommandNode {
    fn from_command(command: &Command) -> Self {
        Self {
            name: command.name.clone(),
            description: command.description.clone(),
            usage: command.usage(),
            arity: Arity::from_args(&command.args),
            args: command.args.iter().map(|a| a.name.clone()).collect(),
            flags: FlagSet::from_flags(&command.flags),
            action: command.action.clone(),
            children: command.commands.iter().map(Self::from_command).collect(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.action.is_some()
    }

    pub fn child(&self, name: &str) -> Option<&CommandNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut CommandNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn check_args(&self, given: usize) -> Result<(), ArityError> {
        self.arity.check(&self.name, given)
    }
}

/// The root of a live tree. Root takes the specification's name and owns
/// the global flags.
#[derive(Debug, Clone)]
pub struct LiveTree {
    pub root: CommandNode,
}

impl LiveTree {
    /// Follow `path` (command names below the root).
    pub fn find(&self, path: &[String]) -> Option<&CommandNode> {
        let mut node = &self.root;
        for name in path {
            node = node.child(name)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, path: &[String]) -> Option<&mut CommandNode> {
        let mut node = &mut self.root;
        for name in path {
            node = node.child_mut(name)?;
        }
        Some(node)
    }

    /// Flag values visible to the run handler at `path`: the root's global
    /// flags, then the target node's own local flags. Intermediate groups'
    /// local flags are not visible.
    pub fn visible_flags(&self, path: &[String]) -> IndexMap<String, String> {
        let mut values: IndexMap<String, String> = self
            .root
            .flags
            .iter()
            .map(|cell| (cell.flag.name.clone(), cell.value().to_string()))
            .collect();
        if !path.is_empty() {
            if let Some(node) = self.find(path) {
                for cell in node.flags.iter() {
                    values.insert(cell.flag.name.clone(), cell.value().to_string());
                }
            }
        }
        values
    }

    /// Required flags visible at `path` whose value is still empty.
    pub fn missing_required(&self, path: &[String]) -> Vec<String> {
        let mut cells: Vec<&FlagCell> = self.root.flags.iter().collect();
        if !path.is_empty() {
            if let Some(node) = self.find(path) {
                cells.extend(node.flags.iter());
            }
        }
        cells
            .into_iter()
            .filter(|c| c.flag.required && c.value().is_empty())
            .map(|c| c.flag.name.clone())
            .collect()
    }
}

/// Build a live tree from a specification.
pub fn build(spec: &Specification) -> LiveTree {
    let root = CommandNode {
        name: spec.name.clone(),
        description: spec.description.clone(),
        usage: spec.name.clone(),
        arity: Arity::Exact(0),
        args: Vec::new(),
        flags: FlagSet::from_flags(&spec.flags),
        action: None,
        children: spec.commands.iter().map(CommandNode::from_command).collect(),
    };
    log::debug!(
        "built command tree '{}' with {} top-level command(s)",
        root.name,
        root.children.len()
    );
    LiveTree { root }
}
