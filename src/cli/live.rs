//! CW-016: clap binding of the live command tree.
//!
//! The interpreter builds the same clap shape the generated program
//! declares, parses argv with it, then binds command-line flag values into
//! the tree's flag cells before handing off to the executor.

use crate::core::error::{Error, RenderError};
use crate::core::executor::{self, RunConfig};
use crate::core::tree::{self, CommandNode, LiveTree};
use crate::core::types::Specification;
use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::Write;

/// Id of the positional collector.
const POSITIONAL: &str = "args";

/// Command path and positional arguments of one parsed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub path: Vec<String>,
    pub args: Vec<String>,
}

/// clap command for a live tree.
pub fn command(tree: &LiveTree) -> Command {
    node_command(&tree.root, true)
}

fn node_command(node: &CommandNode, root: bool) -> Command {
    let mut cmd = Command::new(node.name.clone()).about(node.description.clone());
    if !node.args.is_empty() {
        cmd = cmd.override_usage(node.usage.clone());
    }

    for cell in node.flags.iter() {
        let flag = &cell.flag;
        let mut arg = Arg::new(flag.name.clone()).long(flag.name.clone());
        if let Some(short) = flag.short {
            arg = arg.short(short);
        }
        if !flag.description.is_empty() {
            arg = arg.help(flag.description.clone());
        }
        if root {
            arg = arg.global(true);
        }
        cmd = cmd.arg(arg);
    }

    if !node.args.is_empty() {
        cmd = cmd.arg(
            Arg::new(POSITIONAL)
                .num_args(0..)
                .action(ArgAction::Append),
        );
        if !node.children.is_empty() {
            cmd = cmd.args_conflicts_with_subcommands(true);
        }
    }

    if !node.children.is_empty() {
        cmd = cmd.subcommand_required(true).arg_required_else_help(true);
        for child in &node.children {
            cmd = cmd.subcommand(node_command(child, false));
        }
    }
    cmd
}

/// Bind values given on the command line into the tree's flag cells and
/// return the dispatch path with its positional arguments.
pub fn bind(tree: &mut LiveTree, matches: &ArgMatches) -> Invocation {
    let mut chain = vec![matches];
    let mut path = Vec::new();
    let mut current = matches;
    while let Some((name, sub)) = current.subcommand() {
        path.push(name.to_string());
        chain.push(sub);
        current = sub;
    }

    // Globals may be given at any level; the deepest occurrence wins
    let globals: Vec<String> = tree.root.flags.iter().map(|c| c.flag.name.clone()).collect();
    for name in &globals {
        if let Some(value) = chain.iter().rev().find_map(|m| command_line_value(m, name)) {
            tree.root.flags.bind(name, value);
        }
    }

    if !path.is_empty() {
        if let Some(node) = tree.find_mut(&path) {
            let locals: Vec<String> = node.flags.iter().map(|c| c.flag.name.clone()).collect();
            for name in &locals {
                if let Some(value) = command_line_value(current, name) {
                    node.flags.bind(name, value);
                }
            }
        }
    }

    let args = current
        .try_get_many::<String>(POSITIONAL)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    Invocation { path, args }
}

fn command_line_value(matches: &ArgMatches, id: &str) -> Option<String> {
    match matches.value_source(id) {
        Some(ValueSource::CommandLine) => matches.get_one::<String>(id).cloned(),
        _ => None,
    }
}

/// First line of a clap error without its `error: ` prefix.
fn clap_message(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.trim_start_matches("error: ").trim().to_string()
}

/// Deepest command named by `argv`, skipping flags and their values.
fn requested<'a>(tree: &'a LiveTree, argv: &[String]) -> &'a CommandNode {
    let mut node = &tree.root;
    let mut tokens = argv.iter();
    while let Some(token) = tokens.next() {
        if token == "--" {
            break;
        }
        if let Some(flag) = token.strip_prefix('-') {
            // Every flag takes a value; `--name value` and `-x value` use
            // the next token
            if !flag.contains('=') && (flag.starts_with('-') || flag.len() == 1) {
                tokens.next();
            }
            continue;
        }
        match node.child(token) {
            Some(child) => node = child,
            None => break,
        }
    }
    node
}

/// Interpret `argv` (without the program name) against a specification.
pub async fn run(
    cfg: &RunConfig<'_>,
    spec: &Specification,
    argv: &[String],
    out: &mut dyn Write,
) -> Result<(), Error> {
    let mut tree = tree::build(spec);
    let full = std::iter::once(spec.name.clone()).chain(argv.iter().cloned());
    let matches = match command(&tree).try_get_matches_from(full) {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            write!(out, "{}", e.render()).map_err(RenderError::from)?;
            return Ok(());
        }
        Err(e) if e.kind() == ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            write!(out, "{}", e.render()).map_err(RenderError::from)?;
            let node = requested(&tree, argv);
            return Err(Error::Usage(format!(
                "'{}' requires a subcommand",
                node.name
            )));
        }
        Err(e) => return Err(Error::Usage(clap_message(&e))),
    };

    let invocation = bind(&mut tree, &matches);
    log::debug!(
        "dispatching '{}' with {} arg(s)",
        invocation.path.join(" "),
        invocation.args.len()
    );
    executor::run_command(cfg, &tree, &invocation.path, invocation.args, out).await
}
