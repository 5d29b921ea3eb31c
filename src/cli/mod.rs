//! CW-014: CLI subcommands: init, validate, generate, build, run.

pub mod live;

use crate::core::error::Error;
use crate::core::executor::RunConfig;
use crate::core::{build, codegen, parser, types};
use crate::transport::{self, ReqwestTransport};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a new cliwright.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a specification without generating anything
    Validate {
        /// Path to cliwright.yaml
        #[arg(short, long, default_value = "cliwright.yaml", env = "CLIWRIGHT_SPEC")]
        file: PathBuf,
    },

    /// Generate Rust source for a specification
    Generate {
        /// Path to cliwright.yaml
        #[arg(short, long, default_value = "cliwright.yaml", env = "CLIWRIGHT_SPEC")]
        file: PathBuf,

        /// Write source here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate, write a cargo project and build it
    Build {
        /// Path to cliwright.yaml
        #[arg(short, long, default_value = "cliwright.yaml", env = "CLIWRIGHT_SPEC")]
        file: PathBuf,

        /// Project directory
        #[arg(long)]
        out_dir: PathBuf,

        /// Build with the release profile
        #[arg(long)]
        release: bool,
    },

    /// Interpret a specification against the arguments after `--`
    Run {
        /// Path to cliwright.yaml
        #[arg(short, long, default_value = "cliwright.yaml", env = "CLIWRIGHT_SPEC")]
        file: PathBuf,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = transport::DEFAULT_TIMEOUT_SECS)]
        timeout: u64,

        /// Arguments for the specified CLI
        #[arg(last = true)]
        argv: Vec<String>,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), Error> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Generate { file, output } => cmd_generate(&file, output.as_deref()),
        Commands::Build {
            file,
            out_dir,
            release,
        } => cmd_build(&file, &out_dir, release),
        Commands::Run {
            file,
            timeout,
            argv,
        } => cmd_run(&file, timeout, &argv).await,
    }
}

const TEMPLATE: &str = r#"name: vault
description: Tiny Vault client

flags:
  - name: address
    short: a
    env: VAULT_ADDR
    default: http://127.0.0.1:8200
    description: Vault server address
  - name: token
    env: VAULT_TOKEN
    required: true
    description: Vault token

commands:
  - name: kv
    description: Key/value secrets
    commands:
      - name: get
        description: Read a secret
        args:
          - name: path
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
        description: List secrets under a prefix
        args:
          - name: prefix
            required: false
        action:
          steps:
            - name: list
              method: LIST
              url: "${flag.address}/v1/secret/metadata/${arg.prefix}"
              headers:
                X-Vault-Token: "${flag.token}"
          output:
            format: text
            data: "${step.list.body.data.keys}"
"#;

fn write_file(path: &Path, content: &str) -> Result<(), Error> {
    std::fs::write(path, content).map_err(|e| Error::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn cmd_init(path: &Path) -> Result<(), Error> {
    let spec_path = path.join("cliwright.yaml");
    if spec_path.exists() {
        return Err(Error::Usage(format!(
            "{} already exists",
            spec_path.display()
        )));
    }
    std::fs::create_dir_all(path).map_err(|e| Error::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    write_file(&spec_path, TEMPLATE)?;

    println!("Initialized cliwright project at {}", path.display());
    println!("  Created: {}", spec_path.display());
    Ok(())
}

fn command_count(spec: &types::Specification) -> usize {
    let mut count = 0;
    for command in &spec.commands {
        command.walk(&mut |_| count += 1);
    }
    count
}

/// Parse and validate a specification file, printing every finding.
fn parse_and_validate(file: &Path) -> Result<types::Specification, Error> {
    let spec = parser::parse_spec_file(file)?;
    let errors = parser::validate_spec(&spec);
    if errors.is_empty() {
        return Ok(spec);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Invalid(errors.len()))
}

fn cmd_validate(file: &Path) -> Result<(), Error> {
    let spec = parse_and_validate(file)?;
    // Resolves every expression; unknown names fail here
    codegen::generate_unformatted(&spec)?;

    println!(
        "OK: {} ({} commands, {} flags)",
        spec.name,
        command_count(&spec),
        spec.all_flags().len()
    );
    Ok(())
}

fn cmd_generate(file: &Path, output: Option<&Path>) -> Result<(), Error> {
    let spec = parse_and_validate(file)?;
    let generated = codegen::generate(&spec)?;
    if let Some(e) = &generated.format_error {
        eprintln!("warning: {}", e);
    }
    match output {
        Some(path) => {
            write_file(path, &generated.source)?;
            println!("Generated {}", path.display());
        }
        None => print!("{}", generated.source),
    }
    Ok(())
}

fn cmd_build(file: &Path, out_dir: &Path, release: bool) -> Result<(), Error> {
    let spec = parse_and_validate(file)?;
    let generated = codegen::generate(&spec)?;
    if let Some(e) = &generated.format_error {
        eprintln!("warning: {}", e);
    }
    build::write_project(out_dir, &spec, &generated)?;
    let binary = build::build(out_dir, &spec, release)?;
    println!("Built {}", binary.display());
    Ok(())
}

async fn cmd_run(file: &Path, timeout: u64, argv: &[String]) -> Result<(), Error> {
    let spec = parse_and_validate(file)?;
    let transport = ReqwestTransport::new(Duration::from_secs(timeout))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling in-flight request");
            on_interrupt.cancel();
        }
    });

    let cfg = RunConfig {
        transport: &transport,
        cancel: &cancel,
    };
    let mut stdout = std::io::stdout();
    live::run(&cfg, &spec, argv, &mut stdout).await
}
