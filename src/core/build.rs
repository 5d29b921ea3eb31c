//! CW-015: Formatting and building generated programs.
//!
//! The toolchain is driven as child processes. Source goes to `rustfmt` on
//! stdin; the cargo project is written next to it and built with
//! `cargo build`. Toolchain output is captured and reported verbatim.

use super::codegen::Generated;
use super::error::{BuildError, FormatError};
use super::features::{self, Analysis, Feature};
use super::types::Specification;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Pipe source through `rustfmt --edition 2021`.
pub fn format_source(source: &str) -> Result<String, FormatError> {
    let mut child = Command::new("rustfmt")
        .args(["--edition", "2021"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FormatError(format!("failed to spawn rustfmt: {}", e)))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(source.as_bytes())
            .map_err(|e| FormatError(format!("stdin write error: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| FormatError(format!("wait error: {}", e)))?;

    if !output.status.success() {
        return Err(FormatError(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Cargo package (and binary) name for a specification.
pub fn package_name(spec: &Specification) -> String {
    features::snake_ident(&spec.name).replace('_', "-")
}

/// `Cargo.toml` for the generated program. Dependencies follow the
/// feature set.
pub fn manifest(spec: &Specification, analysis: &Analysis) -> String {
    let mut toml = format!(
        "[package]\nname = {:?}\nversion = \"0.1.0\"\nedition = \"2021\"\ndescription = {:?}\n\n[dependencies]\nclap = \"4\"\n",
        package_name(spec),
        spec.description
    );
    let needs_json = [
        Feature::HttpStep,
        Feature::RenderJson,
        Feature::RenderTable,
        Feature::RenderText,
    ]
    .iter()
    .any(|f| analysis.uses(*f));
    if needs_json {
        toml.push_str("serde_json = { version = \"1\", features = [\"preserve_order\"] }\n");
    }
    if analysis.uses(Feature::HttpStep) {
        toml.push_str("reqwest = { version = \"0.12\", features = [\"blocking\"] }\n");
    }
    toml
}

/// Write `Cargo.toml` and `src/main.rs` under `dir`.
pub fn write_project(
    dir: &Path,
    spec: &Specification,
    generated: &Generated,
) -> Result<(), BuildError> {
    let src_dir = dir.join("src");
    std::fs::create_dir_all(&src_dir).map_err(|e| BuildError::Write {
        path: src_dir.display().to_string(),
        source: e,
    })?;

    let files = [
        (dir.join("Cargo.toml"), manifest(spec, &generated.analysis)),
        (src_dir.join("main.rs"), generated.source.clone()),
    ];
    for (path, content) in &files {
        std::fs::write(path, content).map_err(|e| BuildError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        log::debug!("wrote {}", path.display());
    }
    Ok(())
}

/// Run `cargo build` on a written project and return the binary path.
pub fn build(dir: &Path, spec: &Specification, release: bool) -> Result<PathBuf, BuildError> {
    let mut cmd = Command::new("cargo");
    cmd.arg("build")
        .arg("--manifest-path")
        .arg(dir.join("Cargo.toml"));
    if release {
        cmd.arg("--release");
    }
    log::debug!("running {:?}", cmd);

    let output = cmd.output().map_err(|e| BuildError::Spawn {
        program: "cargo".to_string(),
        source: e,
    })?;
    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(BuildError::Toolchain {
            status: output.status.to_string(),
            output: combined,
        });
    }

    let profile = if release { "release" } else { "debug" };
    Ok(dir.join("target").join(profile).join(package_name(spec)))
}
